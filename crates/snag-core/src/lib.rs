//! Snag Core Library
//!
//! Core functionality for the Snag media bot including:
//! - Link extraction and root-relative URL resolution
//! - Streaming HTTP downloads with content sniffing
//! - Headless Chrome rendering for script-heavy pages
//! - Batched concurrent downloads with progress reporting

pub mod batch;
pub mod chrome;
pub mod conversation;
pub mod extract;
pub mod fetch;
pub mod flow;
pub mod media;
pub mod progress;
pub mod render;
pub mod resolve;
pub mod session;

use thiserror::Error;

// Re-export key types
pub use batch::{BatchConfig, BatchDownloader};
pub use chrome::{ChromeConfig, ChromeManager};
pub use conversation::{Conversation, StatusMessage};
pub use extract::ExtensionFilter;
pub use fetch::Fetcher;
pub use flow::RequestHandler;
pub use media::{MediaGroup, MediaItem, MediaKind};
pub use progress::{ProgressHandle, ProgressStatus, ProgressTracker};
pub use render::{BrowserCookie, ChromeRenderer, PageRenderer, RenderedPage};
pub use session::{SessionKey, SessionStore};

#[derive(Error, Debug)]
pub enum SnagError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("{url} answered with status {status}")]
    StatusError { url: String, status: u16 },

    #[error("{0} took too long to download")]
    TimeoutError(String),

    #[error("Not a valid URL: {0}")]
    InvalidInput(String),

    #[error("No links matched the requested extensions")]
    NoMatch,

    #[error("Delivery failed: {0}")]
    DeliveryError(String),

    #[error("Browser error: {0}")]
    BrowserError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, SnagError>;

/// A downloaded resource
#[derive(Debug, Clone, Default)]
pub struct FileInfo {
    /// File name, including the inferred extension
    pub filename: String,
    /// Raw body bytes
    pub content: Vec<u8>,
    /// MIME type sniffed from the body, empty when unknown
    pub mime_type: String,
    /// Declared Content-Length, 0 when the server did not send one
    pub size: u64,
    /// Page URL, set only while the file waits for an extension list
    pub origin: Option<String>,
}

impl FileInfo {
    /// Whether the file is an HTML page rather than media
    pub fn is_html(&self) -> bool {
        self.mime_type.contains("text/html") || self.filename.to_lowercase().ends_with(".html")
    }

    /// Document text, lossily decoded
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.content).into_owned()
    }
}

/// Configuration for fetching resources
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// User agent string
    pub user_agent: String,
    /// Longest wait for a connection or for the next body chunk, in seconds
    pub timeout_secs: u64,
}

/// Desktop Chrome user agent; some hosts refuse library defaults
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout_secs: 600,
        }
    }
}
