//! The chat a request came from, as seen by the downloader

use crate::media::MediaItem;
use crate::session::SessionKey;
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Outbound side of one user's message
#[async_trait]
pub trait Conversation: Send + Sync {
    /// Chat and user the message came from
    fn key(&self) -> SessionKey;

    /// Reply to the triggering message
    async fn reply(&self, text: &str) -> Result<()>;

    /// Send a message that will be edited as a batch progresses
    async fn open_status(&self, text: &str) -> Result<Arc<dyn StatusMessage>>;

    /// Upload one album; at most ten items.
    ///
    /// Failures are reported as [`crate::SnagError::DeliveryError`].
    async fn deliver(&self, items: Vec<MediaItem>) -> Result<()>;
}

/// An editable status message
#[async_trait]
pub trait StatusMessage: Send + Sync {
    async fn edit(&self, text: &str) -> Result<()>;

    async fn remove(&self) -> Result<()>;
}
