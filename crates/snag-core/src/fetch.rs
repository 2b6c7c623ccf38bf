//! Streaming HTTP downloads

use crate::render::BrowserCookie;
use crate::{FetchConfig, FileInfo, Result, SnagError};
use futures::TryStreamExt;
use rand::Rng;
use reqwest::cookie::Jar;
use reqwest::header::{HeaderMap, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Called with (bytes read so far, declared total) after every chunk
pub type ProgressCallback<'a> = &'a (dyn Fn(u64, u64) + Send + Sync);

/// Downloader for individual resources, sharing one cookie jar
pub struct Fetcher {
    client: Client,
    cookies: Arc<Jar>,
    /// Longest wait for the connection or for the next body chunk
    read_timeout: Duration,
}

impl Fetcher {
    /// Create a new fetcher with default configuration
    pub fn new() -> Result<Self> {
        Self::with_config(FetchConfig::default())
    }

    /// Create a new fetcher with custom configuration
    pub fn with_config(config: FetchConfig) -> Result<Self> {
        let cookies = Arc::new(Jar::default());
        let read_timeout = Duration::from_secs(config.timeout_secs);
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .connect_timeout(read_timeout)
            .cookie_provider(Arc::clone(&cookies))
            .build()?;

        Ok(Self {
            client,
            cookies,
            read_timeout,
        })
    }

    /// Download `url`, reporting progress when the size is known.
    ///
    /// Anything but `200 OK` is an error. An empty body is a valid result.
    /// A transfer that keeps producing data is never cut off here; only a
    /// silent connection is.
    pub async fn fetch(
        &self,
        url: &str,
        on_progress: Option<ProgressCallback<'_>>,
    ) -> Result<FileInfo> {
        info!("Fetching: {}", url);
        let response = tokio::time::timeout(self.read_timeout, self.client.get(url).send())
            .await
            .map_err(|_| SnagError::TimeoutError(url.to_string()))??;

        if response.status() != StatusCode::OK {
            warn!("Error fetching {}, status is {}", url, response.status());
            return Err(SnagError::StatusError {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        let headers = response.headers().clone();
        let base_name = content_disposition_filename(&headers).unwrap_or_else(random_id);
        let declared_size = declared_length(&headers);

        if declared_size.is_none() {
            debug!("{} has no Content-Length, progress unavailable", url);
        }

        let capacity = declared_size.unwrap_or(0).min(64 * 1024 * 1024) as usize;
        let mut content = Vec::with_capacity(capacity);
        let mut stream = response.bytes_stream();
        loop {
            let next = tokio::time::timeout(self.read_timeout, stream.try_next())
                .await
                .map_err(|_| SnagError::TimeoutError(url.to_string()))??;
            let Some(chunk) = next else {
                break;
            };
            content.extend_from_slice(&chunk);
            if let (Some(report), Some(total)) = (on_progress, declared_size) {
                report(content.len() as u64, total);
            }
        }

        let sniffed = infer::get(&content);
        let mime_type = sniffed
            .map(|kind| kind.mime_type().to_string())
            .unwrap_or_default();
        let extension = sniffed
            .map(|kind| kind.extension().to_string())
            .or_else(|| declared_extension(&headers));

        let filename = with_extension(&base_name, extension.as_deref());
        debug!(
            "Fetched {} as {} ({} bytes, mime {:?})",
            url,
            filename,
            content.len(),
            mime_type
        );

        Ok(FileInfo {
            filename,
            content,
            mime_type,
            size: declared_size.unwrap_or(0),
            origin: None,
        })
    }

    /// Add cookies obtained from a rendered page to the shared jar
    pub fn add_cookies(&self, cookies: &[BrowserCookie], origin: &Url) {
        for cookie in cookies {
            let scope = cookie_scope(cookie, origin);
            self.cookies.add_cookie_str(&cookie.to_set_cookie(), &scope);
        }
        debug!("Added {} browser cookies for {}", cookies.len(), origin);
    }
}

/// URL a cookie belongs to; its own domain when set, otherwise the origin
fn cookie_scope(cookie: &BrowserCookie, origin: &Url) -> Url {
    let domain = cookie.domain.trim_start_matches('.');
    if domain.is_empty() {
        return origin.clone();
    }
    Url::parse(&format!("{}://{}/", origin.scheme(), domain)).unwrap_or_else(|_| origin.clone())
}

fn declared_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// `filename=` parameter of Content-Disposition; a quoted value may contain `;`
fn content_disposition_filename(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(CONTENT_DISPOSITION)?.to_str().ok()?;
    let start = value.find("filename=")? + "filename=".len();
    let rest = value[start..].trim_start();
    let name = match rest.strip_prefix('"') {
        Some(quoted) => quoted.split('"').next()?,
        None => rest.split(';').next()?,
    }
    .trim();
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

/// Extension from the declared Content-Type subtype, e.g. `text/html; charset=utf-8` -> `html`
fn declared_extension(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(CONTENT_TYPE)?.to_str().ok()?;
    let subtype = value.split(';').next()?.split('/').nth(1)?.trim().to_lowercase();
    match subtype.as_str() {
        "" | "octet-stream" => None,
        _ => Some(subtype),
    }
}

/// Append `.ext` unless the name already ends with it
fn with_extension(base: &str, extension: Option<&str>) -> String {
    match extension {
        Some(ext) if !base.to_lowercase().ends_with(&format!(".{}", ext.to_lowercase())) => {
            format!("{}.{}", base, ext)
        }
        _ => base.to_string(),
    }
}

/// Six random digits
fn random_id() -> String {
    let mut rng = rand::rng();
    (0..6)
        .map(|_| char::from(b'0' + rng.random_range(0..10u8)))
        .collect()
}
