//! JavaScript rendering through headless Chrome

use crate::chrome::{ChromeConfig, ChromeManager};
use crate::{Result, SnagError};
use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::network::Cookie;
use chromiumoxide::Page;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// A cookie set while rendering a page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowserCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    pub secure: bool,
    pub http_only: bool,
}

impl BrowserCookie {
    /// `Set-Cookie` form understood by the HTTP cookie jar
    pub fn to_set_cookie(&self) -> String {
        let mut header = format!("{}={}", self.name, self.value);
        // Without a leading dot the cookie is host-only
        if self.domain.starts_with('.') {
            header.push_str(&format!("; Domain={}", self.domain));
        }
        if !self.path.is_empty() {
            header.push_str(&format!("; Path={}", self.path));
        }
        if self.secure {
            header.push_str("; Secure");
        }
        if self.http_only {
            header.push_str("; HttpOnly");
        }
        header
    }
}

impl From<Cookie> for BrowserCookie {
    fn from(cookie: Cookie) -> Self {
        Self {
            name: cookie.name,
            value: cookie.value,
            domain: cookie.domain,
            path: cookie.path,
            secure: cookie.secure,
            http_only: cookie.http_only,
        }
    }
}

/// Markup after scripts ran, plus the cookies the page set
#[derive(Debug, Clone, Default)]
pub struct RenderedPage {
    pub html: String,
    pub cookies: Vec<BrowserCookie>,
}

#[async_trait]
pub trait PageRenderer: Send + Sync {
    async fn render(&self, url: &str) -> Result<RenderedPage>;
}

/// Renders pages in a shared headless Chrome
pub struct ChromeRenderer {
    manager: Mutex<ChromeManager>,
    page_ready: Duration,
}

impl ChromeRenderer {
    pub fn new(config: ChromeConfig, page_ready: Duration) -> Self {
        Self {
            manager: Mutex::new(ChromeManager::with_config(config)),
            page_ready,
        }
    }

    async fn render_page(&self, page: &Page) -> Result<RenderedPage> {
        page.wait_for_navigation()
            .await
            .map_err(|e| SnagError::BrowserError(e.to_string()))?;
        self.wait_until_complete(page).await;

        let html = page
            .content()
            .await
            .map_err(|e| SnagError::BrowserError(e.to_string()))?;
        let cookies = match page.get_cookies().await {
            Ok(cookies) => cookies.into_iter().map(BrowserCookie::from).collect(),
            Err(e) => {
                warn!("Failed to read browser cookies: {}", e);
                Vec::new()
            }
        };

        Ok(RenderedPage { html, cookies })
    }

    /// Poll `document.readyState` until `complete` or the ready budget runs out
    async fn wait_until_complete(&self, page: &Page) {
        let deadline = Instant::now() + self.page_ready;
        loop {
            let state = page
                .evaluate("document.readyState")
                .await
                .ok()
                .and_then(|result| result.into_value::<String>().ok());
            if state.as_deref() == Some("complete") {
                return;
            }
            if Instant::now() >= deadline {
                warn!("Page taking too long to load, using what is there");
                return;
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
    }
}

#[async_trait]
impl PageRenderer for ChromeRenderer {
    async fn render(&self, url: &str) -> Result<RenderedPage> {
        info!("Rendering with browser: {}", url);

        let browser = self.manager.lock().await.get_browser().await?;
        let handle = browser.lock().await;

        let page = match handle.browser.new_page(url).await {
            Ok(page) => page,
            Err(e) => {
                drop(handle);
                // The connection may be dead; relaunch on the next request
                self.manager.lock().await.reset();
                return Err(SnagError::BrowserError(e.to_string()));
            }
        };

        let rendered = self.render_page(&page).await;
        let _ = page.close().await;

        if let Ok(ref rendered) = rendered {
            debug!(
                "Rendered {}: {} bytes, {} cookies",
                url,
                rendered.html.len(),
                rendered.cookies.len()
            );
        }
        rendered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chrome::ChromeMode;

    #[test]
    fn test_set_cookie_string() {
        let cookie = BrowserCookie {
            name: "session".to_string(),
            value: "abc=def".to_string(),
            domain: ".example.com".to_string(),
            path: "/".to_string(),
            secure: true,
            http_only: false,
        };
        assert_eq!(
            cookie.to_set_cookie(),
            "session=abc=def; Domain=.example.com; Path=/; Secure"
        );
    }

    #[test]
    fn test_host_only_cookie_has_no_domain() {
        let cookie = BrowserCookie {
            name: "sid".to_string(),
            value: "1".to_string(),
            domain: "example.com".to_string(),
            path: "/".to_string(),
            secure: false,
            http_only: true,
        };
        assert_eq!(cookie.to_set_cookie(), "sid=1; Path=/; HttpOnly");
    }

    #[tokio::test]
    async fn test_disabled_browser_is_a_render_error() {
        let renderer = ChromeRenderer::new(
            ChromeConfig {
                mode: ChromeMode::None,
                ..Default::default()
            },
            Duration::from_secs(5),
        );
        let err = renderer.render("https://example.com").await.unwrap_err();
        assert!(matches!(err, SnagError::BrowserError(_)));
    }
}
