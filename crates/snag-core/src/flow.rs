//! Handling of a user's text message
//!
//! A message is either a URL to download, or, when a page is pending for
//! the sender, the extension list (or `links`) for that page.

use crate::batch::BatchDownloader;
use crate::conversation::Conversation;
use crate::extract::{self, ExtensionFilter};
use crate::render::PageRenderer;
use crate::resolve::{is_downloadable_url, resolve};
use crate::{FileInfo, Result, SnagError};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

/// Reply token that asks for the page to be rendered in a browser first
pub const BROWSER_TOKEN: &str = "+browser";

/// Reply that asks for the page's links instead of downloads
pub const LINKS_KEYWORD: &str = "links";

/// Longest message the chat service accepts
pub const MESSAGE_LIMIT: usize = 4096;

const NOT_A_URL: &str = "Received message is not a valid URL. Try again.";
const RETRYING: &str =
    "Oopsie, looks like I wasn't able to find any matches! I'll try again this time with more effort 😚";
const RENDERING: &str = "Fetching content with a browser";
const NOTHING_FOUND: &str = "Sorry, I did my best but couldn't find the stuff you're looking for :(";
const NO_LINKS: &str = "That page has no links at all.";

/// Reply to a pending page, split into its parts
#[derive(Debug, Clone)]
struct PageReply {
    use_browser: bool,
    list_links: bool,
    filter: ExtensionFilter,
}

impl PageReply {
    fn parse(text: &str) -> Self {
        let use_browser = text.contains(BROWSER_TOKEN);
        let rest = text.replace(BROWSER_TOKEN, "");
        let list_links = rest.trim().eq_ignore_ascii_case(LINKS_KEYWORD);
        Self {
            use_browser,
            list_links,
            filter: ExtensionFilter::parse(&rest),
        }
    }
}

/// Entry point for every text message
pub struct RequestHandler {
    downloader: Arc<BatchDownloader>,
    renderer: Arc<dyn PageRenderer>,
}

impl RequestHandler {
    pub fn new(downloader: Arc<BatchDownloader>, renderer: Arc<dyn PageRenderer>) -> Self {
        Self {
            downloader,
            renderer,
        }
    }

    pub async fn handle_text(&self, conversation: Arc<dyn Conversation>, text: &str) -> Result<()> {
        let key = conversation.key();
        match self.downloader.sessions().remove(&key) {
            Some(page) => self.handle_page_reply(conversation, page, text).await,
            None => {
                info!("New message from {}: {}", key, text);
                match parse_url(text) {
                    Ok(url) => self.downloader.run(conversation, vec![url]).await,
                    Err(e) => {
                        debug!("Rejected message from {}: {}", key, e);
                        conversation.reply(NOT_A_URL).await
                    }
                }
            }
        }
    }

    async fn handle_page_reply(
        &self,
        conversation: Arc<dyn Conversation>,
        page: FileInfo,
        text: &str,
    ) -> Result<()> {
        let reply = PageReply::parse(text);
        let origin = page.origin.clone().unwrap_or_default();

        if reply.list_links {
            let document = if reply.use_browser {
                conversation.reply(RENDERING).await?;
                self.render(&origin).await.unwrap_or_else(|| page.text())
            } else {
                page.text()
            };
            return self.send_links(conversation.as_ref(), &document).await;
        }

        let found = if reply.use_browser {
            conversation.reply(RENDERING).await?;
            Err(SnagError::NoMatch)
        } else {
            matching_urls(&page.text(), &origin, &reply.filter)
        };

        // Static extraction came up empty: render once, never again
        let urls = match found {
            Ok(urls) => urls,
            Err(_) => {
                if !reply.use_browser {
                    conversation.reply(RETRYING).await?;
                }
                let rendered = self.render(&origin).await.unwrap_or_default();
                match matching_urls(&rendered, &origin, &reply.filter) {
                    Ok(urls) => urls,
                    Err(e) => {
                        info!("{}: {}", origin, e);
                        return conversation.reply(NOTHING_FOUND).await;
                    }
                }
            }
        };

        info!("Found {} matching links on {}", urls.len(), origin);
        self.downloader.run(conversation, urls).await
    }

    /// Render `origin` and adopt its cookies; `None` when rendering failed
    async fn render(&self, origin: &str) -> Option<String> {
        match self.renderer.render(origin).await {
            Ok(rendered) => {
                if let Ok(url) = Url::parse(origin) {
                    self.downloader
                        .fetcher()
                        .add_cookies(&rendered.cookies, &url);
                }
                Some(rendered.html)
            }
            Err(e) => {
                warn!("Rendering {} failed: {}", origin, e);
                None
            }
        }
    }

    async fn send_links(&self, conversation: &dyn Conversation, document: &str) -> Result<()> {
        let links = extract::extract_links(document);
        if links.is_empty() {
            return conversation.reply(NO_LINKS).await;
        }
        for part in split_message(&links, MESSAGE_LIMIT) {
            conversation.reply(&part).await?;
        }
        Ok(())
    }
}

/// The message as a downloadable URL
fn parse_url(text: &str) -> Result<String> {
    let url = text.trim();
    if is_downloadable_url(url) {
        Ok(url.to_string())
    } else {
        Err(SnagError::InvalidInput(url.to_string()))
    }
}

/// Absolute URLs of matching links, or `NoMatch`
fn matching_urls(document: &str, origin: &str, filter: &ExtensionFilter) -> Result<Vec<String>> {
    let mut seen = HashSet::new();
    let urls: Vec<String> = extract::extract(document, filter)
        .iter()
        .map(|link| resolve(origin, link))
        .filter(|url| seen.insert(url.clone()))
        .collect();
    if urls.is_empty() {
        Err(SnagError::NoMatch)
    } else {
        Ok(urls)
    }
}

/// Join lines into messages of at most `limit` characters
pub fn split_message(lines: &[String], limit: usize) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();

    for line in lines {
        let pieces = hard_split(line, limit);
        for piece in pieces {
            let needed = piece.chars().count() + usize::from(!current.is_empty());
            if current.chars().count() + needed > limit && !current.is_empty() {
                parts.push(std::mem::take(&mut current));
            }
            if !current.is_empty() {
                current.push('\n');
            }
            current.push_str(&piece);
        }
    }
    if !current.is_empty() {
        parts.push(current);
    }
    parts
}

fn hard_split(line: &str, limit: usize) -> Vec<String> {
    let chars: Vec<char> = line.chars().collect();
    chars
        .chunks(limit.max(1))
        .map(|chunk| chunk.iter().collect())
        .collect()
}
