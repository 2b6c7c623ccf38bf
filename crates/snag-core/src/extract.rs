//! Link extraction from page markup

use regex::Regex;
use scraper::{Html, Selector};
use std::collections::HashSet;
use tracing::debug;

/// Attributes that may carry a downloadable URL
const LINK_ATTRIBUTES: [&str; 2] = ["href", "src"];

/// Matches a URL path against a user-supplied extension list
#[derive(Debug, Clone)]
pub struct ExtensionFilter {
    pattern: Option<Regex>,
    extensions: Vec<String>,
}

impl ExtensionFilter {
    /// Build a filter from comma separated input such as `"jpg, MP4"`.
    ///
    /// Tokens are trimmed and lower-cased and a leading dot is dropped.
    /// Empty tokens are ignored; a list with no usable token matches nothing.
    pub fn parse(input: &str) -> Self {
        let extensions: Vec<String> = input
            .split(',')
            .map(|token| token.trim().trim_start_matches('.').to_lowercase())
            .filter(|token| !token.is_empty())
            .collect();

        let pattern = if extensions.is_empty() {
            None
        } else {
            let alternatives = extensions
                .iter()
                .map(|ext| regex::escape(ext))
                .collect::<Vec<_>>()
                .join("|");
            Regex::new(&format!(r"(?i)\.(?:{})$", alternatives)).ok()
        };

        Self {
            pattern,
            extensions,
        }
    }

    /// Normalized extensions, in input order
    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    /// Whether the path of `url` ends with one of the extensions
    pub fn matches(&self, url: &str) -> bool {
        match self.pattern {
            Some(ref pattern) => pattern.is_match(url_path(url)),
            None => false,
        }
    }
}

/// Strip query string and fragment
fn url_path(url: &str) -> &str {
    let end = url.find(['?', '#']).unwrap_or(url.len());
    &url[..end]
}

/// Every `href`/`src` value in document order, without duplicates
pub fn extract_links(document: &str) -> Vec<String> {
    let html = Html::parse_document(document);
    let selector = match Selector::parse("[href], [src]") {
        Ok(selector) => selector,
        Err(_) => return Vec::new(),
    };

    let mut seen = HashSet::new();
    let mut links = Vec::new();
    for element in html.select(&selector) {
        for attr in LINK_ATTRIBUTES {
            if let Some(value) = element.value().attr(attr) {
                let value = value.trim();
                if !value.is_empty() && seen.insert(value.to_string()) {
                    links.push(value.to_string());
                }
            }
        }
    }
    links
}

/// Links whose path ends in one of the filter's extensions
pub fn extract(document: &str, filter: &ExtensionFilter) -> Vec<String> {
    let matched: Vec<String> = extract_links(document)
        .into_iter()
        .filter(|link| filter.matches(link))
        .collect();
    debug!(
        "Matched {} links for extensions {:?}",
        matched.len(),
        filter.extensions()
    );
    matched
}

#[cfg(test)]
mod tests {
    use super::*;

    const GALLERY: &str = r#"<html><body>
        <img src="/p1.jpg">
        <a href="/v1.mp4">video</a>
        <a href="/about.html">about</a>
        <img src="/p1.jpg">
        <link href="style.css" rel="stylesheet">
        <a href="https://cdn.example.net/P2.JPG?size=large#top">big</a>
    </body></html>"#;

    #[test]
    fn test_extract_in_document_order() {
        let filter = ExtensionFilter::parse("jpg,mp4");
        assert_eq!(
            extract(GALLERY, &filter),
            vec![
                "/p1.jpg".to_string(),
                "/v1.mp4".to_string(),
                "https://cdn.example.net/P2.JPG?size=large#top".to_string(),
            ]
        );
    }

    #[test]
    fn test_case_insensitive_extensions() {
        let lower = extract(GALLERY, &ExtensionFilter::parse("jpg"));
        let upper = extract(GALLERY, &ExtensionFilter::parse(" JPG "));
        assert_eq!(lower, upper);
        assert_eq!(lower.len(), 2);
    }

    #[test]
    fn test_malformed_tokens_match_nothing() {
        assert!(extract(GALLERY, &ExtensionFilter::parse("")).is_empty());
        assert!(extract(GALLERY, &ExtensionFilter::parse(" , ,")).is_empty());
        assert!(extract(GALLERY, &ExtensionFilter::parse("(*")).is_empty());
    }

    #[test]
    fn test_extension_is_literal() {
        let filter = ExtensionFilter::parse("j.g");
        assert!(!filter.matches("/photo.jpg"));
        assert!(filter.matches("/photo.j.g"));
        assert!(ExtensionFilter::parse(".mp4").matches("/clip.mp4"));
        assert!(!ExtensionFilter::parse("mp4").matches("/clip.mp4.html"));
    }

    #[test]
    fn test_malformed_html_is_tolerated() {
        let broken = r#"<div><a href="/a.zip"><img src='/b.png'</div></p></a>"#;
        assert_eq!(
            extract(broken, &ExtensionFilter::parse("zip")),
            vec!["/a.zip".to_string()]
        );
    }

    #[test]
    fn test_extract_links_deduplicates() {
        let links = extract_links(GALLERY);
        assert_eq!(links.iter().filter(|l| *l == "/p1.jpg").count(), 1);
        assert!(links.contains(&"style.css".to_string()));
    }
}
