//! URL resolution against a page origin
//!
//! Relative links are resolved against the host root of the origin, not the
//! origin's own path: `resolve("http://a.com/x/y", "z.jpg")` is
//! `http://a.com/z.jpg`.

use url::{Position, Url};

/// Turn a link found on `origin` into an absolute URL
pub fn resolve(origin: &str, path: &str) -> String {
    if is_absolute(path) {
        return path.to_string();
    }

    let base = match Url::parse(origin) {
        Ok(base) => base,
        Err(_) => return path.to_string(),
    };

    if path.starts_with("//") {
        return format!("{}:{}", base.scheme(), path);
    }

    // scheme://user@host:port, i.e. everything up to the path
    let root = &base[..Position::BeforePath];
    if path.starts_with('/') {
        format!("{}{}", root, path)
    } else {
        format!("{}/{}", root, path)
    }
}

fn is_absolute(path: &str) -> bool {
    let lower = path.get(..8).unwrap_or(path).to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Whether `text` looks like a URL the bot can download from
pub fn is_downloadable_url(text: &str) -> bool {
    Url::parse(text.trim())
        .map(|u| matches!(u.scheme(), "http" | "https") && u.host_str().is_some())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_resolves_against_host_root() {
        assert_eq!(resolve("http://a.com/x/y", "z.jpg"), "http://a.com/z.jpg");
        assert_eq!(resolve("http://a.com", "/z.jpg"), "http://a.com/z.jpg");
        assert_eq!(
            resolve("https://a.com:8443/gallery/", "img/z.jpg"),
            "https://a.com:8443/img/z.jpg"
        );
    }

    #[test]
    fn test_absolute_passthrough_is_idempotent() {
        let origin = "https://example.com/gallery";
        let absolute = "https://cdn.example.net/v1.mp4";
        assert_eq!(resolve(origin, absolute), absolute);

        let once = resolve(origin, "/p1.jpg");
        assert_eq!(resolve(origin, &once), once);
    }

    #[test]
    fn test_scheme_relative() {
        assert_eq!(
            resolve("https://a.com/page", "//cdn.a.com/z.jpg"),
            "https://cdn.a.com/z.jpg"
        );
    }

    #[test]
    fn test_unparseable_origin_keeps_path() {
        assert_eq!(resolve("not a url", "z.jpg"), "z.jpg");
    }

    #[test]
    fn test_downloadable_url() {
        assert!(is_downloadable_url("https://example.com/gallery"));
        assert!(is_downloadable_url("  http://example.com  "));
        assert!(!is_downloadable_url("jpg,mp4"));
        assert!(!is_downloadable_url("ftp://example.com/file"));
        assert!(!is_downloadable_url("example.com"));
    }
}
