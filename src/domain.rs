//! Turns tab URLs into the hostname used as the tracking key.

use std::sync::Arc;

use url::Url;

/// Schemes that belong to the browser itself. Time spent on them is never tracked.
const INTERNAL_SCHEMES: [&str; 7] = [
    "chrome",
    "chrome-extension",
    "edge",
    "about",
    "moz-extension",
    "view-source",
    "devtools",
];

pub fn is_internal_page(url: &str) -> bool {
    let Some((scheme, _)) = url.trim_start().split_once(':') else {
        return false;
    };
    INTERNAL_SCHEMES
        .iter()
        .any(|internal| scheme.eq_ignore_ascii_case(internal))
}

/// Returns the hostname for `url`, or `None` if the page is not trackable. Internal pages,
/// unparseable strings and URLs without a host (`data:`, `file:///...`) are not trackable.
pub fn extract_domain(url: &str) -> Option<Arc<str>> {
    if is_internal_page(url) {
        return None;
    }
    let parsed = Url::parse(url.trim()).ok()?;
    match parsed.host_str() {
        Some(host) if !host.is_empty() => Some(host.into()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::{extract_domain, is_internal_page};

    #[test]
    fn test_regular_pages() {
        assert_eq!(
            extract_domain("https://news.example.com/a/b?c=d").as_deref(),
            Some("news.example.com")
        );
        assert_eq!(
            extract_domain("http://EXAMPLE.org:8080").as_deref(),
            Some("example.org")
        );
        assert_eq!(
            extract_domain("  https://example.com/  ").as_deref(),
            Some("example.com")
        );
    }

    #[test]
    fn test_internal_pages() {
        assert!(is_internal_page("chrome://settings"));
        assert!(is_internal_page("CHROME-EXTENSION://abc/popup.html"));
        assert!(is_internal_page("about:blank"));
        assert!(!is_internal_page("https://chrome.google.com"));

        assert_eq!(extract_domain("chrome://newtab"), None);
        assert_eq!(extract_domain("edge://settings"), None);
        assert_eq!(extract_domain("about:blank"), None);
        assert_eq!(extract_domain("moz-extension://id/page.html"), None);
    }

    #[test]
    fn test_untrackable_urls() {
        assert_eq!(extract_domain(""), None);
        assert_eq!(extract_domain("not a url"), None);
        assert_eq!(extract_domain("data:text/plain,hello"), None);
        assert_eq!(extract_domain("file:///home/user/index.html"), None);
    }
}
