pub mod cdp;
pub mod cdp_document;
pub mod document;
pub mod keys;
pub mod manager;

pub use document::{DocumentHandle, ElementBox, PageInfo, TabInfo};
pub use manager::{CdpSessionManager, Session, SessionManager, TargetInfo};

const UNSUPPORTED_SCHEMES: &[&str] = &[
    "chrome://",
    "chrome-extension://",
    "chrome-search://",
    "about:",
    "devtools://",
    "edge://",
    "view-source:",
];

/// Whether the agent can operate on a document at `url`. Browser-internal
/// pages reject automation and are refused up front.
pub fn is_supported_url(url: &str) -> bool {
    let url = url.trim();
    if url.is_empty() {
        return false;
    }
    let lower = url.to_ascii_lowercase();
    !UNSUPPORTED_SCHEMES.iter().any(|s| lower.starts_with(s))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regular_pages_are_supported() {
        assert!(is_supported_url("https://example.com/search?q=cats"));
        assert!(is_supported_url("http://localhost:3000"));
        assert!(is_supported_url("file:///tmp/page.html"));
    }

    #[test]
    fn browser_internal_pages_are_not() {
        for url in [
            "",
            "   ",
            "chrome://settings",
            "chrome-extension://abc/sidebar.html",
            "about:blank",
            "devtools://devtools/bundled/inspector.html",
            "edge://newtab",
            "view-source:https://example.com",
            "CHROME://version",
        ] {
            assert!(!is_supported_url(url), "{url} should be unsupported");
        }
    }
}
