//! Canonical scheme enforcement for raw site URLs.

use thiserror::Error;

const SECURE_SCHEME: &str = "https://";
const INSECURE_SCHEME: &str = "http://";

/// A site record whose URL cannot be crawled.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InputError {
    /// The site record has no textual URL.
    #[error("site {site_id} has no url")]
    MissingUrl { site_id: String },

    /// The URL is an empty string.
    #[error("url is empty")]
    EmptyUrl,
}

/// Rewrite `url` so it uses the secure scheme.
///
/// `http://` is upgraded in place, a URL without a recognized scheme gets
/// `https://` prepended, and anything already secure is returned as is.
pub fn normalize_url(url: &str) -> Result<String, InputError> {
    if url.is_empty() {
        return Err(InputError::EmptyUrl);
    }

    if let Some(rest) = url.strip_prefix(INSECURE_SCHEME) {
        return Ok(format!("{}{}", SECURE_SCHEME, rest));
    }

    if url.starts_with(SECURE_SCHEME) {
        return Ok(url.to_string());
    }

    Ok(format!("{}{}", SECURE_SCHEME, url))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_host_gets_secure_scheme() {
        assert_eq!(
            normalize_url("example.com").unwrap(),
            "https://example.com"
        );
    }

    #[test]
    fn test_insecure_scheme_is_upgraded() {
        assert_eq!(
            normalize_url("http://example.com").unwrap(),
            "https://example.com"
        );
    }

    #[test]
    fn test_secure_url_unchanged() {
        assert_eq!(
            normalize_url("https://example.com").unwrap(),
            "https://example.com"
        );
    }

    #[test]
    fn test_empty_url_is_input_error() {
        assert_eq!(normalize_url(""), Err(InputError::EmptyUrl));
    }

    #[test]
    fn test_upgrade_preserves_path_and_query() {
        assert_eq!(
            normalize_url("http://comune.example.it/amministrazione?x=http://a").unwrap(),
            "https://comune.example.it/amministrazione?x=http://a"
        );
    }

    #[test]
    fn test_only_leading_scheme_is_rewritten() {
        // The insecure scheme appearing later in the string is not a prefix.
        assert_eq!(
            normalize_url("example.com/redirect?to=http://other").unwrap(),
            "https://example.com/redirect?to=http://other"
        );
    }

    #[test]
    fn test_input_error_display() {
        let err = InputError::MissingUrl {
            site_id: "c_a001".to_string(),
        };
        assert_eq!(err.to_string(), "site c_a001 has no url");
    }
}
