use sha2::{Digest, Sha256};
use url::Url;

/// Canonicalizes a URL for frontier and result identity
///
/// # Normalization Steps
///
/// 1. Parse the URL; malformed input is returned unchanged
/// 2. Lowercase the scheme and host
/// 3. Empty path becomes `/`
/// 4. Keep the query string as-is
/// 5. Remove the fragment
///
/// Normalization never fails and is idempotent.
///
/// # Examples
///
/// ```
/// use kumo_crawl::url::normalize;
///
/// assert_eq!(normalize("HTTPS://EXAMPLE.COM"), "https://example.com/");
/// assert_eq!(normalize("https://example.com/a?b=1#top"), "https://example.com/a?b=1");
/// assert_eq!(normalize("not a url"), "not a url");
/// ```
pub fn normalize(url: &str) -> String {
    let mut parsed = match Url::parse(url.trim()) {
        Ok(u) => u,
        Err(_) => return url.to_string(),
    };

    // Opaque URLs (mailto:, data:) have nothing to canonicalize
    let host = match parsed.host_str() {
        Some(h) => h.to_lowercase(),
        None => return url.to_string(),
    };

    if parsed.set_host(Some(&host)).is_err() {
        return url.to_string();
    }

    if parsed.path().is_empty() {
        parsed.set_path("/");
    }

    parsed.set_fragment(None);
    parsed.to_string()
}

/// Resolves a possibly relative reference against a base URL
///
/// Falls back to the reference itself when either side cannot be parsed.
pub fn resolve(base: &str, relative: &str) -> String {
    Url::parse(base)
        .and_then(|b| b.join(relative.trim()))
        .map(|u| u.to_string())
        .unwrap_or_else(|_| relative.to_string())
}

/// Hex SHA-256 of a (normalized) URL, used as its identity key
pub fn url_hash(url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    hex::encode(hasher.finalize())
}
