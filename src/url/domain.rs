use crate::{UrlError, UrlResult};
use url::Url;

/// Extracts the lowercase host from a URL string
///
/// # Arguments
///
/// * `url` - The URL to extract the host from
///
/// # Returns
///
/// * `Some(String)` - The lowercase host
/// * `None` - If the URL cannot be parsed or has no host
///
/// # Examples
///
/// ```
/// use kumo_crawl::url::extract_host;
///
/// assert_eq!(extract_host("https://EXAMPLE.com/a"), Some("example.com".to_string()));
/// assert_eq!(extract_host("not a url"), None);
/// ```
pub fn extract_host(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
}

/// Returns true if `url` is on exactly `host` (no subdomain widening)
pub fn same_host(url: &str, host: &str) -> bool {
    extract_host(url).is_some_and(|h| h == host)
}

/// Parses a URL and requires an http(s) scheme and a host
pub fn parse_http_url(url: &str) -> UrlResult<Url> {
    let parsed = Url::parse(url).map_err(|e| UrlError::Parse(e.to_string()))?;

    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(UrlError::InvalidScheme(parsed.scheme().to_string()));
    }

    if parsed.host_str().is_none() {
        return Err(UrlError::MissingHost);
    }

    Ok(parsed)
}

/// Derives `scheme://host[:port]/robots.txt` for a page URL
///
/// Returns the robots URL together with the authority it is cached under.
pub fn robots_location(url: &Url) -> Option<(String, String)> {
    let host = url.host_str()?;
    let authority = match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    };
    let location = format!("{}://{}/robots.txt", url.scheme(), authority);
    Some((location, format!("{}://{}", url.scheme(), authority)))
}
