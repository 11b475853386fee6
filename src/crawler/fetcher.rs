//! HTTP fetcher implementation
//!
//! This module handles all plain HTTP requests for the crawler, including:
//! - Building HTTP clients with the fixed descriptive header set
//! - Manual redirect following with SSRF re-validation on every hop
//! - Streaming bodies into a bounded temp file
//! - Error classification

use crate::config::HttpConfig;
use crate::crawler::{SsrfError, SsrfGuard};
use crate::ErrorCode;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{redirect::Policy, Client, StatusCode};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

/// Errors produced by [`HttpFetcher::fetch`]
#[derive(Debug, Error)]
pub enum FetchError {
    #[error(transparent)]
    Blocked(#[from] SsrfError),

    #[error("{status}: {reason}")]
    Status { status: u16, reason: String },

    #[error("Response exceeded {limit} bytes")]
    MaxBytesExceeded { limit: u64 },

    #[error("Too many redirects from {url}")]
    RedirectLimit { url: String },

    #[error("Redirect loop detected at {url}")]
    RedirectLoop { url: String },

    #[error("Request timeout for {url}")]
    Timeout { url: String },

    #[error("Network error for {url}: {message}")]
    Network { url: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl FetchError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Blocked(e) => e.code(),
            Self::MaxBytesExceeded { .. } => ErrorCode::MaxBytesExceeded,
            _ => ErrorCode::HttpError,
        }
    }

    /// HTTP status, when the failure was a non-2xx response
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// 429 and 503 are worth retrying after a backoff
    pub fn is_retryable(&self) -> bool {
        matches!(self.status(), Some(429) | Some(503))
    }
}

/// Fetched body held in a temp file that is deleted on drop
#[derive(Debug)]
pub struct FetchedBody {
    file: NamedTempFile,
    len: u64,
}

impl FetchedBody {
    /// Number of bytes written
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Reads the whole body back into memory
    pub async fn read(&self) -> std::io::Result<Vec<u8>> {
        tokio::fs::read(self.file.path()).await
    }
}

/// Successful fetch
#[derive(Debug)]
pub struct FetchOutcome {
    /// HTTP status code of the final response
    pub status_code: u16,
    /// Content-Type header value (empty if absent)
    pub content_type: String,
    /// Final URL after redirects
    pub final_url: String,
    /// Handle to the downloaded bytes
    pub body: FetchedBody,
}

/// Builds an HTTP client with the crawler's fixed header set
///
/// Redirects are disabled on the client so every hop can be re-validated.
///
/// # Arguments
///
/// * `config` - The HTTP transport configuration
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client
pub fn build_http_client(config: &HttpConfig) -> Result<Client, reqwest::Error> {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::ACCEPT,
        HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
    );
    headers.insert(
        header::ACCEPT_LANGUAGE,
        HeaderValue::from_static("en-US,en;q=0.9"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));

    Client::builder()
        .user_agent(config.user_agent.clone())
        .default_headers(headers)
        .connect_timeout(Duration::from_secs(config.connect_timeout_seconds))
        .redirect(Policy::none()) // Handle redirects manually
        .gzip(true)
        .brotli(true)
        .build()
}

/// Plain HTTP fetcher with SSRF checks and a byte cap
pub struct HttpFetcher {
    client: Client,
    guard: Arc<SsrfGuard>,
    max_redirects: usize,
}

impl HttpFetcher {
    pub fn new(client: Client, guard: Arc<SsrfGuard>, max_redirects: usize) -> Self {
        Self {
            client,
            guard,
            max_redirects,
        }
    }

    /// Fetches a URL into a bounded temp file
    ///
    /// # Request Flow
    ///
    /// 1. SSRF-validate the URL (fails with `SSRF_BLOCKED` / `INVALID_URL`)
    /// 2. Send a streaming GET
    /// 3. On 301/302/303/307/308, resolve `Location`, re-validate, repeat
    ///    (loop or more than `max_redirects` hops fails)
    /// 4. Non-2xx fails with the status and reason
    /// 5. Stream the body, aborting as soon as it exceeds `max_bytes`
    ///
    /// # Arguments
    ///
    /// * `url` - The URL to fetch
    /// * `timeout_ms` - Whole-request timeout per hop, body included
    /// * `max_bytes` - Largest body accepted
    pub async fn fetch(
        &self,
        url: &str,
        timeout_ms: u64,
        max_bytes: u64,
    ) -> Result<FetchOutcome, FetchError> {
        let timeout = Duration::from_millis(timeout_ms);
        let mut current = url.to_string();
        let mut seen: HashSet<String> = HashSet::new();

        for _ in 0..=self.max_redirects {
            let target = self.guard.validate(&current).await?;
            if !seen.insert(target.to_string()) {
                return Err(FetchError::RedirectLoop { url: current });
            }

            let response = self
                .client
                .get(target.clone())
                .timeout(timeout)
                .send()
                .await
                .map_err(|e| classify_reqwest_error(&current, e))?;

            let status = response.status();
            if is_followable_redirect(status) {
                let location = response
                    .headers()
                    .get(header::LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .map(|v| target.join(v));

                match location {
                    Some(Ok(next)) => {
                        tracing::debug!("Redirect {} -> {}", current, next);
                        current = next.to_string();
                        continue;
                    }
                    _ => {
                        return Err(FetchError::Status {
                            status: status.as_u16(),
                            reason: "redirect without a usable Location".to_string(),
                        })
                    }
                }
            }

            if !status.is_success() {
                return Err(FetchError::Status {
                    status: status.as_u16(),
                    reason: status.canonical_reason().unwrap_or("Unknown").to_string(),
                });
            }

            if response.content_length().is_some_and(|len| len > max_bytes) {
                return Err(FetchError::MaxBytesExceeded { limit: max_bytes });
            }

            let content_type = response
                .headers()
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string();
            let final_url = response.url().to_string();
            let status_code = status.as_u16();

            let body = stream_to_file(&current, response, max_bytes).await?;

            return Ok(FetchOutcome {
                status_code,
                content_type,
                final_url,
                body,
            });
        }

        Err(FetchError::RedirectLimit {
            url: url.to_string(),
        })
    }
}

/// Streams the response body into a temp file, enforcing the byte cap
///
/// The temp file is removed as soon as it is dropped, so an aborted
/// download leaves nothing behind.
async fn stream_to_file(
    url: &str,
    mut response: reqwest::Response,
    max_bytes: u64,
) -> Result<FetchedBody, FetchError> {
    let file = NamedTempFile::new()?;
    let mut writer = tokio::fs::File::from_std(file.as_file().try_clone()?);
    let mut written: u64 = 0;

    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| classify_reqwest_error(url, e))?
    {
        written += chunk.len() as u64;
        if written > max_bytes {
            return Err(FetchError::MaxBytesExceeded { limit: max_bytes });
        }
        writer.write_all(&chunk).await?;
    }

    writer.flush().await?;

    Ok(FetchedBody { file, len: written })
}

fn is_followable_redirect(status: StatusCode) -> bool {
    matches!(status.as_u16(), 301 | 302 | 303 | 307 | 308)
}

fn classify_reqwest_error(url: &str, e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout {
            url: url.to_string(),
        }
    } else if e.is_connect() {
        FetchError::Network {
            url: url.to_string(),
            message: "Connection refused".to_string(),
        }
    } else {
        FetchError::Network {
            url: url.to_string(),
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::state::Coordination;
    use wiremock::matchers::{header as header_matcher, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fetcher(allow_private: bool) -> HttpFetcher {
        let config = Config::default();
        let coordination = Arc::new(Coordination::new(&config));
        let guard = Arc::new(SsrfGuard::new(coordination, allow_private));
        let client = build_http_client(&config.http).unwrap();
        HttpFetcher::new(client, guard, config.http.max_redirects)
    }

    #[test]
    fn test_build_http_client() {
        let config = HttpConfig::default();
        assert!(build_http_client(&config).is_ok());
    }

    #[tokio::test]
    async fn test_fetch_success_streams_to_file() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/page"))
            .and(header_matcher("cache-control", "no-cache"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(
                    "<html><body>hello</body></html>",
                    "text/html; charset=utf-8",
                ),
            )
            .mount(&server)
            .await;

        let outcome = fetcher(true)
            .fetch(&format!("{}/page", server.uri()), 5000, 10_000)
            .await
            .unwrap();

        assert_eq!(outcome.status_code, 200);
        assert!(outcome.content_type.starts_with("text/html"));
        assert_eq!(outcome.body.len(), 31);
        let bytes = outcome.body.read().await.unwrap();
        assert_eq!(bytes, b"<html><body>hello</body></html>");
    }

    #[tokio::test]
    async fn test_max_bytes_exceeded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/big"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![b'x'; 2000]))
            .mount(&server)
            .await;

        let err = fetcher(true)
            .fetch(&format!("{}/big", server.uri()), 5000, 1000)
            .await
            .unwrap_err();

        assert_eq!(err.code(), ErrorCode::MaxBytesExceeded);
    }

    #[tokio::test]
    async fn test_http_error_carries_status_and_reason() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = fetcher(true)
            .fetch(&format!("{}/missing", server.uri()), 5000, 1000)
            .await
            .unwrap_err();

        assert_eq!(err.code(), ErrorCode::HttpError);
        assert_eq!(err.status(), Some(404));
        assert_eq!(err.to_string(), "404: Not Found");
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_503_is_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = fetcher(true)
            .fetch(&server.uri(), 5000, 1000)
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_follows_redirects() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/old"))
            .respond_with(ResponseTemplate::new(301).insert_header("location", "/new"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/new"))
            .respond_with(ResponseTemplate::new(200).set_body_string("moved"))
            .mount(&server)
            .await;

        let outcome = fetcher(true)
            .fetch(&format!("{}/old", server.uri()), 5000, 1000)
            .await
            .unwrap();
        assert_eq!(outcome.final_url, format!("{}/new", server.uri()));
    }

    #[tokio::test]
    async fn test_redirect_loop_detected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/a"))
            .respond_with(ResponseTemplate::new(302).insert_header("location", "/b"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/b"))
            .respond_with(ResponseTemplate::new(302).insert_header("location", "/a"))
            .mount(&server)
            .await;

        let err = fetcher(true)
            .fetch(&format!("{}/a", server.uri()), 5000, 1000)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::RedirectLoop { .. }));
    }

    #[tokio::test]
    async fn test_private_address_blocked_before_request() {
        let err = fetcher(false)
            .fetch("http://127.0.0.1:1/", 1000, 1000)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::SsrfBlocked);
    }
}
