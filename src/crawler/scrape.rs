//! Synchronous scrape of a small batch of URLs
//!
//! A scrape runs the same fetch/route/extract pipeline as a crawl task but
//! skips robots.txt, politeness and the frontier, and never retries. Small
//! text payloads are returned inline; everything else is written to the
//! object store and handed back as a presigned URL.

use crate::config::Config;
use crate::crawler::engine::{open_object_store, Components};
use crate::crawler::pipeline::{elapsed_ms, Acquired, FetchPlan, Payload, Pipeline};
use crate::extract::SourceType;
use crate::params::{RequestMode, RequestUsed, ReturnFormat, WaitStep};
use crate::storage::{ObjectStore, PayloadRef, Presigned, Timing};
use crate::{ErrorCode, KumoError, Result, TaskError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Object key scope for scrape payloads
const SCRAPE_SCOPE: &str = "scrape";

/// Per-request scrape options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapeOptions {
    #[serde(default)]
    pub request: RequestMode,

    #[serde(default)]
    pub return_format: ReturnFormat,

    #[serde(default)]
    pub metadata: bool,

    #[serde(default)]
    pub timeout_ms: Option<u64>,

    #[serde(default = "default_max_bytes")]
    pub max_bytes: u64,

    #[serde(default)]
    pub wait_for: Vec<WaitStep>,

    #[serde(default)]
    pub scroll: u64,

    #[serde(default = "default_true")]
    pub include_pdf: bool,
}

fn default_max_bytes() -> u64 {
    15_000_000
}

fn default_true() -> bool {
    true
}

impl Default for ScrapeOptions {
    fn default() -> Self {
        Self {
            request: RequestMode::default(),
            return_format: ReturnFormat::default(),
            metadata: false,
            timeout_ms: None,
            max_bytes: default_max_bytes(),
            wait_for: Vec::new(),
            scroll: 0,
            include_pdf: true,
        }
    }
}

/// A stored payload handed out through a presigned URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkedPayload {
    pub url: String,
    pub expires_at: chrono::DateTime<chrono::Utc>,
    pub size: u64,
    pub sha256: String,
}

impl LinkedPayload {
    fn new(presigned: Presigned, payload: PayloadRef) -> Self {
        Self {
            url: presigned.url,
            expires_at: presigned.expires_at,
            size: payload.size,
            sha256: payload.sha256,
        }
    }
}

/// Outcome of scraping one URL
#[derive(Debug, Clone, Serialize)]
pub struct ScrapeResult {
    pub url: String,
    pub final_url: Option<String>,
    pub status_code: Option<u16>,
    pub content_type: Option<String>,
    pub request_used: Option<RequestUsed>,
    pub source_type: SourceType,
    pub success: bool,
    /// Inline text, when small enough
    pub content: Option<String>,
    pub content_url: Option<LinkedPayload>,
    pub bytes_url: Option<LinkedPayload>,
    pub links: Vec<String>,
    pub images: Vec<String>,
    pub metadata: Option<BTreeMap<String, String>>,
    pub timing: Timing,
    pub error: Option<TaskError>,
}

impl ScrapeResult {
    fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            final_url: None,
            status_code: None,
            content_type: None,
            request_used: None,
            source_type: SourceType::Unknown,
            success: false,
            content: None,
            content_url: None,
            bytes_url: None,
            links: Vec::new(),
            images: Vec::new(),
            metadata: None,
            timing: Timing::default(),
            error: None,
        }
    }
}

/// Scrapes URLs one after another and returns a result per URL
pub struct Scraper {
    config: Arc<Config>,
    pipeline: Arc<Pipeline>,
}

impl Scraper {
    /// Creates a standalone scraper over the configured object store
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: Config) -> Result<Self> {
        let objects = open_object_store(&config);
        Self::with_objects(config, objects)
    }

    /// Creates a standalone scraper over an explicit object store
    pub fn with_objects(config: Config, objects: Arc<dyn ObjectStore>) -> Result<Self> {
        crate::config::validate(&config)?;
        // No renderer queue here, so escalation is never under backpressure
        let components = Components::build(&config, objects, Arc::new(AtomicUsize::new(0)))?;
        Ok(Self::from_parts(Arc::new(config), components.pipeline))
    }

    pub(crate) fn from_parts(config: Arc<Config>, pipeline: Arc<Pipeline>) -> Self {
        Self { config, pipeline }
    }

    /// Scrapes each URL in order
    ///
    /// Per-URL failures are reported in the matching result; only batch
    /// level problems fail the call.
    ///
    /// # Arguments
    ///
    /// * `tenant_id` - Owner of any stored payloads
    /// * `urls` - One to `max-scrape-urls-per-request` URLs
    /// * `options` - Transport and format options shared by the batch
    ///
    /// # Returns
    ///
    /// * `Ok(Vec<ScrapeResult>)` - One result per URL, in input order
    /// * `Err(KumoError)` - Empty or oversized batch, or invalid options
    pub async fn scrape(
        &self,
        tenant_id: &str,
        urls: &[String],
        options: &ScrapeOptions,
    ) -> Result<Vec<ScrapeResult>> {
        let max_urls = self.config.engine.max_scrape_urls_per_request;
        if urls.is_empty() || urls.len() > max_urls {
            return Err(KumoError::InvalidParams(format!(
                "urls must contain between 1 and {} entries, got {}",
                max_urls,
                urls.len()
            )));
        }
        validate_options(options)?;

        let plan = self.fetch_plan(options);
        let mut results = Vec::with_capacity(urls.len());
        for url in urls {
            let result = self.scrape_one(tenant_id, url, &plan).await;
            tracing::info!(
                "Scraped {} (success: {}, {} ms)",
                url,
                result.success,
                result.timing.total
            );
            results.push(result);
        }

        Ok(results)
    }

    async fn scrape_one(&self, tenant_id: &str, url: &str, plan: &FetchPlan) -> ScrapeResult {
        let started = Instant::now();
        let mut result = ScrapeResult::new(url);
        let mut timing = Timing::default();

        let page = match self.pipeline.acquire(url, plan, &mut timing).await {
            Acquired::Page(page) => page,
            Acquired::Throttled(error) | Acquired::Failed(error) => {
                result.error = Some(error);
                result.timing = Timing {
                    total: elapsed_ms(started),
                    ..timing
                };
                return result;
            }
        };

        result.final_url = Some(page.final_url.clone());
        result.status_code = Some(page.status_code);
        result.content_type = Some(page.content_type.clone());
        result.request_used = Some(page.request_used);

        let processed = self.pipeline.process(&page, plan, &mut timing).await;
        result.source_type = processed.source_type;
        result.links = processed.links;
        result.images = processed.images;
        result.metadata = processed.metadata;

        match processed.error {
            Some(error) => result.error = Some(error),
            None => match self.deliver(tenant_id, processed.payload, &mut result).await {
                Ok(()) => result.success = true,
                Err(error) => result.error = Some(error),
            },
        }

        result.timing = Timing {
            total: elapsed_ms(started),
            ..timing
        };
        result
    }

    /// Places the payload inline or behind a presigned URL
    async fn deliver(
        &self,
        tenant_id: &str,
        payload: Payload,
        result: &mut ScrapeResult,
    ) -> std::result::Result<(), TaskError> {
        if let Payload::Text(text) = &payload {
            if text.len() <= self.config.storage.inline_text_max_bytes {
                result.content = Some(text.clone());
                return Ok(());
            }
        }
        if matches!(payload, Payload::None) {
            result.content = Some(String::new());
            return Ok(());
        }

        let (content, bytes) = self
            .pipeline
            .store_payload(tenant_id, SCRAPE_SCOPE, &payload)
            .await?;
        if let Some(content) = content {
            result.content_url = Some(self.link(content)?);
        }
        if let Some(bytes) = bytes {
            result.bytes_url = Some(self.link(bytes)?);
        }
        Ok(())
    }

    fn link(&self, payload: PayloadRef) -> std::result::Result<LinkedPayload, TaskError> {
        let ttl = Duration::from_secs(self.config.storage.presign_ttl_seconds);
        let presigned = self
            .pipeline
            .objects()
            .presign_get(&payload.key, ttl)
            .map_err(|e| TaskError::new(ErrorCode::StorageError, e.to_string()))?;
        Ok(LinkedPayload::new(presigned, payload))
    }

    fn fetch_plan(&self, options: &ScrapeOptions) -> FetchPlan {
        FetchPlan {
            mode: options.request,
            format: options.return_format,
            http_timeout_ms: options
                .timeout_ms
                .unwrap_or(self.config.http.default_timeout_ms),
            render_timeout_ms: options
                .timeout_ms
                .unwrap_or(self.config.renderer.default_timeout_ms),
            max_bytes: options.max_bytes,
            wait_for: options.wait_for.clone(),
            scroll: options.scroll,
            include_pdf: options.include_pdf,
            metadata: options.metadata,
            retry_throttled: false,
        }
    }
}

fn validate_options(options: &ScrapeOptions) -> Result<()> {
    if let Some(timeout) = options.timeout_ms {
        if !(1000..=120_000).contains(&timeout) {
            return Err(KumoError::InvalidParams(format!(
                "timeout_ms must be between 1000 and 120000, got {}",
                timeout
            )));
        }
    }
    if !(1024..=50_000_000).contains(&options.max_bytes) {
        return Err(KumoError::InvalidParams(format!(
            "max_bytes must be between 1024 and 50000000, got {}",
            options.max_bytes
        )));
    }
    if options.scroll > 30_000 {
        return Err(KumoError::InvalidParams(format!(
            "scroll must be between 0 and 30000, got {}",
            options.scroll
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::FsObjectStore;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const ARTICLE: &str = r#"<html><head><title>Field Notes</title></head>
<body><article><h1>Field Notes</h1>
<p>Cirrus clouds form at high altitude where the air is cold enough for ice crystals.
They are thin and wispy and often signal a change in the weather within a day.</p>
<p><a href="/next">Next</a></p></article></body></html>"#;

    fn scraper(dir: &TempDir, inline_max: usize) -> Scraper {
        let mut config = Config::default();
        config.security.allow_private_networks = true;
        config.storage.inline_text_max_bytes = inline_max;
        let objects: Arc<dyn ObjectStore> =
            Arc::new(FsObjectStore::new(dir.path(), "http://objects.test", "secret"));
        Scraper::with_objects(config, objects).unwrap()
    }

    fn http_text() -> ScrapeOptions {
        ScrapeOptions {
            request: RequestMode::Http,
            return_format: ReturnFormat::Text,
            ..ScrapeOptions::default()
        }
    }

    async fn serve_article() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/article"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(ARTICLE, "text/html"))
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn test_rejects_empty_and_oversized_batches() {
        let dir = TempDir::new().unwrap();
        let scraper = scraper(&dir, 1024);

        assert!(matches!(
            scraper.scrape("t1", &[], &ScrapeOptions::default()).await,
            Err(KumoError::InvalidParams(_))
        ));

        let urls: Vec<String> = (0..11).map(|i| format!("https://example.com/{}", i)).collect();
        assert!(matches!(
            scraper.scrape("t1", &urls, &ScrapeOptions::default()).await,
            Err(KumoError::InvalidParams(_))
        ));
    }

    #[tokio::test]
    async fn test_rejects_out_of_range_options() {
        let dir = TempDir::new().unwrap();
        let scraper = scraper(&dir, 1024);
        let options = ScrapeOptions {
            max_bytes: 10,
            ..ScrapeOptions::default()
        };

        let urls = vec!["https://example.com/".to_string()];
        assert!(scraper.scrape("t1", &urls, &options).await.is_err());
    }

    #[tokio::test]
    async fn test_small_text_is_inline() {
        let server = serve_article().await;
        let dir = TempDir::new().unwrap();
        let scraper = scraper(&dir, 64 * 1024);

        let urls = vec![format!("{}/article", server.uri())];
        let results = scraper.scrape("t1", &urls, &http_text()).await.unwrap();

        let result = &results[0];
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.status_code, Some(200));
        assert_eq!(result.request_used, Some(RequestUsed::Http));
        assert_eq!(result.source_type, SourceType::Html);
        assert!(result.content.as_deref().unwrap().contains("Cirrus"));
        assert!(result.content_url.is_none());
        assert_eq!(result.links, vec![format!("{}/next", server.uri())]);
    }

    #[tokio::test]
    async fn test_large_text_is_presigned() {
        let server = serve_article().await;
        let dir = TempDir::new().unwrap();
        let scraper = scraper(&dir, 16);

        let urls = vec![format!("{}/article", server.uri())];
        let results = scraper.scrape("t1", &urls, &http_text()).await.unwrap();

        let result = &results[0];
        assert!(result.success);
        assert!(result.content.is_none());
        let linked = result.content_url.as_ref().unwrap();
        assert!(linked.url.starts_with("http://objects.test/t1/scrape/content/"));
        assert!(dir
            .path()
            .join(format!("t1/scrape/content/{}.txt", linked.sha256))
            .exists());
    }

    #[tokio::test]
    async fn test_bytes_format_stores_raw_body() {
        let server = serve_article().await;
        let dir = TempDir::new().unwrap();
        let scraper = scraper(&dir, 64 * 1024);
        let options = ScrapeOptions {
            request: RequestMode::Http,
            return_format: ReturnFormat::Bytes,
            ..ScrapeOptions::default()
        };

        let urls = vec![format!("{}/article", server.uri())];
        let results = scraper.scrape("t1", &urls, &options).await.unwrap();

        let linked = results[0].bytes_url.as_ref().unwrap();
        assert_eq!(linked.size, ARTICLE.len() as u64);
        assert!(linked.url.contains("/t1/scrape/bytes/"));
    }

    #[tokio::test]
    async fn test_http_failure_is_reported_per_url() {
        let server = serve_article().await;
        let dir = TempDir::new().unwrap();
        let scraper = scraper(&dir, 64 * 1024);

        let urls = vec![
            format!("{}/missing", server.uri()),
            format!("{}/article", server.uri()),
        ];
        let results = scraper.scrape("t1", &urls, &http_text()).await.unwrap();

        assert_eq!(results.len(), 2);
        assert!(!results[0].success);
        assert_eq!(results[0].error.as_ref().unwrap().code, ErrorCode::HttpError);
        assert!(results[1].success);
    }
}
