//! Fetch, route and extract one URL
//!
//! Shared by crawl tasks and synchronous scrapes. The pipeline owns the
//! transport decision (plain HTTP, renderer or HTTP with escalation) and
//! turns whatever body comes back into a payload. Persisting the payload is
//! left to the caller.

use crate::crawler::{
    FetchError, FetchedBody, HttpFetcher, RenderOptions, RendererClient, SmartRouter,
};
use crate::extract::{classify, pdf_text, plan, ExtractionPlan, Extractor, SourceType};
use crate::params::{RequestMode, RequestUsed, ReturnFormat, WaitStep};
use crate::storage::{bytes_key, content_sha256, text_key, ObjectStore, PayloadRef, Timing};
use crate::{ErrorCode, TaskError};
use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;
use std::time::Instant;
use tempfile::NamedTempFile;

/// How one URL should be acquired and shaped
#[derive(Debug, Clone)]
pub struct FetchPlan {
    pub mode: RequestMode,
    pub format: ReturnFormat,
    pub http_timeout_ms: u64,
    pub render_timeout_ms: u64,
    pub max_bytes: u64,
    pub wait_for: Vec<WaitStep>,
    pub scroll: u64,
    pub include_pdf: bool,
    pub metadata: bool,
    /// Report 429/503 as [`Acquired::Throttled`] instead of escalating them
    pub retry_throttled: bool,
}

/// A body obtained over HTTP or from the renderer
#[derive(Debug)]
pub struct Page {
    pub request_used: RequestUsed,
    pub status_code: u16,
    pub content_type: String,
    pub final_url: String,
    pub bytes: Vec<u8>,
    /// On-disk copy of an HTTP body, reused for PDF parsing
    pub file: Option<FetchedBody>,
}

/// Result of the transport stage
#[derive(Debug)]
pub enum Acquired {
    Page(Page),
    /// 429 or 503 from plain HTTP
    Throttled(TaskError),
    Failed(TaskError),
}

/// What extraction produced for a page
#[derive(Debug, Default)]
pub enum Payload {
    #[default]
    None,
    Text(String),
    Bytes {
        data: Vec<u8>,
        content_type: String,
    },
}

/// Output of the extraction stage
#[derive(Debug)]
pub struct Processed {
    pub source_type: SourceType,
    pub payload: Payload,
    pub links: Vec<String>,
    pub images: Vec<String>,
    pub metadata: Option<BTreeMap<String, String>>,
    pub error: Option<TaskError>,
}

impl Processed {
    fn failed(source_type: SourceType, error: TaskError) -> Self {
        Self {
            source_type,
            payload: Payload::None,
            links: Vec::new(),
            images: Vec::new(),
            metadata: None,
            error: Some(error),
        }
    }

    fn payload(source_type: SourceType, payload: Payload) -> Self {
        Self {
            source_type,
            payload,
            links: Vec::new(),
            images: Vec::new(),
            metadata: None,
            error: None,
        }
    }
}

/// Transport and extraction components shared by every worker
pub struct Pipeline {
    fetcher: HttpFetcher,
    renderer: RendererClient,
    router: SmartRouter,
    objects: Arc<dyn ObjectStore>,
}

impl Pipeline {
    pub fn new(
        fetcher: HttpFetcher,
        renderer: RendererClient,
        router: SmartRouter,
        objects: Arc<dyn ObjectStore>,
    ) -> Self {
        Self {
            fetcher,
            renderer,
            router,
            objects,
        }
    }

    pub fn router(&self) -> &SmartRouter {
        &self.router
    }

    pub fn objects(&self) -> &Arc<dyn ObjectStore> {
        &self.objects
    }

    // ===== Transport =====

    /// Obtains a body for `url` according to the plan's request mode
    ///
    /// # Routing
    ///
    /// - `http`: plain HTTP only
    /// - `chrome`: renderer only
    /// - `smart`: HTTP first; escalate to the renderer when an HTML body
    ///   looks client-rendered, or when HTTP failed for a reason the
    ///   renderer might get around. SSRF refusals, invalid URLs and the byte
    ///   cap never escalate. Escalation is suppressed under renderer
    ///   backpressure.
    pub async fn acquire(&self, url: &str, plan: &FetchPlan, timing: &mut Timing) -> Acquired {
        if plan.mode == RequestMode::Chrome {
            return self.render(url, plan, timing).await;
        }

        let started = Instant::now();
        let fetched = self
            .fetcher
            .fetch(url, plan.http_timeout_ms, plan.max_bytes)
            .await;
        timing.fetch = Some(elapsed_ms(started));

        let outcome = match fetched {
            Ok(outcome) => outcome,
            Err(e) => return self.on_http_failure(url, plan, timing, e).await,
        };

        let bytes = match outcome.body.read().await {
            Ok(bytes) => bytes,
            Err(e) => {
                return Acquired::Failed(TaskError::new(
                    ErrorCode::InternalError,
                    format!("Failed to read fetched body: {}", e),
                ))
            }
        };

        if plan.mode == RequestMode::Smart
            && SmartRouter::is_renderable_content_type(&outcome.content_type)
            && SmartRouter::should_render(&String::from_utf8_lossy(&bytes))
        {
            if self.router.chrome_backpressure() {
                tracing::debug!("Renderer backpressure, keeping HTTP body for {}", url);
            } else {
                tracing::debug!("Escalating {} to the renderer", url);
                return self.render(url, plan, timing).await;
            }
        }

        Acquired::Page(Page {
            request_used: RequestUsed::Http,
            status_code: outcome.status_code,
            content_type: outcome.content_type,
            final_url: outcome.final_url,
            bytes,
            file: Some(outcome.body),
        })
    }

    async fn on_http_failure(
        &self,
        url: &str,
        plan: &FetchPlan,
        timing: &mut Timing,
        error: FetchError,
    ) -> Acquired {
        let task_error = TaskError::new(error.code(), error.to_string());

        if plan.retry_throttled && error.is_retryable() {
            return Acquired::Throttled(task_error);
        }

        let escalates = plan.mode == RequestMode::Smart
            && error.code() == ErrorCode::HttpError
            && !self.router.chrome_backpressure();

        if escalates {
            tracing::debug!("HTTP failed for {} ({}), trying the renderer", url, error);
            return self.render(url, plan, timing).await;
        }

        Acquired::Failed(task_error)
    }

    async fn render(&self, url: &str, plan: &FetchPlan, timing: &mut Timing) -> Acquired {
        let options = RenderOptions {
            wait_for: plan.wait_for.clone(),
            scroll: plan.scroll,
            timeout_ms: plan.render_timeout_ms,
        };

        let started = Instant::now();
        let rendered = self.renderer.render(url, &options).await;
        timing.render = Some(elapsed_ms(started));

        match rendered {
            Ok(rendered) => Acquired::Page(Page {
                request_used: RequestUsed::Chrome,
                status_code: rendered.status_code.unwrap_or(200),
                content_type: rendered
                    .content_type
                    .unwrap_or_else(|| "text/html".to_string()),
                final_url: rendered.final_url.unwrap_or_else(|| url.to_string()),
                bytes: rendered.html.into_bytes(),
                file: None,
            }),
            Err(e) => Acquired::Failed(TaskError::new(e.code(), e.to_string())),
        }
    }

    // ===== Extraction =====

    /// Classifies a page and extracts the payload the plan asks for
    pub async fn process(&self, page: &Page, plan: &FetchPlan, timing: &mut Timing) -> Processed {
        let started = Instant::now();
        let processed = self.extract(page, plan).await;
        timing.extract = Some(elapsed_ms(started));
        processed
    }

    async fn extract(&self, page: &Page, fetch_plan: &FetchPlan) -> Processed {
        let source_type = classify(&page.content_type);

        match plan(source_type, fetch_plan.format) {
            ExtractionPlan::Html => {
                let html = String::from_utf8_lossy(&page.bytes).into_owned();
                let url = page.final_url.clone();
                let format = fetch_plan.format;

                let extracted = tokio::task::spawn_blocking(move || {
                    Extractor::extract(&html, &url, format)
                })
                .await;

                match extracted {
                    Ok(extracted) => Processed {
                        source_type,
                        payload: Payload::Text(extracted.content),
                        links: extracted.links,
                        images: extracted.images,
                        metadata: fetch_plan.metadata.then_some(extracted.metadata),
                        error: None,
                    },
                    Err(e) => Processed::failed(
                        source_type,
                        TaskError::new(ErrorCode::InternalError, format!("Extraction failed: {}", e)),
                    ),
                }
            }
            ExtractionPlan::PdfText => {
                if !fetch_plan.include_pdf {
                    return Processed::payload(source_type, Payload::None);
                }

                match self.extract_pdf(page).await {
                    Ok(text) => Processed::payload(source_type, Payload::Text(text)),
                    Err(error) => Processed::failed(source_type, error),
                }
            }
            ExtractionPlan::Passthrough => Processed::payload(
                source_type,
                Payload::Text(String::from_utf8_lossy(&page.bytes).into_owned()),
            ),
            ExtractionPlan::StoreBytes => Processed::payload(
                source_type,
                Payload::Bytes {
                    data: page.bytes.clone(),
                    content_type: page.content_type.clone(),
                },
            ),
            ExtractionPlan::Empty => Processed::payload(source_type, Payload::None),
            ExtractionPlan::Unsupported => Processed::failed(
                source_type,
                TaskError::new(
                    ErrorCode::UnsupportedFormat,
                    format!(
                        "{} content requires return_format=bytes, got {}",
                        source_type,
                        fetch_plan.format.as_str()
                    ),
                ),
            ),
        }
    }

    async fn extract_pdf(&self, page: &Page) -> Result<String, TaskError> {
        if let Some(file) = &page.file {
            return pdf_text(file.path())
                .await
                .map_err(|e| TaskError::new(e.code(), e.to_string()));
        }

        // Rendered bodies have no on-disk copy
        let spill = || -> std::io::Result<NamedTempFile> {
            let mut file = NamedTempFile::new()?;
            file.write_all(&page.bytes)?;
            file.flush()?;
            Ok(file)
        };
        let file = spill().map_err(|e| TaskError::new(ErrorCode::InternalError, e.to_string()))?;

        pdf_text(file.path())
            .await
            .map_err(|e| TaskError::new(e.code(), e.to_string()))
    }

    // ===== Payload Storage =====

    /// Writes a payload to the object store under content-addressed keys
    ///
    /// # Arguments
    ///
    /// * `tenant_id` - First key segment
    /// * `scope` - Second key segment (the job id, or `scrape`)
    /// * `payload` - Extraction output
    ///
    /// # Returns
    ///
    /// `(content, bytes)` references; at most one is set
    pub async fn store_payload(
        &self,
        tenant_id: &str,
        scope: &str,
        payload: &Payload,
    ) -> Result<(Option<PayloadRef>, Option<PayloadRef>), TaskError> {
        match payload {
            Payload::None => Ok((None, None)),
            Payload::Text(text) => {
                let sha256 = content_sha256(text.as_bytes());
                let key = text_key(tenant_id, scope, &sha256);
                self.put(&key, text.as_bytes(), "text/plain").await?;
                Ok((
                    Some(PayloadRef {
                        key,
                        size: text.len() as u64,
                        sha256,
                    }),
                    None,
                ))
            }
            Payload::Bytes { data, content_type } => {
                let sha256 = content_sha256(data);
                let key = bytes_key(tenant_id, scope, &sha256, content_type);
                self.put(&key, data, content_type).await?;
                Ok((
                    None,
                    Some(PayloadRef {
                        key,
                        size: data.len() as u64,
                        sha256,
                    }),
                ))
            }
        }
    }

    async fn put(&self, key: &str, data: &[u8], content_type: &str) -> Result<(), TaskError> {
        self.objects
            .put(key, data, content_type)
            .await
            .map_err(|e| TaskError::new(ErrorCode::StorageError, e.to_string()))
    }
}

pub(crate) fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
