//! Crawler module for fetching, routing and orchestrating crawl work
//!
//! This module contains the core crawling logic, including:
//! - SSRF validation of every outbound URL and redirect hop
//! - Plain HTTP fetching into bounded temp files
//! - The headless renderer client and the smart HTTP/renderer router
//! - Per-host politeness
//! - The per-task crawl algorithm, work queues and worker pools
//! - The engine that owns job lifecycle, and the synchronous scraper

mod engine;
mod fetcher;
mod pipeline;
mod politeness;
mod renderer;
mod router;
mod scheduler;
mod scrape;
mod ssrf;
mod task;

pub use engine::{Engine, JobSnapshot};
pub use fetcher::{build_http_client, FetchError, FetchOutcome, FetchedBody, HttpFetcher};
pub use pipeline::{Acquired, FetchPlan, Page, Payload, Pipeline, Processed};
pub use politeness::PolitenessLimiter;
pub use renderer::{RenderError, RenderOptions, Rendered, RendererClient};
pub use router::SmartRouter;
pub use scheduler::{CrawlTask, Dispatcher, TaskHandler, WorkQueue, WorkerPool};
pub use scrape::{LinkedPayload, ScrapeOptions, ScrapeResult, Scraper};
pub use ssrf::{is_blocked_ip, SsrfError, SsrfGuard};
pub use task::{backoff_delay, SkipReason, TaskOutcome, TaskRunner};
