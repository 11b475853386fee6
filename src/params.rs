//! Crawl and scrape request parameters
//!
//! These are the immutable, per-job settings a tenant submits. They are
//! stored as JSON alongside the job record and validated before a job is
//! created.

use crate::config::{EngineConfig, PolitenessConfig};
use crate::url::parse_http_url;
use crate::KumoError;
use serde::{Deserialize, Serialize};

/// How pages are fetched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestMode {
    /// Plain HTTP only
    Http,
    /// Always go through the headless renderer
    Chrome,
    /// HTTP first, escalate to the renderer when the page looks client-rendered
    #[default]
    Smart,
}

/// Transport that actually produced a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestUsed {
    Http,
    Chrome,
}

impl RequestUsed {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Chrome => "chrome",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "http" => Some(Self::Http),
            "chrome" => Some(Self::Chrome),
            _ => None,
        }
    }
}

/// Requested shape of the `content` payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReturnFormat {
    #[default]
    Markdown,
    /// Alias of markdown
    Commonmark,
    Raw,
    Text,
    Xml,
    Bytes,
    Empty,
}

impl ReturnFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Markdown => "markdown",
            Self::Commonmark => "commonmark",
            Self::Raw => "raw",
            Self::Text => "text",
            Self::Xml => "xml",
            Self::Bytes => "bytes",
            Self::Empty => "empty",
        }
    }
}

/// One renderer wait step, passed through to the render service verbatim
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitStep {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

/// Per-job politeness and retry settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoliteConfig {
    #[serde(default = "default_per_host_delay_ms")]
    pub per_host_delay_ms: u64,
    #[serde(default = "default_jitter_ratio")]
    pub jitter_ratio: f64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_per_host_delay_ms() -> u64 {
    1200
}

fn default_jitter_ratio() -> f64 {
    0.3
}

fn default_max_retries() -> u32 {
    3
}

impl Default for PoliteConfig {
    fn default() -> Self {
        Self {
            per_host_delay_ms: default_per_host_delay_ms(),
            jitter_ratio: default_jitter_ratio(),
            max_retries: default_max_retries(),
        }
    }
}

impl From<&PolitenessConfig> for PoliteConfig {
    fn from(config: &PolitenessConfig) -> Self {
        Self {
            per_host_delay_ms: config.per_host_delay_ms,
            jitter_ratio: config.jitter_ratio,
            max_retries: config.max_retries,
        }
    }
}

/// Immutable parameters of a crawl job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlParams {
    /// Seed URL
    pub url: String,

    /// Maximum link depth below the seed
    #[serde(default = "default_depth")]
    pub depth: u32,

    /// Maximum dispatched pages; 0 means the engine hard cap
    #[serde(default = "default_limit")]
    pub limit: u32,

    #[serde(default)]
    pub request: RequestMode,

    #[serde(default)]
    pub return_format: ReturnFormat,

    /// Include page metadata in results
    #[serde(default = "default_true")]
    pub metadata: bool,

    /// Renderer scroll duration in milliseconds
    #[serde(default)]
    pub scroll: u64,

    #[serde(default)]
    pub wait_for: Vec<WaitStep>,

    /// Per-request timeout; falls back to the transport default when unset
    #[serde(default)]
    pub timeout_ms: Option<u64>,

    #[serde(default = "default_max_bytes")]
    pub max_bytes: u64,

    #[serde(default = "default_true")]
    pub same_domain_only: bool,

    #[serde(default)]
    pub allow_patterns: Vec<String>,

    #[serde(default)]
    pub deny_patterns: Vec<String>,

    #[serde(default = "default_true")]
    pub include_pdf: bool,

    #[serde(default)]
    pub polite: PoliteConfig,

    /// Optional tighter runtime cap; the engine cap always applies
    #[serde(default)]
    pub max_runtime_seconds: Option<u64>,
}

fn default_depth() -> u32 {
    2
}

fn default_limit() -> u32 {
    50
}

fn default_max_bytes() -> u64 {
    15_000_000
}

fn default_true() -> bool {
    true
}

impl CrawlParams {
    /// Parameters for `url` with every other field at its default
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            depth: default_depth(),
            limit: default_limit(),
            request: RequestMode::default(),
            return_format: ReturnFormat::default(),
            metadata: true,
            scroll: 0,
            wait_for: Vec::new(),
            timeout_ms: None,
            max_bytes: default_max_bytes(),
            same_domain_only: true,
            allow_patterns: Vec::new(),
            deny_patterns: Vec::new(),
            include_pdf: true,
            polite: PoliteConfig::default(),
            max_runtime_seconds: None,
        }
    }

    /// Validates ranges and the seed URL
    pub fn validate(&self) -> Result<(), KumoError> {
        parse_http_url(&self.url)?;

        check_range("limit", self.limit as u64, 0, 1000)?;
        check_range("depth", self.depth as u64, 0, 100)?;
        check_range("scroll", self.scroll, 0, 30_000)?;
        if let Some(timeout) = self.timeout_ms {
            check_range("timeout_ms", timeout, 1000, 120_000)?;
        }
        check_range("max_bytes", self.max_bytes, 1024, 50_000_000)?;
        check_range(
            "polite.per_host_delay_ms",
            self.polite.per_host_delay_ms,
            100,
            10_000,
        )?;
        check_range("polite.max_retries", self.polite.max_retries as u64, 0, 10)?;

        if !(0.0..=1.0).contains(&self.polite.jitter_ratio) {
            return Err(KumoError::InvalidParams(format!(
                "polite.jitter_ratio must be between 0 and 1, got {}",
                self.polite.jitter_ratio
            )));
        }

        Ok(())
    }

    /// Page limit after applying the engine hard cap (0 means the cap)
    pub fn effective_limit(&self, engine: &EngineConfig) -> usize {
        let cap = engine.max_crawl_pages_hard_cap;
        if self.limit == 0 {
            cap
        } else {
            (self.limit as usize).min(cap)
        }
    }

    /// Runtime cap in seconds after applying the engine cap
    pub fn effective_runtime_seconds(&self, engine: &EngineConfig) -> u64 {
        let cap = engine.max_crawl_runtime_seconds;
        self.max_runtime_seconds.map_or(cap, |s| s.min(cap))
    }
}

fn check_range(name: &str, value: u64, min: u64, max: u64) -> Result<(), KumoError> {
    if value < min || value > max {
        return Err(KumoError::InvalidParams(format!(
            "{} must be between {} and {}, got {}",
            name, min, max, value
        )));
    }
    Ok(())
}
