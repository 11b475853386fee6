//! Kumo: crawl orchestration and fetch-decision engine
//!
//! This crate fetches pages over plain HTTP or through a headless renderer,
//! extracts readable content and links, and follows links within per-job
//! bounds while respecting robots.txt, per-host politeness and SSRF rules.

pub mod config;
pub mod crawler;
pub mod extract;
pub mod output;
pub mod params;
pub mod robots;
pub mod state;
pub mod storage;
pub mod url;

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Main error type for Kumo operations
#[derive(Debug, Error)]
pub enum KumoError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid crawl parameters: {0}")]
    InvalidParams(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Invalid state transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: state::JobStatus,
        to: state::JobStatus,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] crawler::FetchError),

    #[error("Render error: {0}")]
    Render(#[from] crawler::RenderError),

    #[error("Extraction error: {0}")]
    Extract(#[from] extract::ExtractError),

    #[error("URL error: {0}")]
    Url(#[from] UrlError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing host in URL")]
    MissingHost,
}

/// Stable error codes attached to failed results and failed jobs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidUrl,
    SsrfBlocked,
    HttpError,
    MaxBytesExceeded,
    RendererError,
    RendererTimeout,
    RendererUnavailable,
    UnsupportedFormat,
    MaxRuntimeExceeded,
    PdfParseFailed,
    StorageError,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidUrl => "INVALID_URL",
            Self::SsrfBlocked => "SSRF_BLOCKED",
            Self::HttpError => "HTTP_ERROR",
            Self::MaxBytesExceeded => "MAX_BYTES_EXCEEDED",
            Self::RendererError => "RENDERER_ERROR",
            Self::RendererTimeout => "RENDERER_TIMEOUT",
            Self::RendererUnavailable => "RENDERER_UNAVAILABLE",
            Self::UnsupportedFormat => "UNSUPPORTED_FORMAT",
            Self::MaxRuntimeExceeded => "MAX_RUNTIME_EXCEEDED",
            Self::PdfParseFailed => "PDF_PARSE_FAILED",
            Self::StorageError => "STORAGE_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error payload recorded on a failed result or a failed job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskError {
    pub code: ErrorCode,
    pub message: String,
}

impl TaskError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// Result type alias for Kumo operations
pub type Result<T> = std::result::Result<T, KumoError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::{Engine, Scraper};
pub use params::{CrawlParams, PoliteConfig, RequestMode, ReturnFormat};
pub use state::JobStatus;
pub use crate::url::{normalize, resolve, url_hash};
