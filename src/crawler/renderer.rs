//! Client for the external headless render service

use crate::crawler::{SsrfError, SsrfGuard};
use crate::params::WaitStep;
use crate::state::Coordination;
use crate::ErrorCode;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors produced by [`RendererClient::render`]
#[derive(Debug, Error)]
pub enum RenderError {
    #[error(transparent)]
    Blocked(#[from] SsrfError),

    #[error("Renderer unavailable: {0}")]
    Unavailable(String),

    #[error("Renderer returned {status}")]
    Upstream { status: u16 },

    #[error("Renderer response could not be decoded: {0}")]
    Decode(String),

    #[error("Renderer call failed: {0}")]
    Timeout(String),
}

impl RenderError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Blocked(e) => e.code(),
            Self::Unavailable(_) => ErrorCode::RendererUnavailable,
            Self::Upstream { .. } | Self::Decode(_) => ErrorCode::RendererError,
            Self::Timeout(_) => ErrorCode::RendererTimeout,
        }
    }
}

/// Options forwarded to the render service
#[derive(Debug, Clone, Default)]
pub struct RenderOptions {
    pub wait_for: Vec<WaitStep>,
    /// Scroll duration in milliseconds
    pub scroll: u64,
    pub timeout_ms: u64,
}

#[derive(Debug, Serialize)]
struct RenderRequest<'a> {
    url: &'a str,
    wait_for: &'a [WaitStep],
    scroll: u64,
    timeout_ms: u64,
}

/// Successful render service response
#[derive(Debug, Clone, Deserialize)]
pub struct Rendered {
    #[serde(default)]
    pub final_url: Option<String>,
    #[serde(default)]
    pub status_code: Option<u16>,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub html: String,
    #[serde(default)]
    pub timing_ms: Option<u64>,
}

/// Render service client guarded by the shared circuit breaker
pub struct RendererClient {
    client: Client,
    base_url: Option<String>,
    guard: Arc<SsrfGuard>,
    coordination: Arc<Coordination>,
}

impl RendererClient {
    /// # Arguments
    ///
    /// * `client` - HTTP client used for the service call
    /// * `base_url` - Service base URL; `None` makes every call unavailable
    /// * `guard` - SSRF guard applied to the page URL
    /// * `coordination` - Shared state holding the circuit breaker
    pub fn new(
        client: Client,
        base_url: Option<String>,
        guard: Arc<SsrfGuard>,
        coordination: Arc<Coordination>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.map(|b| b.trim_end_matches('/').to_string()),
            guard,
            coordination,
        }
    }

    /// Renders `url` through the headless service
    ///
    /// An open circuit short-circuits with `RENDERER_UNAVAILABLE` before any
    /// network I/O. Non-2xx responses and transport failures both count
    /// toward opening the circuit; a success resets the count.
    pub async fn render(&self, url: &str, options: &RenderOptions) -> Result<Rendered, RenderError> {
        let Some(base) = &self.base_url else {
            return Err(RenderError::Unavailable(
                "no renderer configured".to_string(),
            ));
        };

        let circuit = &self.coordination.circuit;
        if circuit.is_open() {
            return Err(RenderError::Unavailable("circuit open".to_string()));
        }

        self.guard.validate(url).await?;

        let request = RenderRequest {
            url,
            wait_for: &options.wait_for,
            scroll: options.scroll,
            timeout_ms: options.timeout_ms,
        };
        let timeout = Duration::from_secs(options.timeout_ms.div_ceil(1000).max(1));

        let response = match self
            .client
            .post(format!("{}/render", base))
            .json(&request)
            .timeout(timeout)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                circuit.record_failure();
                return Err(RenderError::Timeout(e.to_string()));
            }
        };

        let status = response.status();
        if !status.is_success() {
            circuit.record_failure();
            return Err(RenderError::Upstream {
                status: status.as_u16(),
            });
        }

        match response.json::<Rendered>().await {
            Ok(rendered) => {
                circuit.record_success();
                Ok(rendered)
            }
            Err(e) => {
                circuit.record_failure();
                Err(RenderError::Decode(e.to_string()))
            }
        }
    }
}
