use serde::Deserialize;

/// Main configuration structure for Kumo
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub renderer: RendererConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub politeness: PolitenessConfig,
}

/// Job orchestration limits and worker pool sizing
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Hard wall-clock cap for a crawl job (seconds)
    #[serde(rename = "max-crawl-runtime-seconds")]
    pub max_crawl_runtime_seconds: u64,

    /// Upper bound for a job's page limit; a limit of 0 means this value
    #[serde(rename = "max-crawl-pages-hard-cap")]
    pub max_crawl_pages_hard_cap: usize,

    /// Workers consuming the plain HTTP queue
    #[serde(rename = "http-workers")]
    pub http_workers: usize,

    /// Workers consuming the renderer queue
    #[serde(rename = "chrome-workers")]
    pub chrome_workers: usize,

    /// Renderer queue depth at which smart escalation is suppressed
    #[serde(rename = "renderer-queue-backpressure")]
    pub renderer_queue_backpressure: usize,

    /// Base of the exponential retry backoff (milliseconds)
    #[serde(rename = "retry-base-delay-ms")]
    pub retry_base_delay_ms: u64,

    /// How long a finished job's frontier is kept before collection (seconds)
    #[serde(rename = "frontier-retention-seconds")]
    pub frontier_retention_seconds: u64,

    /// Window in which a repeated submission returns the same job (seconds)
    #[serde(rename = "idempotency-ttl-seconds")]
    pub idempotency_ttl_seconds: u64,

    /// Maximum URLs accepted by one synchronous scrape call
    #[serde(rename = "max-scrape-urls-per-request")]
    pub max_scrape_urls_per_request: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_crawl_runtime_seconds: 1800,
            max_crawl_pages_hard_cap: 1000,
            http_workers: 8,
            chrome_workers: 2,
            renderer_queue_backpressure: 1000,
            retry_base_delay_ms: 5000,
            frontier_retention_seconds: 86_400,
            idempotency_ttl_seconds: 86_400,
            max_scrape_urls_per_request: 10,
        }
    }
}

/// Plain HTTP transport settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// User-Agent sent with every request
    #[serde(rename = "user-agent")]
    pub user_agent: String,

    /// TCP/TLS connect timeout (seconds)
    #[serde(rename = "connect-timeout-seconds")]
    pub connect_timeout_seconds: u64,

    /// Default whole-request timeout when a job does not set one (milliseconds)
    #[serde(rename = "default-timeout-ms")]
    pub default_timeout_ms: u64,

    /// Maximum redirect hops followed per fetch
    #[serde(rename = "max-redirects")]
    pub max_redirects: usize,

    /// Timeout for robots.txt fetches (seconds)
    #[serde(rename = "robots-timeout-seconds")]
    pub robots_timeout_seconds: u64,

    /// How long a parsed robots.txt stays cached (seconds)
    #[serde(rename = "robots-cache-ttl-seconds")]
    pub robots_cache_ttl_seconds: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: "KumoBot/0.1 (+https://example.com/bot)".to_string(),
            connect_timeout_seconds: 10,
            default_timeout_ms: 8000,
            max_redirects: 10,
            robots_timeout_seconds: 5,
            robots_cache_ttl_seconds: 21_600,
        }
    }
}

/// Headless render service settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Base URL of the render service; unset disables rendering
    #[serde(rename = "base-url")]
    pub base_url: Option<String>,

    /// Default render timeout when a job does not set one (milliseconds)
    #[serde(rename = "default-timeout-ms")]
    pub default_timeout_ms: u64,

    /// Failures within the window that open the circuit
    #[serde(rename = "failure-threshold")]
    pub failure_threshold: u32,

    /// Failure counter decay window (seconds since the last failure)
    #[serde(rename = "failure-window-seconds")]
    pub failure_window_seconds: u64,

    /// How long the circuit stays open (seconds)
    #[serde(rename = "open-seconds")]
    pub open_seconds: u64,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            default_timeout_ms: 20_000,
            failure_threshold: 5,
            failure_window_seconds: 60,
            open_seconds: 90,
        }
    }
}

/// Outbound request safety settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Skip the private address range check (local test servers only)
    #[serde(rename = "allow-private-networks")]
    pub allow_private_networks: bool,

    /// How long resolved host addresses are cached (seconds)
    #[serde(rename = "dns-cache-ttl-seconds")]
    pub dns_cache_ttl_seconds: u64,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            allow_private_networks: false,
            dns_cache_ttl_seconds: 300,
        }
    }
}

/// Persistence settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,

    /// Directory backing the object store
    #[serde(rename = "object-root")]
    pub object_root: String,

    /// Public prefix of presigned object URLs
    #[serde(rename = "public-base-url")]
    pub public_base_url: String,

    /// Secret mixed into presigned URL signatures
    #[serde(rename = "signing-secret")]
    pub signing_secret: String,

    /// Largest text payload a scrape returns inline (bytes)
    #[serde(rename = "inline-text-max-bytes")]
    pub inline_text_max_bytes: usize,

    /// Lifetime of presigned URLs (seconds)
    #[serde(rename = "presign-ttl-seconds")]
    pub presign_ttl_seconds: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: "./kumo.db".to_string(),
            object_root: "./kumo-objects".to_string(),
            public_base_url: "http://localhost:8080/objects".to_string(),
            signing_secret: "change-me".to_string(),
            inline_text_max_bytes: 131_072,
            presign_ttl_seconds: 600,
        }
    }
}

/// Politeness defaults applied to requests that do not carry their own
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PolitenessConfig {
    /// Minimum delay between requests to one host (milliseconds)
    #[serde(rename = "per-host-delay-ms")]
    pub per_host_delay_ms: u64,

    /// Uniform jitter applied to the delay, as a fraction of it
    #[serde(rename = "jitter-ratio")]
    pub jitter_ratio: f64,

    /// Retries for 429/503 responses
    #[serde(rename = "max-retries")]
    pub max_retries: u32,
}

impl Default for PolitenessConfig {
    fn default() -> Self {
        Self {
            per_host_delay_ms: 1200,
            jitter_ratio: 0.3,
            max_retries: 3,
        }
    }
}
