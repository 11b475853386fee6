use crate::config::types::{
    Config, EngineConfig, HttpConfig, PolitenessConfig, RendererConfig, SecurityConfig,
    StorageConfig,
};
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_engine_config(&config.engine)?;
    validate_http_config(&config.http)?;
    validate_renderer_config(&config.renderer)?;
    validate_security_config(&config.security)?;
    validate_storage_config(&config.storage)?;
    validate_politeness_config(&config.politeness)?;
    Ok(())
}

/// Validates job orchestration limits
fn validate_engine_config(config: &EngineConfig) -> Result<(), ConfigError> {
    if config.max_crawl_runtime_seconds < 1 {
        return Err(ConfigError::Validation(
            "max_crawl_runtime_seconds must be >= 1".to_string(),
        ));
    }

    if config.max_crawl_pages_hard_cap < 1 {
        return Err(ConfigError::Validation(
            "max_crawl_pages_hard_cap must be >= 1".to_string(),
        ));
    }

    if config.http_workers < 1 || config.http_workers > 256 {
        return Err(ConfigError::Validation(format!(
            "http_workers must be between 1 and 256, got {}",
            config.http_workers
        )));
    }

    if config.chrome_workers < 1 || config.chrome_workers > 64 {
        return Err(ConfigError::Validation(format!(
            "chrome_workers must be between 1 and 64, got {}",
            config.chrome_workers
        )));
    }

    if config.max_scrape_urls_per_request < 1 {
        return Err(ConfigError::Validation(
            "max_scrape_urls_per_request must be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// Validates HTTP transport settings
fn validate_http_config(config: &HttpConfig) -> Result<(), ConfigError> {
    if config.user_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "user_agent cannot be empty".to_string(),
        ));
    }

    if config.default_timeout_ms < 100 {
        return Err(ConfigError::Validation(format!(
            "http default_timeout_ms must be >= 100ms, got {}ms",
            config.default_timeout_ms
        )));
    }

    if config.max_redirects > 20 {
        return Err(ConfigError::Validation(format!(
            "max_redirects must be <= 20, got {}",
            config.max_redirects
        )));
    }

    Ok(())
}

/// Validates the render service settings
fn validate_renderer_config(config: &RendererConfig) -> Result<(), ConfigError> {
    if let Some(base) = &config.base_url {
        let url = Url::parse(base)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid renderer base_url: {}", e)))?;

        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ConfigError::InvalidUrl(format!(
                "Renderer base_url must be http or https, got '{}'",
                base
            )));
        }
    }

    if config.failure_threshold < 1 {
        return Err(ConfigError::Validation(
            "renderer failure_threshold must be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// Validates outbound safety settings
fn validate_security_config(config: &SecurityConfig) -> Result<(), ConfigError> {
    if config.allow_private_networks {
        tracing::warn!("allow-private-networks is enabled; SSRF address checks are disabled");
    }
    Ok(())
}

/// Validates persistence settings
fn validate_storage_config(config: &StorageConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }

    if config.object_root.is_empty() {
        return Err(ConfigError::Validation(
            "object_root cannot be empty".to_string(),
        ));
    }

    Url::parse(&config.public_base_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid public_base_url: {}", e)))?;

    if config.signing_secret.is_empty() {
        return Err(ConfigError::Validation(
            "signing_secret cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Validates politeness defaults with the same bounds as per-job settings
fn validate_politeness_config(config: &PolitenessConfig) -> Result<(), ConfigError> {
    if config.per_host_delay_ms < 100 || config.per_host_delay_ms > 10_000 {
        return Err(ConfigError::Validation(format!(
            "per_host_delay_ms must be between 100 and 10000, got {}",
            config.per_host_delay_ms
        )));
    }

    if !(0.0..=1.0).contains(&config.jitter_ratio) {
        return Err(ConfigError::Validation(format!(
            "jitter_ratio must be between 0 and 1, got {}",
            config.jitter_ratio
        )));
    }

    if config.max_retries > 10 {
        return Err(ConfigError::Validation(format!(
            "max_retries must be <= 10, got {}",
            config.max_retries
        )));
    }

    Ok(())
}
