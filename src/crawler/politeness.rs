//! Per-host politeness throttling

use crate::params::PoliteConfig;
use crate::state::Coordination;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;

/// Enforces a jittered minimum delay between requests to the same host
pub struct PolitenessLimiter {
    coordination: Arc<Coordination>,
}

impl PolitenessLimiter {
    pub fn new(coordination: Arc<Coordination>) -> Self {
        Self { coordination }
    }

    /// Waits until `host` may be requested again
    ///
    /// The delay is sampled uniformly from `[delay * (1 - j), delay * (1 + j)]`.
    /// The slot is reserved atomically before sleeping, so no lock is held
    /// while waiting and other hosts are never blocked.
    ///
    /// # Returns
    ///
    /// How long the caller was suspended
    pub async fn throttle(&self, host: &str, config: &PoliteConfig) -> Duration {
        let delay = Self::target_delay(config);
        let wait = self.coordination.host_clock.reserve(host, delay);

        if !wait.is_zero() {
            tracing::trace!("Throttling {} for {:?}", host, wait);
            tokio::time::sleep(wait).await;
        }
        wait
    }

    /// Samples the jittered delay for one request
    pub fn target_delay(config: &PoliteConfig) -> Duration {
        let base = config.per_host_delay_ms as f64;
        let jitter = config.jitter_ratio.clamp(0.0, 1.0);

        let ms = if jitter > 0.0 {
            rand::thread_rng().gen_range(base * (1.0 - jitter)..=base * (1.0 + jitter))
        } else {
            base
        };
        Duration::from_millis(ms.round() as u64)
    }
}
