//! Process-wide coordination state injected into every worker

use crate::config::Config;
use crate::robots::RobotsRules;
use crate::state::{CircuitBreaker, Frontier, HostClock, TtlCache};
use dashmap::DashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

/// Owns every piece of shared mutable crawl state
///
/// Caches carry the TTLs from configuration; frontiers are keyed by job id
/// and collected by [`Coordination::sweep_frontiers`].
#[derive(Debug)]
pub struct Coordination {
    /// Resolved addresses per host
    pub dns: TtlCache<String, Arc<Vec<IpAddr>>>,

    /// Parsed robots.txt per `scheme://host[:port]`
    pub robots: TtlCache<String, Arc<RobotsRules>>,

    /// Submission fingerprint to job id
    pub idempotency: TtlCache<String, String>,

    /// Per-host politeness slots
    pub host_clock: HostClock,

    /// Renderer circuit state
    pub circuit: CircuitBreaker,

    frontiers: DashMap<String, Arc<Frontier>>,
}

impl Coordination {
    pub fn new(config: &Config) -> Self {
        Self {
            dns: TtlCache::new(Duration::from_secs(config.security.dns_cache_ttl_seconds)),
            robots: TtlCache::new(Duration::from_secs(config.http.robots_cache_ttl_seconds)),
            idempotency: TtlCache::new(Duration::from_secs(config.engine.idempotency_ttl_seconds)),
            host_clock: HostClock::new(),
            circuit: CircuitBreaker::new(
                config.renderer.failure_threshold,
                Duration::from_secs(config.renderer.failure_window_seconds),
                Duration::from_secs(config.renderer.open_seconds),
            ),
            frontiers: DashMap::new(),
        }
    }

    // ===== Frontiers =====

    /// Registers a fresh frontier for `job_id`, replacing any previous one
    pub fn create_frontier(&self, job_id: &str, host: &str, max_limit: usize) -> Arc<Frontier> {
        let frontier = Arc::new(Frontier::new(job_id, host, max_limit));
        self.frontiers
            .insert(job_id.to_string(), Arc::clone(&frontier));
        frontier
    }

    pub fn frontier(&self, job_id: &str) -> Option<Arc<Frontier>> {
        self.frontiers.get(job_id).map(|f| Arc::clone(f.value()))
    }

    /// Drops frontiers whose job finished more than `retention` ago
    ///
    /// # Returns
    ///
    /// Number of frontiers collected
    pub fn sweep_frontiers(&self, retention: Duration) -> usize {
        let before = self.frontiers.len();
        self.frontiers.retain(|_, f| !f.is_expired(retention));
        let removed = before.saturating_sub(self.frontiers.len());
        if removed > 0 {
            tracing::debug!("Collected {} finished frontiers", removed);
        }
        removed
    }

    pub fn frontier_count(&self) -> usize {
        self.frontiers.len()
    }

    /// Purges expired cache entries
    pub fn purge_caches(&self) -> usize {
        self.dns.purge_expired() + self.robots.purge_expired() + self.idempotency.purge_expired()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frontier_registry() {
        let coordination = Coordination::new(&Config::default());
        let frontier = coordination.create_frontier("crawl_1", "example.com", 5);
        assert_eq!(frontier.host(), "example.com");

        let fetched = coordination.frontier("crawl_1").unwrap();
        assert!(Arc::ptr_eq(&frontier, &fetched));
        assert!(coordination.frontier("crawl_2").is_none());
    }

    #[test]
    fn test_sweep_only_collects_finished() {
        let coordination = Coordination::new(&Config::default());
        let done = coordination.create_frontier("done", "a.example", 5);
        coordination.create_frontier("live", "b.example", 5);

        done.mark_finished();
        assert_eq!(coordination.sweep_frontiers(Duration::ZERO), 1);
        assert!(coordination.frontier("done").is_none());
        assert!(coordination.frontier("live").is_some());
    }

    #[test]
    fn test_circuit_uses_configured_threshold() {
        let mut config = Config::default();
        config.renderer.failure_threshold = 2;
        let coordination = Coordination::new(&config);

        coordination.circuit.record_failure();
        assert!(!coordination.circuit.is_open());
        coordination.circuit.record_failure();
        assert!(coordination.circuit.is_open());
    }
}
