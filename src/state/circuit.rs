//! Renderer circuit breaker

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Lock-free circuit breaker protecting the shared render service
///
/// Failures are counted within a decay window measured from the most
/// recent failure. Reaching the threshold opens the circuit for a fixed
/// period; any success resets the count.
#[derive(Debug)]
pub struct CircuitBreaker {
    base: Instant,
    failures: AtomicU32,
    last_failure_ms: AtomicU64,
    open_until_ms: AtomicU64,
    threshold: u32,
    window: Duration,
    open_for: Duration,
}

impl CircuitBreaker {
    /// # Arguments
    ///
    /// * `threshold` - Failures that open the circuit
    /// * `window` - Idle time after which the failure count decays to zero
    /// * `open_for` - How long the circuit stays open
    pub fn new(threshold: u32, window: Duration, open_for: Duration) -> Self {
        Self {
            base: Instant::now(),
            failures: AtomicU32::new(0),
            last_failure_ms: AtomicU64::new(0),
            open_until_ms: AtomicU64::new(0),
            threshold: threshold.max(1),
            window,
            open_for,
        }
    }

    fn now_ms(&self) -> u64 {
        self.base.elapsed().as_millis() as u64 + 1
    }

    /// Returns true while calls must be short-circuited
    pub fn is_open(&self) -> bool {
        self.now_ms() < self.open_until_ms.load(Ordering::Acquire)
    }

    /// Records a failed call and returns the failure count after it
    pub fn record_failure(&self) -> u32 {
        let now = self.now_ms();
        let previous = self.last_failure_ms.swap(now, Ordering::AcqRel);

        if previous != 0 && now.saturating_sub(previous) > self.window.as_millis() as u64 {
            self.failures.store(0, Ordering::Release);
        }

        let count = self.failures.fetch_add(1, Ordering::AcqRel) + 1;
        if count >= self.threshold {
            self.open_until_ms
                .store(now + self.open_for.as_millis() as u64, Ordering::Release);
            self.failures.store(0, Ordering::Release);
            tracing::warn!(
                "Renderer circuit opened for {}s after {} failures",
                self.open_for.as_secs(),
                count
            );
        }
        count
    }

    /// Records a successful call
    pub fn record_success(&self) {
        self.failures.store(0, Ordering::Release);
    }

    /// Current failure count
    pub fn failure_count(&self) -> u32 {
        self.failures.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(5, Duration::from_secs(60), Duration::from_millis(200))
    }

    #[test]
    fn test_opens_at_threshold() {
        let breaker = breaker();
        for _ in 0..4 {
            breaker.record_failure();
            assert!(!breaker.is_open());
        }
        breaker.record_failure();
        assert!(breaker.is_open());
    }

    #[test]
    fn test_success_resets_count() {
        let breaker = breaker();
        for _ in 0..4 {
            breaker.record_failure();
        }
        breaker.record_success();
        assert_eq!(breaker.failure_count(), 0);
        breaker.record_failure();
        assert!(!breaker.is_open());
    }

    #[test]
    fn test_closes_after_open_period() {
        let breaker = breaker();
        for _ in 0..5 {
            breaker.record_failure();
        }
        assert!(breaker.is_open());
        std::thread::sleep(Duration::from_millis(250));
        assert!(!breaker.is_open());
    }

    #[test]
    fn test_failures_decay_after_window() {
        let breaker = CircuitBreaker::new(2, Duration::from_millis(20), Duration::from_secs(90));
        breaker.record_failure();
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(breaker.record_failure(), 1);
        assert!(!breaker.is_open());
    }
}
