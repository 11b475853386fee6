//! Per-host request slots for politeness throttling

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Tracks the most recently reserved request time for each host
///
/// Slots are reserved with a compare-and-set on a per-host atomic, so
/// callers for the same host serialize without holding a lock while they
/// wait and callers for different hosts never contend.
#[derive(Debug)]
pub struct HostClock {
    base: Instant,
    slots: DashMap<String, Arc<AtomicU64>>,
}

impl HostClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            slots: DashMap::new(),
        }
    }

    /// Milliseconds since `base`, offset by one so that zero means "never"
    fn now_ms(&self) -> u64 {
        self.base.elapsed().as_millis() as u64 + 1
    }

    /// Reserves the next request slot for `host` at least `delay` after the
    /// previous one and returns how long the caller must wait for it
    ///
    /// # Arguments
    ///
    /// * `host` - Lowercase host name
    /// * `delay` - Required spacing from the previous request to this host
    ///
    /// # Returns
    ///
    /// The wait before the reserved slot starts (zero if it is due now)
    pub fn reserve(&self, host: &str, delay: Duration) -> Duration {
        let slot = self
            .slots
            .entry(host.to_string())
            .or_insert_with(|| Arc::new(AtomicU64::new(0)))
            .clone();

        let delay_ms = delay.as_millis() as u64;
        loop {
            let now = self.now_ms();
            let last = slot.load(Ordering::Acquire);
            let target = if last == 0 {
                now
            } else {
                now.max(last + delay_ms)
            };

            if slot
                .compare_exchange(last, target, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Duration::from_millis(target - now);
            }
        }
    }

    /// Number of hosts with a recorded slot
    pub fn tracked_hosts(&self) -> usize {
        self.slots.len()
    }
}

impl Default for HostClock {
    fn default() -> Self {
        Self::new()
    }
}
