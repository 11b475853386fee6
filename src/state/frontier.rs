//! Per-job frontier: visited set, dispatch accounting and pending work

use dashmap::DashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

/// Outcome of offering a discovered URL to the frontier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Newly visited and counted; the caller must dispatch it
    Admitted,
    /// Already dispatched or completed
    Duplicate,
    /// The page limit is exhausted; stop expanding
    LimitReached,
}

/// Shared frontier state for one crawl job
///
/// `admit` is the single enqueue choke point: membership and the page count
/// are updated atomically so two workers discovering the same link never
/// both dispatch it and the count never passes `max_limit`.
#[derive(Debug)]
pub struct Frontier {
    job_id: String,
    host: String,
    max_limit: usize,
    visited: DashSet<String>,
    count: AtomicUsize,
    pending: AtomicUsize,
    halted: AtomicBool,
    finished_at: OnceLock<Instant>,
}

impl Frontier {
    /// Creates an empty frontier
    ///
    /// # Arguments
    ///
    /// * `job_id` - Owning job
    /// * `host` - Seed host used for same-domain scoping
    /// * `max_limit` - Maximum number of dispatched pages
    pub fn new(job_id: impl Into<String>, host: impl Into<String>, max_limit: usize) -> Self {
        Self {
            job_id: job_id.into(),
            host: host.into(),
            max_limit,
            visited: DashSet::new(),
            count: AtomicUsize::new(0),
            pending: AtomicUsize::new(0),
            halted: AtomicBool::new(false),
            finished_at: OnceLock::new(),
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Seed host for same-domain checks
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn max_limit(&self) -> usize {
        self.max_limit
    }

    /// Atomically marks `url_hash` visited and claims one page of the limit
    pub fn admit(&self, url_hash: &str) -> Admission {
        if !self.visited.insert(url_hash.to_string()) {
            return Admission::Duplicate;
        }

        match self
            .count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| {
                (c < self.max_limit).then_some(c + 1)
            }) {
            Ok(_) => Admission::Admitted,
            Err(_) => Admission::LimitReached,
        }
    }

    /// Returns true while more pages may be dispatched
    pub fn has_capacity(&self) -> bool {
        self.count.load(Ordering::Acquire) < self.max_limit
    }

    pub fn is_visited(&self, url_hash: &str) -> bool {
        self.visited.contains(url_hash)
    }

    /// Pages dispatched so far
    pub fn dispatched(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    // ===== Pending Work =====

    /// Records a task placed on a queue (including delayed retries)
    pub fn task_enqueued(&self) {
        self.pending.fetch_add(1, Ordering::AcqRel);
    }

    /// Records a finished task; returns true if it was the last one
    pub fn task_finished(&self) -> bool {
        self.pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |p| p.checked_sub(1))
            .map(|previous| previous == 1)
            .unwrap_or(false)
    }

    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    // ===== Lifetime =====

    /// Stops further dispatch for this job
    pub fn halt(&self) {
        self.halted.store(true, Ordering::Release);
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::Acquire)
    }

    /// Starts the retention clock; later calls are ignored
    pub fn mark_finished(&self) {
        let _ = self.finished_at.set(Instant::now());
    }

    /// Returns true once the job finished more than `retention` ago
    pub fn is_expired(&self, retention: Duration) -> bool {
        self.finished_at
            .get()
            .is_some_and(|finished| finished.elapsed() >= retention)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_admit_dedups() {
        let frontier = Frontier::new("job", "example.com", 10);
        assert_eq!(frontier.admit("a"), Admission::Admitted);
        assert_eq!(frontier.admit("a"), Admission::Duplicate);
        assert_eq!(frontier.dispatched(), 1);
    }

    #[test]
    fn test_admit_respects_limit() {
        let frontier = Frontier::new("job", "example.com", 2);
        assert_eq!(frontier.admit("a"), Admission::Admitted);
        assert_eq!(frontier.admit("b"), Admission::Admitted);
        assert!(!frontier.has_capacity());
        assert_eq!(frontier.admit("c"), Admission::LimitReached);
        assert_eq!(frontier.dispatched(), 2);
    }

    #[test]
    fn test_concurrent_admission_never_exceeds_limit() {
        let frontier = Arc::new(Frontier::new("job", "example.com", 25));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let frontier = Arc::clone(&frontier);
                // Every worker races on the same 100 URLs
                std::thread::spawn(move || {
                    (0..100)
                        .filter(|i| frontier.admit(&format!("url-{}", i)) == Admission::Admitted)
                        .count()
                })
            })
            .collect();

        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(admitted, 25);
        assert_eq!(frontier.dispatched(), 25);
    }

    #[test]
    fn test_pending_reaches_zero_once() {
        let frontier = Frontier::new("job", "example.com", 10);
        frontier.task_enqueued();
        frontier.task_enqueued();
        assert!(!frontier.task_finished());
        assert!(frontier.task_finished());
        assert!(!frontier.task_finished());
        assert_eq!(frontier.pending(), 0);
    }

    #[test]
    fn test_expiry_requires_finish() {
        let frontier = Frontier::new("job", "example.com", 10);
        assert!(!frontier.is_expired(Duration::ZERO));
        frontier.mark_finished();
        assert!(frontier.is_expired(Duration::ZERO));
        assert!(!frontier.is_expired(Duration::from_secs(3600)));
    }
}
