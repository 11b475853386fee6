//! State module for shared crawl coordination
//!
//! # Components
//!
//! - `JobStatus`: Lifecycle of a crawl job (queued, running, completed, failed, canceled)
//! - `Frontier`: Per-job visited set, page count and pending task counter
//! - `HostClock`: Per-host politeness slots
//! - `CircuitBreaker`: Renderer failure tracking
//! - `TtlCache`: Expiring caches for DNS, robots.txt and idempotency keys
//! - `Coordination`: Owner of all of the above, injected into workers

mod circuit;
mod coordination;
mod frontier;
mod host_clock;
mod job_status;
mod ttl_cache;

// Re-export main types
pub use circuit::CircuitBreaker;
pub use coordination::Coordination;
pub use frontier::{Admission, Frontier};
pub use host_clock::HostClock;
pub use job_status::JobStatus;
pub use ttl_cache::TtlCache;
