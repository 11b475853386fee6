//! URL handling module for Kumo
//!
//! This module provides URL canonicalization, relative resolution, identity
//! hashing, host extraction and allow/deny pattern filtering.

mod domain;
mod matcher;
mod normalize;

// Re-export main functions
pub use domain::{extract_host, parse_http_url, robots_location, same_host};
pub use matcher::PatternFilter;
pub use normalize::{normalize, resolve, url_hash};
