//! Configuration module for Kumo
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//! Every section is optional; omitted keys take their documented defaults.
//!
//! # Example
//!
//! ```no_run
//! use kumo_crawl::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("kumo.toml")).unwrap();
//! println!("HTTP workers: {}", config.engine.http_workers);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    Config, EngineConfig, HttpConfig, PolitenessConfig, RendererConfig, SecurityConfig,
    StorageConfig,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash};
pub use validation::validate;
