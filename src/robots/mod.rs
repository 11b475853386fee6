//! Robots.txt handling module
//!
//! This module provides functionality for fetching, parsing, and caching robots.txt files.

mod parser;
mod policy;

pub use parser::{AgentRules, RobotsRules};
pub use policy::RobotsPolicy;
