//! Output module for job reports
//!
//! This module handles:
//! - Summarising a job snapshot into a flat report
//! - Printing reports to stdout and exporting them as markdown

mod report;

pub use report::{format_markdown_report, print_report, write_markdown_report, JobReport};
