//! Job reports built from engine snapshots
//!
//! This module turns a [`JobSnapshot`] into a flat report and renders it
//! either to stdout or as markdown.

use crate::crawler::JobSnapshot;
use crate::state::JobStatus;
use chrono::{DateTime, Utc};
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Flat view of one job's progress
#[derive(Debug, Clone)]
pub struct JobReport {
    pub job_id: String,
    pub tenant_id: String,
    pub seed: String,
    pub status: JobStatus,
    pub depth: u32,
    pub limit: u32,

    /// Results persisted so far
    pub total_results: u64,
    pub succeeded: u64,
    pub failed: u64,

    /// Pages admitted to the frontier, seed included
    pub dispatched: usize,

    /// Tasks still queued or waiting for a retry
    pub pending: usize,

    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobReport {
    pub fn from_snapshot(snapshot: &JobSnapshot) -> Self {
        let job = &snapshot.job;
        Self {
            job_id: job.id.clone(),
            tenant_id: job.tenant_id.clone(),
            seed: job.params.url.clone(),
            status: job.status,
            depth: job.params.depth,
            limit: job.params.limit,
            total_results: snapshot.results.total,
            succeeded: snapshot.results.succeeded,
            failed: snapshot.results.failed,
            dispatched: snapshot.dispatched,
            pending: snapshot.pending,
            error: job.error.as_ref().map(|e| e.to_string()),
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }

    /// Share of persisted results that succeeded, in percent
    pub fn success_rate(&self) -> f64 {
        if self.total_results == 0 {
            return 0.0;
        }
        (self.succeeded as f64 / self.total_results as f64) * 100.0
    }

    /// Wall-clock time between creation and the last status change
    pub fn elapsed_seconds(&self) -> i64 {
        (self.updated_at - self.created_at).num_seconds().max(0)
    }
}

/// Prints a report to stdout
pub fn print_report(report: &JobReport) {
    println!("=== Job {} ===\n", report.job_id);

    println!("  Tenant: {}", report.tenant_id);
    println!("  Seed: {}", report.seed);
    println!("  Status: {}", report.status);
    println!("  Depth / limit: {} / {}", report.depth, report.limit);
    println!();

    println!("Results:");
    println!("  Total: {}", report.total_results);
    println!("  Succeeded: {}", report.succeeded);
    println!("  Failed: {}", report.failed);
    println!("  Success rate: {:.1}%", report.success_rate());
    println!();

    if report.pending > 0 || !report.status.is_terminal() {
        println!("Progress:");
        println!("  Dispatched: {}", report.dispatched);
        println!("  Pending: {}", report.pending);
        println!();
    }

    if let Some(error) = &report.error {
        println!("Error: {}", error);
    }
}

/// Formats a report as markdown
pub fn format_markdown_report(report: &JobReport) -> String {
    let mut md = String::new();

    md.push_str(&format!("# Crawl Job {}\n\n", report.job_id));

    md.push_str("## Job\n\n");
    md.push_str(&format!("- **Tenant**: {}\n", report.tenant_id));
    md.push_str(&format!("- **Seed**: {}\n", report.seed));
    md.push_str(&format!("- **Status**: {}\n", report.status));
    md.push_str(&format!("- **Depth**: {}\n", report.depth));
    md.push_str(&format!("- **Limit**: {}\n", report.limit));
    md.push_str(&format!("- **Created**: {}\n", report.created_at.to_rfc3339()));
    md.push_str(&format!(
        "- **Elapsed**: {} seconds\n\n",
        report.elapsed_seconds()
    ));

    md.push_str("## Results\n\n");
    md.push_str("| Metric | Count |\n");
    md.push_str("|--------|-------|\n");
    md.push_str(&format!("| Total | {} |\n", report.total_results));
    md.push_str(&format!("| Succeeded | {} |\n", report.succeeded));
    md.push_str(&format!("| Failed | {} |\n", report.failed));
    md.push_str(&format!(
        "\n**Success rate**: {:.2}%\n",
        report.success_rate()
    ));

    if let Some(error) = &report.error {
        md.push_str(&format!("\n## Error\n\n`{}`\n", error));
    }

    md
}

/// Writes the markdown report to `output_path`
pub fn write_markdown_report(report: &JobReport, output_path: &Path) -> std::io::Result<()> {
    let mut file = File::create(output_path)?;
    file.write_all(format_markdown_report(report).as_bytes())?;
    Ok(())
}
