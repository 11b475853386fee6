//! Storage module for persisting jobs, results and payloads
//!
//! This module handles:
//! - Job records and their lifecycle status (SQLite)
//! - One result per crawled URL per job, with cursor pagination (SQLite)
//! - Content-addressed payload objects and presigned download URLs

mod objects;
mod schema;
mod sqlite;
mod traits;

pub use objects::{bytes_key, content_sha256, text_key, FsObjectStore, ObjectStore, Presigned};
pub use sqlite::SqliteStorage;
pub use traits::{JobStore, StorageError, StorageResult};

use crate::extract::SourceType;
use crate::params::{CrawlParams, RequestUsed};
use crate::state::JobStatus;
use crate::TaskError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A crawl job as persisted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    pub tenant_id: String,
    pub params: CrawlParams,
    pub status: JobStatus,
    pub error: Option<TaskError>,
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub canceled_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    /// A fresh queued job
    pub fn new(
        id: impl Into<String>,
        tenant_id: impl Into<String>,
        params: CrawlParams,
        idempotency_key: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            tenant_id: tenant_id.into(),
            params,
            status: JobStatus::Queued,
            error: None,
            idempotency_key,
            created_at: now,
            updated_at: now,
            canceled_at: None,
        }
    }
}

/// Pointer to a payload in the object store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadRef {
    pub key: String,
    pub size: u64,
    pub sha256: String,
}

/// Per-stage durations of one task in milliseconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timing {
    pub fetch: Option<u64>,
    pub render: Option<u64>,
    pub extract: Option<u64>,
    pub total: u64,
}

/// Outcome of one crawl task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlResult {
    pub id: String,
    pub job_id: String,
    pub url: String,
    pub normalized_url: String,
    pub url_hash: String,
    pub final_url: Option<String>,
    pub status_code: Option<u16>,
    pub content_type: Option<String>,
    pub request_used: Option<RequestUsed>,
    pub source_type: SourceType,
    pub content: Option<PayloadRef>,
    pub bytes: Option<PayloadRef>,
    pub links: Vec<String>,
    pub images: Vec<String>,
    pub metadata: Option<BTreeMap<String, String>>,
    pub timing: Timing,
    pub success: bool,
    pub error: Option<TaskError>,
    pub created_at: DateTime<Utc>,
}

impl CrawlResult {
    /// An unsuccessful result for `normalized_url` with nothing filled in yet
    pub fn pending(job_id: &str, normalized_url: &str, url_hash: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            job_id: job_id.to_string(),
            url: normalized_url.to_string(),
            normalized_url: normalized_url.to_string(),
            url_hash: url_hash.to_string(),
            final_url: None,
            status_code: None,
            content_type: None,
            request_used: None,
            source_type: SourceType::Unknown,
            content: None,
            bytes: None,
            links: Vec::new(),
            images: Vec::new(),
            metadata: None,
            timing: Timing::default(),
            success: false,
            error: None,
            created_at: Utc::now(),
        }
    }
}

/// Whether a result write created a row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// A result for this (job, url_hash) already existed; nothing was written
    Duplicate,
}

/// One page of results in `(created_at, id)` order
#[derive(Debug, Clone, Serialize)]
pub struct ResultPage {
    pub results: Vec<CrawlResult>,
    /// Opaque cursor for the next page, absent on the last page
    pub next_cursor: Option<String>,
}

/// Result counts for a job
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResultSummary {
    pub total: u64,
    pub succeeded: u64,
    pub failed: u64,
}
