//! Storage traits and error types
//!
//! This module defines the trait interface for job/result backends and
//! associated error types.

use crate::state::JobStatus;
use crate::storage::{CrawlResult, InsertOutcome, JobRecord, ResultPage, ResultSummary};
use crate::{ErrorCode, TaskError};
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Invalid state transition: {from:?} -> {to:?}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("Invalid cursor: {0}")]
    InvalidCursor(String),

    #[error("Invalid object key: {0}")]
    InvalidKey(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl StorageError {
    pub fn code(&self) -> ErrorCode {
        ErrorCode::StorageError
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for job and result persistence backends
pub trait JobStore {
    // ===== Job Management =====

    /// Persists a new job record
    fn create_job(&mut self, job: &JobRecord) -> StorageResult<()>;

    /// Gets a job by ID
    fn get_job(&self, job_id: &str) -> StorageResult<JobRecord>;

    /// Moves a job to `status`
    ///
    /// # Arguments
    ///
    /// * `job_id` - Job to update
    /// * `status` - Target status; must be a legal transition from the current one
    /// * `error` - Error payload recorded alongside a failed status
    ///
    /// # Returns
    ///
    /// * `Ok(())` - Status updated
    /// * `Err(StorageError::InvalidTransition)` - The job is not allowed to move there
    fn update_job_status(
        &mut self,
        job_id: &str,
        status: JobStatus,
        error: Option<&TaskError>,
    ) -> StorageResult<()>;

    /// Cancels an active job
    ///
    /// # Returns
    ///
    /// `true` if the job was canceled now, `false` if it was already terminal
    fn cancel_job(&mut self, job_id: &str) -> StorageResult<bool>;

    // ===== Results =====

    /// Inserts a result unless one already exists for (job_id, url_hash)
    fn insert_result(&mut self, result: &CrawlResult) -> StorageResult<InsertOutcome>;

    /// Gets the result for one URL of a job
    fn get_result(&self, job_id: &str, url_hash: &str) -> StorageResult<Option<CrawlResult>>;

    /// Lists results in `(created_at, id)` order
    ///
    /// # Arguments
    ///
    /// * `job_id` - Job whose results are listed
    /// * `cursor` - Cursor returned with the previous page, if any
    /// * `limit` - Page size
    fn list_results(
        &self,
        job_id: &str,
        cursor: Option<&str>,
        limit: usize,
    ) -> StorageResult<ResultPage>;

    // ===== Statistics =====

    /// Counts results by outcome
    fn count_results(&self, job_id: &str) -> StorageResult<ResultSummary>;
}
