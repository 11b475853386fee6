//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the JobStore trait.

use crate::extract::SourceType;
use crate::params::RequestUsed;
use crate::state::JobStatus;
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{JobStore, StorageError, StorageResult};
use crate::storage::{
    CrawlResult, InsertOutcome, JobRecord, PayloadRef, ResultPage, ResultSummary, Timing,
};
use crate::TaskError;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;

const RESULT_COLUMNS: &str = "id, job_id, url, normalized_url, url_hash, final_url, status_code,
     content_type, request_used, source_type, content_key, content_size, content_sha256,
     bytes_key, bytes_size, bytes_sha256, metadata_json, links_json, images_json, timing_json,
     success, error_json, created_at";

/// Position after the last row of a results page
#[derive(Debug, Serialize, Deserialize)]
struct Cursor {
    created_at: String,
    id: String,
}

impl Cursor {
    fn encode(&self) -> StorageResult<String> {
        Ok(URL_SAFE_NO_PAD.encode(serde_json::to_vec(self)?))
    }

    fn decode(raw: &str) -> StorageResult<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(raw)
            .map_err(|e| StorageError::InvalidCursor(e.to_string()))?;
        serde_json::from_slice(&bytes).map_err(|e| StorageError::InvalidCursor(e.to_string()))
    }
}

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Creates a new SqliteStorage instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStorage)` - Successfully opened/created database
    /// * `Err(StorageError)` - Failed to open database
    pub fn new(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }
}

impl JobStore for SqliteStorage {
    // ===== Job Management =====

    fn create_job(&mut self, job: &JobRecord) -> StorageResult<()> {
        let error_json = job.error.as_ref().map(serde_json::to_string).transpose()?;
        self.conn.execute(
            "INSERT INTO crawl_jobs (id, tenant_id, params_json, status, error_json,
             idempotency_key, created_at, updated_at, canceled_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                job.id,
                job.tenant_id,
                serde_json::to_string(&job.params)?,
                job.status.to_db_string(),
                error_json,
                job.idempotency_key,
                timestamp(&job.created_at),
                timestamp(&job.updated_at),
                job.canceled_at.as_ref().map(timestamp),
            ],
        )?;
        Ok(())
    }

    fn get_job(&self, job_id: &str) -> StorageResult<JobRecord> {
        let mut stmt = self.conn.prepare(
            "SELECT id, tenant_id, params_json, status, error_json, idempotency_key,
             created_at, updated_at, canceled_at
             FROM crawl_jobs WHERE id = ?1",
        )?;

        stmt.query_row(params![job_id], |row| {
            Ok(JobRecord {
                id: row.get(0)?,
                tenant_id: row.get(1)?,
                params: json_column(row, 2)?,
                status: JobStatus::from_db_string(&row.get::<_, String>(3)?)
                    .unwrap_or(JobStatus::Failed),
                error: optional_json_column(row, 4)?,
                idempotency_key: row.get(5)?,
                created_at: timestamp_column(row, 6)?,
                updated_at: timestamp_column(row, 7)?,
                canceled_at: optional_timestamp_column(row, 8)?,
            })
        })
        .optional()?
        .ok_or_else(|| StorageError::JobNotFound(job_id.to_string()))
    }

    fn update_job_status(
        &mut self,
        job_id: &str,
        status: JobStatus,
        error: Option<&TaskError>,
    ) -> StorageResult<()> {
        let current = self.get_job(job_id)?.status;
        if !current.can_transition_to(status) {
            return Err(StorageError::InvalidTransition {
                from: current,
                to: status,
            });
        }

        let error_json = error.map(serde_json::to_string).transpose()?;
        self.conn.execute(
            "UPDATE crawl_jobs SET status = ?1, error_json = COALESCE(?2, error_json),
             updated_at = ?3 WHERE id = ?4",
            params![status.to_db_string(), error_json, timestamp(&Utc::now()), job_id],
        )?;
        Ok(())
    }

    fn cancel_job(&mut self, job_id: &str) -> StorageResult<bool> {
        let current = self.get_job(job_id)?.status;
        if !current.can_transition_to(JobStatus::Canceled) {
            return Ok(false);
        }

        let now = timestamp(&Utc::now());
        self.conn.execute(
            "UPDATE crawl_jobs SET status = ?1, canceled_at = ?2, updated_at = ?2 WHERE id = ?3",
            params![JobStatus::Canceled.to_db_string(), now, job_id],
        )?;
        Ok(true)
    }

    // ===== Results =====

    fn insert_result(&mut self, result: &CrawlResult) -> StorageResult<InsertOutcome> {
        let content = result.content.as_ref();
        let bytes = result.bytes.as_ref();

        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO crawl_results (id, job_id, url, normalized_url, url_hash,
             final_url, status_code, content_type, request_used, source_type, content_key,
             content_size, content_sha256, bytes_key, bytes_size, bytes_sha256, metadata_json,
             links_json, images_json, timing_json, success, error_json, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
             ?17, ?18, ?19, ?20, ?21, ?22, ?23)",
            params![
                result.id,
                result.job_id,
                result.url,
                result.normalized_url,
                result.url_hash,
                result.final_url,
                result.status_code,
                result.content_type,
                result.request_used.map(|r| r.as_str()),
                result.source_type.as_str(),
                content.map(|p| p.key.as_str()),
                content.map(|p| p.size as i64),
                content.map(|p| p.sha256.as_str()),
                bytes.map(|p| p.key.as_str()),
                bytes.map(|p| p.size as i64),
                bytes.map(|p| p.sha256.as_str()),
                result.metadata.as_ref().map(serde_json::to_string).transpose()?,
                serde_json::to_string(&result.links)?,
                serde_json::to_string(&result.images)?,
                serde_json::to_string(&result.timing)?,
                result.success,
                result.error.as_ref().map(serde_json::to_string).transpose()?,
                timestamp(&result.created_at),
            ],
        )?;

        if inserted == 0 {
            tracing::debug!(
                "Result for {} in job {} already stored",
                result.normalized_url,
                result.job_id
            );
            Ok(InsertOutcome::Duplicate)
        } else {
            Ok(InsertOutcome::Inserted)
        }
    }

    fn get_result(&self, job_id: &str, url_hash: &str) -> StorageResult<Option<CrawlResult>> {
        let sql = format!(
            "SELECT {} FROM crawl_results WHERE job_id = ?1 AND url_hash = ?2",
            RESULT_COLUMNS
        );
        let result = self
            .conn
            .query_row(&sql, params![job_id, url_hash], result_from_row)
            .optional()?;
        Ok(result)
    }

    fn list_results(
        &self,
        job_id: &str,
        cursor: Option<&str>,
        limit: usize,
    ) -> StorageResult<ResultPage> {
        let after = match cursor {
            Some(raw) => Cursor::decode(raw)?,
            None => Cursor {
                created_at: String::new(),
                id: String::new(),
            },
        };

        let sql = format!(
            "SELECT {} FROM crawl_results
             WHERE job_id = ?1 AND (created_at > ?2 OR (created_at = ?2 AND id > ?3))
             ORDER BY created_at, id
             LIMIT ?4",
            RESULT_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;

        // One extra row tells us whether another page exists
        let mut results = stmt
            .query_map(
                params![job_id, after.created_at, after.id, (limit + 1) as i64],
                result_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;

        let next_cursor = if results.len() > limit {
            results.truncate(limit);
            results
                .last()
                .map(|last| {
                    Cursor {
                        created_at: timestamp(&last.created_at),
                        id: last.id.clone(),
                    }
                    .encode()
                })
                .transpose()?
        } else {
            None
        };

        Ok(ResultPage {
            results,
            next_cursor,
        })
    }

    // ===== Statistics =====

    fn count_results(&self, job_id: &str) -> StorageResult<ResultSummary> {
        let (total, succeeded): (i64, i64) = self.conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(success), 0) FROM crawl_results WHERE job_id = ?1",
            params![job_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        Ok(ResultSummary {
            total: total as u64,
            succeeded: succeeded as u64,
            failed: (total - succeeded) as u64,
        })
    }
}

// ===== Row Mapping =====

/// Fixed-width RFC 3339 so lexical order matches time order
fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn conversion_error(
    idx: usize,
    e: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

fn timestamp_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

fn optional_timestamp_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| conversion_error(idx, e))
    })
    .transpose()
}

fn json_column<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| conversion_error(idx, e))
}

fn optional_json_column<T: DeserializeOwned>(
    row: &Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<T>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| serde_json::from_str(&s).map_err(|e| conversion_error(idx, e)))
        .transpose()
}

fn payload_columns(row: &Row<'_>, first: usize) -> rusqlite::Result<Option<PayloadRef>> {
    let key: Option<String> = row.get(first)?;
    let size: Option<i64> = row.get(first + 1)?;
    let sha256: Option<String> = row.get(first + 2)?;

    Ok(key.map(|key| PayloadRef {
        key,
        size: size.unwrap_or(0) as u64,
        sha256: sha256.unwrap_or_default(),
    }))
}

fn result_from_row(row: &Row<'_>) -> rusqlite::Result<CrawlResult> {
    let request_used: Option<String> = row.get(8)?;
    let source_type: String = row.get(9)?;
    let timing: Timing = json_column(row, 19)?;

    Ok(CrawlResult {
        id: row.get(0)?,
        job_id: row.get(1)?,
        url: row.get(2)?,
        normalized_url: row.get(3)?,
        url_hash: row.get(4)?,
        final_url: row.get(5)?,
        status_code: row.get(6)?,
        content_type: row.get(7)?,
        request_used: request_used.as_deref().and_then(RequestUsed::from_db_string),
        source_type: SourceType::from_db_string(&source_type).unwrap_or(SourceType::Unknown),
        content: payload_columns(row, 10)?,
        bytes: payload_columns(row, 13)?,
        metadata: optional_json_column(row, 16)?,
        links: json_column(row, 17)?,
        images: json_column(row, 18)?,
        timing,
        success: row.get(20)?,
        error: optional_json_column(row, 21)?,
        created_at: timestamp_column(row, 22)?,
    })
}
