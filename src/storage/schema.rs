//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the Kumo database.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Crawl jobs and their lifecycle
CREATE TABLE IF NOT EXISTS crawl_jobs (
    id TEXT PRIMARY KEY,
    tenant_id TEXT NOT NULL,
    params_json TEXT NOT NULL,
    status TEXT NOT NULL,
    error_json TEXT,
    idempotency_key TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    canceled_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_crawl_jobs_tenant ON crawl_jobs(tenant_id);
CREATE INDEX IF NOT EXISTS idx_crawl_jobs_status ON crawl_jobs(status);

-- One result per crawled URL per job
CREATE TABLE IF NOT EXISTS crawl_results (
    id TEXT PRIMARY KEY,
    job_id TEXT NOT NULL REFERENCES crawl_jobs(id),
    url TEXT NOT NULL,
    normalized_url TEXT NOT NULL,
    url_hash TEXT NOT NULL,
    final_url TEXT,
    status_code INTEGER,
    content_type TEXT,
    request_used TEXT,
    source_type TEXT NOT NULL,
    content_key TEXT,
    content_size INTEGER,
    content_sha256 TEXT,
    bytes_key TEXT,
    bytes_size INTEGER,
    bytes_sha256 TEXT,
    metadata_json TEXT,
    links_json TEXT NOT NULL,
    images_json TEXT NOT NULL,
    timing_json TEXT NOT NULL,
    success INTEGER NOT NULL,
    error_json TEXT,
    created_at TEXT NOT NULL,
    UNIQUE(job_id, url_hash)
);

CREATE INDEX IF NOT EXISTS idx_crawl_results_order ON crawl_results(job_id, created_at, id);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
