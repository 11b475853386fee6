//! Crawl engine - job lifecycle on top of the worker pool
//!
//! The engine wires every shared component together once, then exposes the
//! job operations: submit, cancel, status, results and presigned payload
//! access. Tasks run on the worker pool in the background; callers that
//! need to block on a job use [`Engine::wait_for_job`].

use crate::config::{validate, Config};
use crate::crawler::pipeline::Pipeline;
use crate::crawler::scheduler::{CrawlTask, Dispatcher, WorkerPool};
use crate::crawler::task::TaskRunner;
use crate::crawler::{build_http_client, HttpFetcher, RendererClient, Scraper, SmartRouter, SsrfGuard};
use crate::params::CrawlParams;
use crate::robots::RobotsPolicy;
use crate::state::{Coordination, JobStatus};
use crate::storage::{
    FsObjectStore, JobRecord, JobStore, ObjectStore, Presigned, ResultPage, ResultSummary,
    SqliteStorage, StorageError,
};
use crate::url::{extract_host, normalize, url_hash};
use crate::{KumoError, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::atomic::AtomicUsize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// How often finished frontiers and expired cache entries are swept
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Largest page of results returned at once
const MAX_RESULTS_PAGE: usize = 100;

/// Job record plus live progress
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub job: JobRecord,
    pub results: ResultSummary,
    /// Pages admitted so far (seed included)
    pub dispatched: usize,
    /// Tasks queued or waiting for a retry
    pub pending: usize,
}

/// Shared transport and coordination components
pub(crate) struct Components {
    pub coordination: Arc<Coordination>,
    pub pipeline: Arc<Pipeline>,
    pub robots: RobotsPolicy,
}

impl Components {
    /// Builds the HTTP client, SSRF guard, fetcher, renderer client, router
    /// and robots policy over one coordination state
    pub fn build(
        config: &Config,
        objects: Arc<dyn ObjectStore>,
        chrome_depth: Arc<AtomicUsize>,
    ) -> Result<Self> {
        let coordination = Arc::new(Coordination::new(config));
        let guard = Arc::new(SsrfGuard::new(
            Arc::clone(&coordination),
            config.security.allow_private_networks,
        ));
        let client = build_http_client(&config.http)?;

        let fetcher = HttpFetcher::new(client.clone(), Arc::clone(&guard), config.http.max_redirects);
        let renderer = RendererClient::new(
            client.clone(),
            config.renderer.base_url.clone(),
            Arc::clone(&guard),
            Arc::clone(&coordination),
        );
        let router = SmartRouter::new(chrome_depth, config.engine.renderer_queue_backpressure);
        let robots = RobotsPolicy::new(
            client,
            guard,
            Arc::clone(&coordination),
            Duration::from_secs(config.http.robots_timeout_seconds),
        );

        Ok(Self {
            coordination,
            pipeline: Arc::new(Pipeline::new(fetcher, renderer, router, objects)),
            robots,
        })
    }
}

/// Opens the configured object store
pub(crate) fn open_object_store(config: &Config) -> Arc<dyn ObjectStore> {
    Arc::new(FsObjectStore::new(
        &config.storage.object_root,
        &config.storage.public_base_url,
        &config.storage.signing_secret,
    ))
}

/// Main crawl engine
pub struct Engine {
    config: Arc<Config>,
    storage: Arc<Mutex<SqliteStorage>>,
    objects: Arc<dyn ObjectStore>,
    coordination: Arc<Coordination>,
    pipeline: Arc<Pipeline>,
    dispatcher: Dispatcher,
    workers: WorkerPool,
}

impl Engine {
    /// Creates an engine backed by the configured database and object root
    ///
    /// Must be called from within a Tokio runtime; workers start immediately.
    ///
    /// # Arguments
    ///
    /// * `config` - The engine configuration
    ///
    /// # Returns
    ///
    /// * `Ok(Engine)` - Engine with running workers
    /// * `Err(KumoError)` - Invalid configuration or storage could not be opened
    pub fn new(config: Config) -> Result<Self> {
        validate(&config)?;
        let storage = SqliteStorage::new(Path::new(&config.storage.database_path))?;
        let objects = open_object_store(&config);
        Self::with_backends(config, storage, objects)
    }

    /// Creates an engine over explicit backends
    pub fn with_backends(
        config: Config,
        storage: SqliteStorage,
        objects: Arc<dyn ObjectStore>,
    ) -> Result<Self> {
        let config = Arc::new(config);
        let dispatcher = Dispatcher::new();
        let components = Components::build(
            &config,
            Arc::clone(&objects),
            dispatcher.chrome_queue().depth_gauge(),
        )?;
        let storage = Arc::new(Mutex::new(storage));

        let runner = Arc::new(TaskRunner::new(
            Arc::clone(&config),
            Arc::clone(&storage),
            Arc::clone(&components.coordination),
            Arc::clone(&components.pipeline),
            components.robots,
            dispatcher.clone(),
        ));

        let mut workers = WorkerPool::start(
            &dispatcher,
            runner,
            config.engine.http_workers,
            config.engine.chrome_workers,
        );
        workers.attach(spawn_sweeper(
            Arc::clone(&components.coordination),
            Duration::from_secs(config.engine.frontier_retention_seconds),
        ));

        tracing::info!(
            "Engine started ({} http workers, {} chrome workers)",
            config.engine.http_workers,
            config.engine.chrome_workers
        );

        Ok(Self {
            config,
            storage,
            objects,
            coordination: components.coordination,
            pipeline: components.pipeline,
            dispatcher,
            workers,
        })
    }

    // ===== Job Operations =====

    /// Validates parameters, creates a job and dispatches its seed
    ///
    /// A repeat submission with the same tenant, parameters and idempotency
    /// key inside the idempotency window returns the original job id.
    ///
    /// # Arguments
    ///
    /// * `tenant_id` - Owner of the job
    /// * `params` - Crawl parameters
    /// * `idempotency_key` - Optional client-supplied deduplication key
    ///
    /// # Returns
    ///
    /// * `Ok(String)` - The job id (`crawl_<uuid>`)
    /// * `Err(KumoError)` - Invalid parameters or storage failure
    pub fn submit(
        &self,
        tenant_id: &str,
        params: CrawlParams,
        idempotency_key: Option<&str>,
    ) -> Result<String> {
        params.validate()?;

        let job_id = format!("crawl_{}", uuid::Uuid::new_v4());

        let fingerprint = idempotency_key
            .map(|key| submission_fingerprint(tenant_id, &params, key))
            .transpose()?;
        if let Some(fingerprint) = &fingerprint {
            let owner = self
                .coordination
                .idempotency
                .get_or_insert(fingerprint.clone(), job_id.clone());
            if owner != job_id {
                tracing::info!("Idempotent resubmission of {}", owner);
                return Ok(owner);
            }
        }

        let created = self.create_and_seed(&job_id, tenant_id, params, idempotency_key);
        if created.is_err() {
            if let Some(fingerprint) = &fingerprint {
                self.coordination.idempotency.remove(fingerprint);
            }
        }
        created.map(|()| job_id)
    }

    fn create_and_seed(
        &self,
        job_id: &str,
        tenant_id: &str,
        params: CrawlParams,
        idempotency_key: Option<&str>,
    ) -> Result<()> {
        let seed = normalize(&params.url);
        let host = extract_host(&seed).ok_or_else(|| {
            KumoError::InvalidParams(format!("Seed URL has no host: {}", params.url))
        })?;
        let max_limit = params.effective_limit(&self.config.engine);
        let mode = params.request;

        let job = JobRecord::new(
            job_id,
            tenant_id,
            params,
            idempotency_key.map(str::to_string),
        );
        {
            let mut storage = self.lock_storage();
            storage.create_job(&job)?;
            storage.update_job_status(job_id, JobStatus::Running, None)?;
        }

        let frontier = self.coordination.create_frontier(job_id, &host, max_limit);
        // The seed counts toward the page limit
        frontier.admit(&url_hash(&seed));

        tracing::info!("Job {} submitted for {} (limit {})", job_id, seed, max_limit);

        self.dispatcher.dispatch(
            CrawlTask {
                job_id: job_id.to_string(),
                tenant_id: tenant_id.to_string(),
                url: seed,
                depth: 0,
                retry_count: 0,
            },
            mode,
            &frontier,
        );

        Ok(())
    }

    /// Cancels a job; queued and in-flight tasks become no-ops
    ///
    /// # Returns
    ///
    /// `true` if the job was active and is now canceled
    pub fn cancel(&self, job_id: &str) -> Result<bool> {
        let canceled = self.lock_storage().cancel_job(job_id).map_err(not_found)?;

        if let Some(frontier) = self.coordination.frontier(job_id) {
            frontier.halt();
            if frontier.pending() == 0 {
                frontier.mark_finished();
            }
        }

        if canceled {
            tracing::info!("Job {} canceled", job_id);
        }
        Ok(canceled)
    }

    /// Current job record with result counts and live progress
    pub fn status(&self, job_id: &str) -> Result<JobSnapshot> {
        let (job, results) = {
            let storage = self.lock_storage();
            let job = storage.get_job(job_id).map_err(not_found)?;
            let results = storage.count_results(job_id)?;
            (job, results)
        };

        let (dispatched, pending) = self
            .coordination
            .frontier(job_id)
            .map(|f| (f.dispatched(), f.pending()))
            .unwrap_or((0, 0));

        Ok(JobSnapshot {
            job,
            results,
            dispatched,
            pending,
        })
    }

    /// Lists a job's results in `(created_at, id)` order
    ///
    /// # Arguments
    ///
    /// * `job_id` - The job
    /// * `cursor` - Cursor from the previous page
    /// * `limit` - Page size, 1 to 100
    pub fn results(&self, job_id: &str, cursor: Option<&str>, limit: usize) -> Result<ResultPage> {
        if !(1..=MAX_RESULTS_PAGE).contains(&limit) {
            return Err(KumoError::InvalidParams(format!(
                "limit must be between 1 and {}, got {}",
                MAX_RESULTS_PAGE, limit
            )));
        }

        let storage = self.lock_storage();
        storage.get_job(job_id).map_err(not_found)?;
        Ok(storage.list_results(job_id, cursor, limit)?)
    }

    /// Issues a presigned download URL for a stored payload
    pub fn presign(&self, key: &str) -> Result<Presigned> {
        let ttl = Duration::from_secs(self.config.storage.presign_ttl_seconds);
        Ok(self.objects.presign_get(key, ttl)?)
    }

    /// Reads a stored payload
    pub async fn read_object(&self, key: &str) -> Result<Vec<u8>> {
        Ok(self.objects.get(key).await?)
    }

    /// Polls until the job reaches a terminal status or `timeout` elapses
    ///
    /// # Returns
    ///
    /// The latest job record, terminal or not
    pub async fn wait_for_job(&self, job_id: &str, timeout: Duration) -> Result<JobRecord> {
        let deadline = Instant::now() + timeout;
        loop {
            let job = self.lock_storage().get_job(job_id).map_err(not_found)?;
            if job.status.is_terminal() || Instant::now() >= deadline {
                return Ok(job);
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// A synchronous scraper sharing this engine's components
    pub fn scraper(&self) -> Scraper {
        Scraper::from_parts(Arc::clone(&self.config), Arc::clone(&self.pipeline))
    }

    /// Collects finished frontiers and expired cache entries now
    ///
    /// # Returns
    ///
    /// Number of frontiers collected
    pub fn sweep(&self) -> usize {
        self.coordination.purge_caches();
        self.coordination
            .sweep_frontiers(Duration::from_secs(self.config.engine.frontier_retention_seconds))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Stops all workers; queued tasks are abandoned
    pub fn shutdown(&mut self) {
        self.workers.shutdown();
        tracing::info!("Engine stopped");
    }

    fn lock_storage(&self) -> MutexGuard<'_, SqliteStorage> {
        self.storage
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn spawn_sweeper(
    coordination: Arc<Coordination>,
    retention: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            ticker.tick().await;
            let purged = coordination.purge_caches();
            let collected = coordination.sweep_frontiers(retention);
            if purged + collected > 0 {
                tracing::debug!(
                    "Swept {} cache entries and {} frontiers",
                    purged,
                    collected
                );
            }
        }
    })
}

/// Identity of a submission for idempotency purposes
fn submission_fingerprint(tenant_id: &str, params: &CrawlParams, key: &str) -> Result<String> {
    let mut hasher = Sha256::new();
    hasher.update(tenant_id.as_bytes());
    hasher.update(b"|");
    hasher.update(serde_json::to_vec(params)?);
    hasher.update(b"|");
    hasher.update(key.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

fn not_found(e: StorageError) -> KumoError {
    match e {
        StorageError::JobNotFound(id) => KumoError::JobNotFound(id),
        other => KumoError::Storage(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{PoliteConfig, RequestMode, RequestUsed, ReturnFormat};
    use crate::ErrorCode;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn engine(dir: &TempDir) -> Engine {
        let config = Config::default();
        let objects: Arc<dyn ObjectStore> =
            Arc::new(FsObjectStore::new(dir.path(), "http://objects.test", "secret"));
        Engine::with_backends(config, SqliteStorage::new_in_memory().unwrap(), objects).unwrap()
    }

    #[test]
    fn test_fingerprint_depends_on_all_parts() {
        let params = CrawlParams::new("https://example.com");
        let a = submission_fingerprint("t1", &params, "k").unwrap();
        assert_eq!(a, submission_fingerprint("t1", &params, "k").unwrap());
        assert_ne!(a, submission_fingerprint("t2", &params, "k").unwrap());
        assert_ne!(a, submission_fingerprint("t1", &params, "other").unwrap());

        let mut deeper = params.clone();
        deeper.depth = 5;
        assert_ne!(a, submission_fingerprint("t1", &deeper, "k").unwrap());
    }

    #[tokio::test]
    async fn test_submit_rejects_invalid_params() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);

        let mut params = CrawlParams::new("https://example.com");
        params.limit = 5000;
        assert!(matches!(
            engine.submit("t1", params, None),
            Err(KumoError::InvalidParams(_))
        ));

        let params = CrawlParams::new("ftp://example.com/file");
        assert!(engine.submit("t1", params, None).is_err());
    }

    #[tokio::test]
    async fn test_unknown_job() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);

        assert!(matches!(engine.status("crawl_missing"), Err(KumoError::JobNotFound(_))));
        assert!(matches!(engine.cancel("crawl_missing"), Err(KumoError::JobNotFound(_))));
        assert!(matches!(
            engine.results("crawl_missing", None, 10),
            Err(KumoError::JobNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_results_limit_bounds() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);

        assert!(matches!(
            engine.results("crawl_x", None, 0),
            Err(KumoError::InvalidParams(_))
        ));
        assert!(matches!(
            engine.results("crawl_x", None, 101),
            Err(KumoError::InvalidParams(_))
        ));
    }

    #[tokio::test]
    async fn test_submit_marks_running_and_counts_seed() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);

        // Private target: the task fails fast with SSRF_BLOCKED
        let mut params = CrawlParams::new("http://127.0.0.1:9/");
        params.request = crate::params::RequestMode::Http;
        let job_id = engine.submit("t1", params, None).unwrap();
        assert!(job_id.starts_with("crawl_"));

        let snapshot = engine.status(&job_id).unwrap();
        assert_eq!(snapshot.dispatched, 1);
        assert!(matches!(
            snapshot.job.status,
            JobStatus::Running | JobStatus::Completed
        ));
    }

    #[tokio::test]
    async fn test_presign_uses_configured_ttl() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);

        let presigned = engine.presign("t1/crawl_1/content/abc.txt").unwrap();
        let ttl = presigned.expires_at - chrono::Utc::now();
        assert!(ttl.num_seconds() > 590 && ttl.num_seconds() <= 600);
    }

    /// Engine allowed to reach loopback mock servers, with fast retries
    fn local_engine(dir: &TempDir, tweak: impl FnOnce(&mut Config)) -> Engine {
        let mut config = Config::default();
        config.security.allow_private_networks = true;
        config.engine.retry_base_delay_ms = 20;
        tweak(&mut config);

        let objects: Arc<dyn ObjectStore> =
            Arc::new(FsObjectStore::new(dir.path(), "http://objects.test", "secret"));
        Engine::with_backends(config, SqliteStorage::new_in_memory().unwrap(), objects).unwrap()
    }

    fn local_params(seed: String, mode: RequestMode) -> CrawlParams {
        let mut params = CrawlParams::new(seed);
        params.depth = 1;
        params.limit = 10;
        params.request = mode;
        params.return_format = ReturnFormat::Text;
        params.polite = PoliteConfig {
            per_host_delay_ms: 100,
            jitter_ratio: 0.0,
            max_retries: 10,
        };
        params
    }

    fn page_linking(links: &[&str]) -> String {
        let anchors: String = links
            .iter()
            .map(|href| format!(r#"<a href="{}">{}</a>"#, href, href))
            .collect();
        format!(
            "<html><head><title>Page</title></head><body><p>{}</p>{}</body></html>",
            "Static text that reads fine without a browser. ".repeat(5),
            anchors
        )
    }

    #[tokio::test]
    async fn test_runtime_cap_fails_job_and_halts_frontier() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(page_linking(&["/busy", "/ok"]), "text/html"),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/ok"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(page_linking(&[]), "text/html"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/busy"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let engine = local_engine(&dir, |_| {});

        let mut params = local_params(format!("{}/", server.uri()), RequestMode::Http);
        params.max_runtime_seconds = Some(1);
        let job_id = engine.submit("t1", params, None).unwrap();

        // /busy keeps getting rescheduled until a retry starts past the cap
        let job = engine
            .wait_for_job(&job_id, Duration::from_secs(15))
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(
            job.error.map(|e| e.code),
            Some(ErrorCode::MaxRuntimeExceeded)
        );
        assert!(engine.coordination.frontier(&job_id).unwrap().is_halted());

        let results = engine.results(&job_id, None, 100).unwrap().results;
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| !r.url.ends_with("/busy")));

        tokio::time::sleep(Duration::from_millis(300)).await;
        let snapshot = engine.status(&job_id).unwrap();
        assert_eq!(snapshot.results.total, 2);
        assert_eq!(snapshot.job.status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn test_chrome_crawl_uses_chrome_queue() {
        let origin = MockServer::start().await;
        for page in ["/", "/a", "/b"] {
            Mock::given(method("GET"))
                .and(path(page))
                .respond_with(ResponseTemplate::new(200))
                .expect(0)
                .mount(&origin)
                .await;
        }

        let renderer = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/render"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({
                        "status_code": 200,
                        "content_type": "text/html",
                        "html": page_linking(&["/a", "/b"])
                    }))
                    .set_delay(Duration::from_millis(300)),
            )
            .expect(3)
            .mount(&renderer)
            .await;

        let dir = TempDir::new().unwrap();
        let renderer_url = renderer.uri();
        let engine = local_engine(&dir, |config| {
            config.renderer.base_url = Some(renderer_url);
            config.engine.chrome_workers = 1;
        });

        let job_id = engine
            .submit(
                "t1",
                local_params(format!("{}/", origin.uri()), RequestMode::Chrome),
                None,
            )
            .unwrap();

        // One chrome worker renders serially, so the second link waits in
        // the chrome queue while the first is rendered
        let mut chrome_backlog = false;
        let deadline = Instant::now() + Duration::from_secs(20);
        loop {
            chrome_backlog |= engine.dispatcher.chrome_queue().depth() > 0;
            assert_eq!(engine.dispatcher.http_queue().depth(), 0);
            if engine.status(&job_id).unwrap().job.status.is_terminal() {
                break;
            }
            assert!(Instant::now() < deadline, "job did not finish");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert!(chrome_backlog);
        let snapshot = engine.status(&job_id).unwrap();
        assert_eq!(snapshot.job.status, JobStatus::Completed);

        let results = engine.results(&job_id, None, 100).unwrap().results;
        assert_eq!(results.len(), 3);
        assert!(results
            .iter()
            .all(|r| r.success && r.request_used == Some(RequestUsed::Chrome)));
    }
}
