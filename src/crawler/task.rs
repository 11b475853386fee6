//! Per-task crawl algorithm
//!
//! A task is one URL of one job. Running it decides whether the URL may be
//! fetched at all (job state, runtime cap, scope, robots.txt), waits out
//! host politeness, acquires and extracts the page, persists exactly one
//! result, and feeds newly discovered links back through the frontier.

use crate::config::Config;
use crate::crawler::pipeline::{elapsed_ms, Acquired, FetchPlan, Pipeline};
use crate::crawler::scheduler::{CrawlTask, Dispatcher, TaskHandler};
use crate::crawler::PolitenessLimiter;
use crate::extract::SourceType;
use crate::params::CrawlParams;
use crate::robots::RobotsPolicy;
use crate::state::{Admission, Coordination, Frontier, JobStatus};
use crate::storage::{CrawlResult, InsertOutcome, JobRecord, JobStore, SqliteStorage};
use crate::url::{extract_host, normalize, parse_http_url, same_host, url_hash, PatternFilter};
use crate::{ErrorCode, TaskError};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Why a task ended without writing a result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Job missing, canceled, halted or already terminal
    JobInactive,
    /// Host differs from the seed host
    OffDomain,
    /// robots.txt disallows the path
    Robots,
}

/// What running a task led to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// A result was written (or already existed)
    Stored { success: bool, enqueued: usize },
    Skipped(SkipReason),
    /// Rescheduled after a 429/503
    Retried { delay: Duration },
    /// Runtime cap hit; the job is now failed
    JobFailed,
    /// Job was canceled while the task was in flight
    Discarded,
}

/// Executes crawl tasks against shared components
pub struct TaskRunner {
    config: Arc<Config>,
    storage: Arc<Mutex<SqliteStorage>>,
    coordination: Arc<Coordination>,
    pipeline: Arc<Pipeline>,
    robots: RobotsPolicy,
    politeness: PolitenessLimiter,
    dispatcher: Dispatcher,
}

impl TaskRunner {
    pub fn new(
        config: Arc<Config>,
        storage: Arc<Mutex<SqliteStorage>>,
        coordination: Arc<Coordination>,
        pipeline: Arc<Pipeline>,
        robots: RobotsPolicy,
        dispatcher: Dispatcher,
    ) -> Self {
        let politeness = PolitenessLimiter::new(Arc::clone(&coordination));
        Self {
            config,
            storage,
            coordination,
            pipeline,
            robots,
            politeness,
            dispatcher,
        }
    }

    /// Runs one task to completion
    ///
    /// # Task Flow
    ///
    /// 1. Skip if the job is gone, canceled or terminal; fail the job once
    ///    its runtime cap has passed
    /// 2. Normalize; skip hosts outside the seed host when scoped
    /// 3. Skip paths robots.txt disallows
    /// 4. Wait for the host's politeness slot
    /// 5. Acquire the page (HTTP, renderer, or HTTP with escalation)
    /// 6. Reschedule 429/503 with exponential backoff while retries remain
    /// 7. Extract, store payloads, persist the result
    /// 8. Enqueue admissible links one level deeper
    pub async fn run(&self, task: &CrawlTask) -> TaskOutcome {
        let Some((job, frontier)) = self.active_job(&task.job_id) else {
            return TaskOutcome::Skipped(SkipReason::JobInactive);
        };
        let params = &job.params;

        let runtime_cap = params.effective_runtime_seconds(&self.config.engine);
        let elapsed = Utc::now().signed_duration_since(job.created_at);
        if elapsed.num_milliseconds() > (runtime_cap as i64).saturating_mul(1000) {
            tracing::warn!("Job {} exceeded its {}s runtime cap", job.id, runtime_cap);
            frontier.halt();
            let error = TaskError::new(ErrorCode::MaxRuntimeExceeded, "Crawl runtime exceeded");
            self.finish_job(&job.id, JobStatus::Failed, Some(&error));
            return TaskOutcome::JobFailed;
        }

        let normalized = normalize(&task.url);
        let host = extract_host(&normalized).unwrap_or_default();

        if params.same_domain_only && !same_host(&normalized, frontier.host()) {
            tracing::debug!("Skipping off-domain {}", normalized);
            return TaskOutcome::Skipped(SkipReason::OffDomain);
        }

        if !self.robots.is_allowed(&normalized).await {
            tracing::info!("URL {} disallowed by robots.txt", normalized);
            return TaskOutcome::Skipped(SkipReason::Robots);
        }

        self.politeness.throttle(&host, &params.polite).await;

        let started = Instant::now();
        let plan = self.fetch_plan(params);
        let mut result = CrawlResult::pending(&job.id, &normalized, &url_hash(&normalized));

        let page = match self.pipeline.acquire(&normalized, &plan, &mut result.timing).await {
            Acquired::Page(page) => page,
            Acquired::Throttled(error) => {
                if task.retry_count < params.polite.max_retries {
                    let delay =
                        backoff_delay(self.config.engine.retry_base_delay_ms, task.retry_count);
                    tracing::info!(
                        "{} for {}, retry {} in {:?}",
                        error.message,
                        normalized,
                        task.retry_count + 1,
                        delay
                    );
                    self.dispatcher.dispatch_after(
                        task.retried(),
                        params.request,
                        delay,
                        Arc::clone(&frontier),
                    );
                    return TaskOutcome::Retried { delay };
                }
                result.error = Some(error);
                return self.persist(&job, result, started);
            }
            Acquired::Failed(error) => {
                tracing::debug!("Fetch failed for {}: {}", normalized, error);
                result.error = Some(error);
                return self.persist(&job, result, started);
            }
        };

        result.final_url = Some(page.final_url.clone());
        result.status_code = Some(page.status_code);
        result.content_type = Some(page.content_type.clone());
        result.request_used = Some(page.request_used);

        let processed = self.pipeline.process(&page, &plan, &mut result.timing).await;
        result.source_type = processed.source_type;
        result.links = processed.links;
        result.images = processed.images;
        result.metadata = processed.metadata;
        result.error = processed.error;

        if result.error.is_none() {
            match self
                .pipeline
                .store_payload(&job.tenant_id, &job.id, &processed.payload)
                .await
            {
                Ok((content, bytes)) => {
                    result.content = content;
                    result.bytes = bytes;
                    result.success = true;
                }
                Err(error) => result.error = Some(error),
            }
        }

        let expand = result.success && result.source_type == SourceType::Html;
        let links = result.links.clone();

        let outcome = self.persist(&job, result, started);
        if let TaskOutcome::Stored { success, .. } = outcome {
            let enqueued = if expand {
                self.enqueue_links(task, params, &frontier, &links)
            } else {
                0
            };
            return TaskOutcome::Stored { success, enqueued };
        }
        outcome
    }

    /// Loads the job and its frontier if the job can still make progress
    fn active_job(&self, job_id: &str) -> Option<(JobRecord, Arc<Frontier>)> {
        let job = match self.lock_storage().get_job(job_id) {
            Ok(job) => job,
            Err(e) => {
                tracing::warn!("Dropping task for job {}: {}", job_id, e);
                return None;
            }
        };

        if job.status.is_terminal() || job.canceled_at.is_some() {
            return None;
        }

        let frontier = self.coordination.frontier(job_id)?;
        if frontier.is_halted() {
            return None;
        }

        Some((job, frontier))
    }

    fn fetch_plan(&self, params: &CrawlParams) -> FetchPlan {
        FetchPlan {
            mode: params.request,
            format: params.return_format,
            http_timeout_ms: params
                .timeout_ms
                .unwrap_or(self.config.http.default_timeout_ms),
            render_timeout_ms: params
                .timeout_ms
                .unwrap_or(self.config.renderer.default_timeout_ms),
            max_bytes: params.max_bytes,
            wait_for: params.wait_for.clone(),
            scroll: params.scroll,
            include_pdf: params.include_pdf,
            metadata: params.metadata,
            retry_throttled: true,
        }
    }

    /// Writes the result unless the job was canceled meanwhile
    fn persist(&self, job: &JobRecord, mut result: CrawlResult, started: Instant) -> TaskOutcome {
        result.timing.total = elapsed_ms(started);
        let success = result.success;

        let mut storage = self.lock_storage();
        match storage.get_job(&job.id) {
            Ok(current) if current.status.is_terminal() || current.canceled_at.is_some() => {
                tracing::debug!("Job {} ended while {} was in flight", job.id, result.url);
                return TaskOutcome::Discarded;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("Job {} vanished: {}", job.id, e);
                return TaskOutcome::Discarded;
            }
        }

        match storage.insert_result(&result) {
            Ok(InsertOutcome::Inserted) => {
                tracing::info!(
                    "Stored {} for {} ({})",
                    if success { "result" } else { "failure" },
                    result.url,
                    job.id
                );
            }
            Ok(InsertOutcome::Duplicate) => {
                tracing::debug!("Duplicate result for {} ignored", result.url);
            }
            Err(e) => {
                tracing::error!("Failed to persist result for {}: {}", result.url, e);
            }
        }

        TaskOutcome::Stored {
            success,
            enqueued: 0,
        }
    }

    /// Admits discovered links through the frontier and dispatches them
    ///
    /// # Returns
    ///
    /// Number of tasks enqueued
    fn enqueue_links(
        &self,
        task: &CrawlTask,
        params: &CrawlParams,
        frontier: &Arc<Frontier>,
        links: &[String],
    ) -> usize {
        if task.depth >= params.depth || !frontier.has_capacity() {
            return 0;
        }

        let filter = PatternFilter::new(&params.allow_patterns, &params.deny_patterns);
        let mut enqueued = 0;

        for link in links {
            let normalized = normalize(link);
            let Ok(parsed) = parse_http_url(&normalized) else {
                continue;
            };

            if params.same_domain_only && !same_host(&normalized, frontier.host()) {
                continue;
            }

            if !params.include_pdf && parsed.path().to_ascii_lowercase().ends_with(".pdf") {
                continue;
            }

            if !filter.permits(&normalized) {
                continue;
            }

            match frontier.admit(&url_hash(&normalized)) {
                Admission::Admitted => {
                    self.dispatcher.dispatch(
                        CrawlTask {
                            job_id: task.job_id.clone(),
                            tenant_id: task.tenant_id.clone(),
                            url: normalized,
                            depth: task.depth + 1,
                            retry_count: 0,
                        },
                        params.request,
                        frontier,
                    );
                    enqueued += 1;
                }
                Admission::Duplicate => continue,
                Admission::LimitReached => {
                    tracing::debug!("Job {} reached its page limit", task.job_id);
                    break;
                }
            }
        }

        enqueued
    }

    /// Moves a job to a terminal status, ignoring jobs that already ended
    fn finish_job(&self, job_id: &str, status: JobStatus, error: Option<&TaskError>) {
        let mut storage = self.lock_storage();
        match storage.update_job_status(job_id, status, error) {
            Ok(()) => tracing::info!("Job {} {}", job_id, status),
            Err(e) => tracing::debug!("Job {} not moved to {}: {}", job_id, status, e),
        }
    }

    fn lock_storage(&self) -> std::sync::MutexGuard<'_, SqliteStorage> {
        self.storage
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// `base_ms * 2^retry_count`, saturating
pub fn backoff_delay(base_ms: u64, retry_count: u32) -> Duration {
    let factor = 1u64.checked_shl(retry_count).unwrap_or(u64::MAX);
    Duration::from_millis(base_ms.saturating_mul(factor))
}

#[async_trait]
impl TaskHandler for TaskRunner {
    /// Runs the task, then completes the job if it was the last pending one
    async fn handle(&self, task: CrawlTask) {
        let outcome = self.run(&task).await;
        tracing::trace!("Task {} -> {:?}", task.url, outcome);

        let Some(frontier) = self.coordination.frontier(&task.job_id) else {
            return;
        };

        if frontier.task_finished() {
            if !frontier.is_halted() {
                self.finish_job(&task.job_id, JobStatus::Completed, None);
            }
            frontier.mark_finished();
        }
    }
}
