//! Work queues and worker pools for crawl tasks
//!
//! This module handles:
//! - Two independent task queues, `http` and `chrome`, each with a live depth gauge
//! - Routing tasks to the queue that matches the job's request mode
//! - Delayed re-enqueue for retries
//! - Worker tasks draining each queue
//!
//! A slow renderer only ever backs up the `chrome` queue; HTTP workers keep
//! draining their own queue.

use crate::params::RequestMode;
use crate::state::Frontier;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

/// One unit of crawl work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlTask {
    pub job_id: String,
    pub tenant_id: String,
    pub url: String,
    pub depth: u32,
    pub retry_count: u32,
}

impl CrawlTask {
    /// The same task, one retry later
    pub fn retried(&self) -> Self {
        Self {
            retry_count: self.retry_count + 1,
            ..self.clone()
        }
    }
}

/// Consumer of dequeued tasks
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, task: CrawlTask);
}

/// Unbounded FIFO shared by a set of workers
pub struct WorkQueue {
    name: &'static str,
    tx: mpsc::UnboundedSender<CrawlTask>,
    rx: Mutex<mpsc::UnboundedReceiver<CrawlTask>>,
    depth: Arc<AtomicUsize>,
}

impl WorkQueue {
    pub fn new(name: &'static str) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            name,
            tx,
            rx: Mutex::new(rx),
            depth: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Appends a task; returns false once every receiver is gone
    pub fn push(&self, task: CrawlTask) -> bool {
        self.depth.fetch_add(1, Ordering::AcqRel);
        if self.tx.send(task).is_err() {
            self.depth.fetch_sub(1, Ordering::AcqRel);
            return false;
        }
        true
    }

    /// Waits for the next task
    pub async fn pop(&self) -> Option<CrawlTask> {
        let task = self.rx.lock().await.recv().await;
        if task.is_some() {
            self.depth.fetch_sub(1, Ordering::AcqRel);
        }
        task
    }

    /// Tasks waiting in the queue
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Acquire)
    }

    /// Shared handle to the depth counter
    pub fn depth_gauge(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.depth)
    }
}

/// Routes tasks to the `http` or `chrome` queue and keeps the job's
/// pending counter in step
#[derive(Clone)]
pub struct Dispatcher {
    http: Arc<WorkQueue>,
    chrome: Arc<WorkQueue>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            http: Arc::new(WorkQueue::new("http")),
            chrome: Arc::new(WorkQueue::new("chrome")),
        }
    }

    pub fn http_queue(&self) -> &Arc<WorkQueue> {
        &self.http
    }

    pub fn chrome_queue(&self) -> &Arc<WorkQueue> {
        &self.chrome
    }

    fn queue_for(&self, mode: RequestMode) -> &Arc<WorkQueue> {
        match mode {
            RequestMode::Chrome => &self.chrome,
            RequestMode::Http | RequestMode::Smart => &self.http,
        }
    }

    /// Enqueues a task now
    pub fn dispatch(&self, task: CrawlTask, mode: RequestMode, frontier: &Frontier) {
        frontier.task_enqueued();
        let queue = self.queue_for(mode);
        if !queue.push(task) {
            tracing::warn!("{} queue closed, dropping task", queue.name());
            frontier.task_finished();
        }
    }

    /// Enqueues a task after `delay`
    ///
    /// The task counts as pending from the moment it is scheduled, so the
    /// job cannot complete while a retry is waiting.
    pub fn dispatch_after(
        &self,
        task: CrawlTask,
        mode: RequestMode,
        delay: Duration,
        frontier: Arc<Frontier>,
    ) {
        frontier.task_enqueued();
        let queue = Arc::clone(self.queue_for(mode));

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if !queue.push(task) {
                tracing::warn!("{} queue closed, dropping delayed task", queue.name());
                frontier.task_finished();
            }
        });
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Worker tasks draining both queues
///
/// Workers are aborted when the pool is dropped.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `http_workers` workers on the http queue and `chrome_workers`
    /// on the chrome queue
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(
        dispatcher: &Dispatcher,
        handler: Arc<dyn TaskHandler>,
        http_workers: usize,
        chrome_workers: usize,
    ) -> Self {
        let mut handles = Vec::with_capacity(http_workers + chrome_workers);

        for (queue, count) in [
            (dispatcher.http_queue(), http_workers),
            (dispatcher.chrome_queue(), chrome_workers),
        ] {
            for worker_id in 0..count {
                let queue = Arc::clone(queue);
                let handler = Arc::clone(&handler);
                handles.push(tokio::spawn(async move {
                    while let Some(task) = queue.pop().await {
                        tracing::trace!("{} worker {} took {}", queue.name(), worker_id, task.url);
                        handler.handle(task).await;
                    }
                }));
            }
        }

        tracing::debug!(
            "Started {} http and {} chrome workers",
            http_workers,
            chrome_workers
        );

        Self { handles }
    }

    /// Adds a background task that is aborted together with the workers
    pub fn attach(&mut self, handle: JoinHandle<()>) {
        self.handles.push(handle);
    }

    pub fn shutdown(&mut self) {
        for handle in self.handles.drain(..) {
            handle.abort();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    fn task(url: &str) -> CrawlTask {
        CrawlTask {
            job_id: "crawl_1".to_string(),
            tenant_id: "tenant".to_string(),
            url: url.to_string(),
            depth: 0,
            retry_count: 0,
        }
    }

    struct Recorder {
        seen: StdMutex<Vec<String>>,
        frontier: Arc<Frontier>,
    }

    #[async_trait]
    impl TaskHandler for Recorder {
        async fn handle(&self, task: CrawlTask) {
            self.seen.lock().unwrap().push(task.url);
            self.frontier.task_finished();
        }
    }

    #[test]
    fn test_retried_increments_count() {
        let retried = task("https://example.com/").retried().retried();
        assert_eq!(retried.retry_count, 2);
        assert_eq!(retried.url, "https://example.com/");
    }

    #[tokio::test]
    async fn test_queue_depth_tracks_push_and_pop() {
        let queue = WorkQueue::new("http");
        assert!(queue.push(task("a")));
        assert!(queue.push(task("b")));
        assert_eq!(queue.depth(), 2);

        assert_eq!(queue.pop().await.unwrap().url, "a");
        assert_eq!(queue.depth(), 1);
    }

    #[tokio::test]
    async fn test_mode_selects_queue() {
        let dispatcher = Dispatcher::new();
        let frontier = Frontier::new("crawl_1", "example.com", 10);

        dispatcher.dispatch(task("a"), RequestMode::Chrome, &frontier);
        dispatcher.dispatch(task("b"), RequestMode::Smart, &frontier);
        dispatcher.dispatch(task("c"), RequestMode::Http, &frontier);

        assert_eq!(dispatcher.chrome_queue().depth(), 1);
        assert_eq!(dispatcher.http_queue().depth(), 2);
        assert_eq!(frontier.pending(), 3);
    }

    #[tokio::test]
    async fn test_delayed_task_is_pending_while_waiting() {
        let dispatcher = Dispatcher::new();
        let frontier = Arc::new(Frontier::new("crawl_1", "example.com", 10));

        dispatcher.dispatch_after(
            task("later"),
            RequestMode::Http,
            Duration::from_millis(50),
            Arc::clone(&frontier),
        );
        assert_eq!(frontier.pending(), 1);
        assert_eq!(dispatcher.http_queue().depth(), 0);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(dispatcher.http_queue().depth(), 1);
    }

    #[tokio::test]
    async fn test_workers_drain_both_queues() {
        let dispatcher = Dispatcher::new();
        let frontier = Arc::new(Frontier::new("crawl_1", "example.com", 10));
        let recorder = Arc::new(Recorder {
            seen: StdMutex::new(Vec::new()),
            frontier: Arc::clone(&frontier),
        });

        let _pool = WorkerPool::start(&dispatcher, recorder.clone(), 2, 1);

        dispatcher.dispatch(task("h1"), RequestMode::Http, &frontier);
        dispatcher.dispatch(task("c1"), RequestMode::Chrome, &frontier);
        dispatcher.dispatch(task("h2"), RequestMode::Smart, &frontier);

        for _ in 0..50 {
            if frontier.pending() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let mut seen = recorder.seen.lock().unwrap().clone();
        seen.sort();
        assert_eq!(seen, vec!["c1", "h1", "h2"]);
        assert_eq!(frontier.pending(), 0);
    }
}
