//! Bounded worker pool that downloads every segment of a media playlist.
//!
//! # Concurrency Model
//!
//! - `concurrency` workers run as Tokio tasks
//! - Each worker claims the next segment index from a shared cursor, so
//!   segments are dispatched in ascending order
//! - Each worker writes only the task it claimed; the task table lock is
//!   never held across an await
//! - [`SegmentScheduler::download_all`] returns only after every worker has
//!   finished, and every returned task is terminal
//!
//! A failed segment never cancels its siblings. Cancellation is cooperative:
//! in-flight fetches race the token and undispatched segments fail as
//! cancelled without touching the network.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use hlsgrab_core::download::{HttpClient, RetryPolicy, SegmentScheduler};
//! use hlsgrab_core::workspace::{BufferMode, WorkspaceManager};
//! use reqwest::header::HeaderMap;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example(segments: Vec<hlsgrab_core::manifest::Segment>) -> Result<(), Box<dyn std::error::Error>> {
//! let scheduler = SegmentScheduler::new(HttpClient::new(), 5, RetryPolicy::default())?;
//! let workspace = Arc::new(WorkspaceManager::default().create(BufferMode::Disk)?);
//! let tasks = scheduler
//!     .download_all("video", &segments, &HeaderMap::new(), &workspace, &CancellationToken::new())
//!     .await;
//! println!("{} tasks finished", tasks.len());
//! # Ok(())
//! # }
//! ```

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use reqwest::header::HeaderMap;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::constants::{MAX_CONCURRENCY, MIN_CONCURRENCY};
use super::retry::{RetryDecision, RetryPolicy, classify_error};
use super::task::{BufferTarget, DownloadTask, SegmentBuffer, TaskState};
use super::{DownloadError, HttpClient};
use crate::manifest::Segment;
use crate::workspace::Workspace;

/// Error type for scheduler construction.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// Invalid concurrency value provided.
    #[error(
        "invalid concurrency value {value}: must be between {MIN_CONCURRENCY} and {MAX_CONCURRENCY}"
    )]
    InvalidConcurrency {
        /// The invalid value that was provided.
        value: usize,
    },
}

/// Running totals across every batch a scheduler has downloaded.
///
/// Atomic counters, updated by workers as segments finish; safe to poll
/// from a progress display while a batch is running.
#[derive(Debug, Default)]
pub struct DownloadStats {
    queued: AtomicUsize,
    succeeded: AtomicUsize,
    failed: AtomicUsize,
    retried: AtomicUsize,
    bytes: AtomicU64,
}

impl DownloadStats {
    /// Creates a new stats tracker with zero counts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Segments handed to the scheduler so far.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    /// Segments downloaded successfully.
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.succeeded.load(Ordering::SeqCst)
    }

    /// Segments that ended failed (including cancelled ones).
    #[must_use]
    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }

    /// Segments that reached a terminal state.
    #[must_use]
    pub fn finished(&self) -> usize {
        self.succeeded() + self.failed()
    }

    /// Retry attempts made.
    #[must_use]
    pub fn retried(&self) -> usize {
        self.retried.load(Ordering::SeqCst)
    }

    /// Total segment bytes downloaded.
    #[must_use]
    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::SeqCst)
    }

    fn add_queued(&self, count: usize) {
        self.queued.fetch_add(count, Ordering::SeqCst);
    }

    fn record_success(&self, bytes: u64) {
        self.succeeded.fetch_add(1, Ordering::SeqCst);
        self.bytes.fetch_add(bytes, Ordering::SeqCst);
    }

    fn increment_failed(&self) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }

    fn increment_retried(&self) {
        self.retried.fetch_add(1, Ordering::SeqCst);
    }
}

/// Downloads all segments of a playlist with a bounded number of workers.
#[derive(Debug)]
pub struct SegmentScheduler {
    client: HttpClient,
    concurrency: usize,
    retry_policy: RetryPolicy,
    stats: Arc<DownloadStats>,
}

impl SegmentScheduler {
    /// Creates a scheduler with `concurrency` workers (1-100).
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::InvalidConcurrency`] if the value is outside
    /// the valid range.
    ///
    /// # Example
    ///
    /// ```
    /// use hlsgrab_core::download::{HttpClient, RetryPolicy, SegmentScheduler};
    ///
    /// let scheduler = SegmentScheduler::new(HttpClient::new(), 5, RetryPolicy::default()).unwrap();
    /// assert_eq!(scheduler.concurrency(), 5);
    /// assert!(SegmentScheduler::new(HttpClient::new(), 0, RetryPolicy::default()).is_err());
    /// ```
    #[instrument(level = "debug", skip(client, retry_policy))]
    pub fn new(
        client: HttpClient,
        concurrency: usize,
        retry_policy: RetryPolicy,
    ) -> Result<Self, SchedulerError> {
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&concurrency) {
            return Err(SchedulerError::InvalidConcurrency { value: concurrency });
        }

        debug!(
            concurrency,
            max_attempts = retry_policy.max_attempts(),
            "creating segment scheduler"
        );

        Ok(Self {
            client,
            concurrency,
            retry_policy,
            stats: Arc::new(DownloadStats::new()),
        })
    }

    /// Reports into `stats` instead of a private tracker.
    #[must_use]
    pub fn with_stats(mut self, stats: Arc<DownloadStats>) -> Self {
        self.stats = stats;
        self
    }

    /// Returns the configured worker count.
    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Returns the configured retry policy.
    #[must_use]
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Shared handle to the running totals.
    #[must_use]
    pub fn stats(&self) -> Arc<DownloadStats> {
        Arc::clone(&self.stats)
    }

    /// Downloads every segment, returning one terminal task per segment.
    ///
    /// `tasks[i]` holds `segments[i]`. `track` labels the buffers written to
    /// the workspace so several playlists can share one workspace.
    ///
    /// Segment failures are recorded on their tasks; this method itself
    /// never fails.
    #[instrument(
        skip(self, segments, headers, workspace, cancel),
        fields(track = %track, segments = segments.len(), concurrency = self.concurrency)
    )]
    pub async fn download_all(
        &self,
        track: &str,
        segments: &[Segment],
        headers: &HeaderMap,
        workspace: &Arc<Workspace>,
        cancel: &CancellationToken,
    ) -> Vec<DownloadTask> {
        let total = segments.len();
        self.stats.add_queued(total);

        let context = Arc::new(WorkerContext {
            client: self.client.clone(),
            headers: headers.clone(),
            workspace: Arc::clone(workspace),
            track: track.to_string(),
            retry_policy: self.retry_policy.clone(),
            stats: Arc::clone(&self.stats),
            cancel: cancel.clone(),
            cursor: AtomicUsize::new(0),
            tasks: Mutex::new(segments.iter().cloned().map(DownloadTask::new).collect()),
        });

        let worker_count = self.concurrency.min(total);
        info!(workers = worker_count, "starting segment downloads");

        let mut workers = WorkerSet::default();
        for worker in 0..worker_count {
            let context = Arc::clone(&context);
            workers.handles.push(tokio::spawn(run_worker(worker, context)));
        }
        workers.join().await;

        let mut tasks = std::mem::take(&mut *context.lock_tasks());
        for task in &mut tasks {
            if !task.state().is_terminal() {
                warn!(index = task.index(), "task left unfinished by its worker");
                let url = task.segment.uri.to_string();
                task.fail_if_unfinished(DownloadError::interrupted(url));
            }
        }

        let succeeded = tasks
            .iter()
            .filter(|t| matches!(t.state(), TaskState::Succeeded(_)))
            .count();
        info!(
            succeeded,
            failed = total - succeeded,
            retried = self.stats.retried(),
            "segment downloads complete"
        );

        tasks
    }
}

/// State shared by the workers of one batch.
struct WorkerContext {
    client: HttpClient,
    headers: HeaderMap,
    workspace: Arc<Workspace>,
    track: String,
    retry_policy: RetryPolicy,
    stats: Arc<DownloadStats>,
    cancel: CancellationToken,
    cursor: AtomicUsize,
    tasks: Mutex<Vec<DownloadTask>>,
}

impl WorkerContext {
    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, Vec<DownloadTask>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claims the next undispatched segment.
    fn claim(&self) -> Option<(usize, Segment)> {
        let index = self.cursor.fetch_add(1, Ordering::SeqCst);
        let tasks = self.lock_tasks();
        tasks.get(index).map(|task| (index, task.segment.clone()))
    }

    fn set_state(&self, index: usize, next: TaskState) {
        let mut tasks = self.lock_tasks();
        let Some(task) = tasks.get_mut(index) else {
            return;
        };
        if let Err(rejected) = task.transition(next) {
            warn!(
                index,
                from = %task.state(),
                to = %rejected,
                "ignoring illegal task transition"
            );
        }
    }
}

async fn run_worker(worker: usize, context: Arc<WorkerContext>) {
    debug!(worker, "worker started");

    while let Some((index, segment)) = context.claim() {
        if context.cancel.is_cancelled() {
            context.stats.increment_failed();
            context.set_state(
                index,
                TaskState::Failed(DownloadError::cancelled(segment.uri.as_str())),
            );
            continue;
        }

        context.set_state(index, TaskState::InFlight);
        let target = context.workspace.buffer_target(&context.track, index);

        let outcome = tokio::select! {
            biased;
            () = context.cancel.cancelled() => Err(DownloadError::cancelled(segment.uri.as_str())),
            result = fetch_with_retry(&context, &segment, target) => result,
        };

        match outcome {
            Ok(buffer) => {
                debug!(index, bytes = buffer.len(), "segment downloaded");
                context.stats.record_success(buffer.len());
                context.set_state(index, TaskState::Succeeded(buffer));
            }
            Err(e) => {
                if e.is_cancelled() {
                    debug!(index, "segment cancelled");
                } else {
                    warn!(index, url = %segment.uri, error = %e, "segment failed");
                }
                context.stats.increment_failed();
                context.set_state(index, TaskState::Failed(e));
            }
        }
    }

    debug!(worker, "worker finished");
}

/// Fetches one segment, retrying according to the batch's policy.
#[instrument(skip(context, segment, target), fields(index = segment.sequence_index))]
async fn fetch_with_retry(
    context: &WorkerContext,
    segment: &Segment,
    target: BufferTarget,
) -> Result<SegmentBuffer, DownloadError> {
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        match context
            .client
            .fetch_segment(segment, &context.headers, target.clone())
            .await
        {
            Ok(buffer) => return Ok(buffer),
            Err(e) => match context.retry_policy.should_retry(classify_error(&e), attempt) {
                RetryDecision::Retry {
                    delay,
                    attempt: next_attempt,
                } => {
                    info!(
                        url = %segment.uri,
                        attempt = next_attempt,
                        max_attempts = context.retry_policy.max_attempts(),
                        delay_ms = delay.as_millis(),
                        error = %e,
                        "retrying segment"
                    );
                    context.stats.increment_retried();
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::DoNotRetry { reason } => {
                    debug!(url = %segment.uri, %reason, "not retrying segment");
                    return Err(e);
                }
            },
        }
    }
}

/// Worker handles that are aborted if the batch future is dropped early.
#[derive(Default)]
struct WorkerSet {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerSet {
    async fn join(&mut self) {
        for handle in &mut self.handles {
            // A panicking worker leaves its task unfinished; it is failed after the join.
            if let Err(e) = handle.await {
                warn!(error = %e, "segment worker panicked");
            }
        }
    }
}

impl Drop for WorkerSet {
    fn drop(&mut self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn scheduler(concurrency: usize) -> Result<SegmentScheduler, SchedulerError> {
        SegmentScheduler::new(HttpClient::new(), concurrency, RetryPolicy::default())
    }

    #[test]
    fn test_scheduler_new_valid_concurrency() {
        assert_eq!(scheduler(1).unwrap().concurrency(), 1);
        assert_eq!(scheduler(5).unwrap().concurrency(), 5);
        assert_eq!(scheduler(100).unwrap().concurrency(), 100);
    }

    #[test]
    fn test_scheduler_new_invalid_concurrency() {
        assert!(matches!(
            scheduler(0),
            Err(SchedulerError::InvalidConcurrency { value: 0 })
        ));
        assert!(matches!(
            scheduler(101),
            Err(SchedulerError::InvalidConcurrency { value: 101 })
        ));
    }

    #[test]
    fn test_scheduler_stores_retry_policy() {
        let scheduler =
            SegmentScheduler::new(HttpClient::new(), 4, RetryPolicy::from_retries(2)).unwrap();
        assert_eq!(scheduler.retry_policy().max_attempts(), 3);
    }

    #[test]
    fn test_scheduler_error_display() {
        let msg = SchedulerError::InvalidConcurrency { value: 0 }.to_string();
        assert!(msg.contains("invalid concurrency"));
        assert!(msg.contains("100"));
    }

    #[test]
    fn test_download_stats_counters() {
        let stats = DownloadStats::new();
        stats.add_queued(4);
        stats.record_success(100);
        stats.record_success(50);
        stats.increment_failed();
        stats.increment_retried();

        assert_eq!(stats.queued(), 4);
        assert_eq!(stats.succeeded(), 2);
        assert_eq!(stats.failed(), 1);
        assert_eq!(stats.finished(), 3);
        assert_eq!(stats.retried(), 1);
        assert_eq!(stats.bytes(), 150);
    }

    #[test]
    fn test_download_stats_thread_safe() {
        use std::thread;

        let stats = Arc::new(DownloadStats::new());
        let mut handles = Vec::new();
        for _ in 0..10 {
            let stats = Arc::clone(&stats);
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    stats.record_success(1);
                    stats.increment_failed();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(stats.succeeded(), 1000);
        assert_eq!(stats.failed(), 1000);
        assert_eq!(stats.bytes(), 1000);
    }
}
