//! Network side of a job: the shared HTTP client, per-segment tasks, and the
//! worker pool that downloads a playlist's segments.
//!
//! # Features
//!
//! - One client for playlists and segments, forwarding caller headers
//! - Byte-range segments fetched with `Range` requests
//! - Bounded worker pool (1-100 workers, default 5) with a join barrier
//! - Optional per-segment retry with exponential backoff and jitter
//! - Structured error types with full context

mod client;
pub mod constants;
mod error;
mod retry;
mod scheduler;
mod task;

pub use client::{HttpClient, build_header_map};
pub use constants::DEFAULT_CONCURRENCY;
pub use error::DownloadError;
pub use retry::{DEFAULT_SEGMENT_RETRIES, FailureType, RetryDecision, RetryPolicy, classify_error};
pub use scheduler::{DownloadStats, SchedulerError, SegmentScheduler};
pub use task::{BufferTarget, DownloadTask, SegmentBuffer, TaskState};

// No module-local Result aliases: signatures spell out `Result<T, DownloadError>`.
