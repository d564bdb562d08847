//! hlsgrab core library
//!
//! Downloads an HTTP Live Streaming presentation and reassembles its segments
//! into a single media file.
//!
//! # Architecture
//!
//! - [`manifest`] - M3U8 parsing, URI resolution, variant and rendition selection
//! - [`download`] - HTTP client, retry policy, bounded-concurrency segment scheduler
//! - [`workspace`] - per-job scratch directories that never outlive the job
//! - [`assemble`] - ordered concatenation of segment buffers with a content hash
//! - [`job`] - the job state machine tying the stages together

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod assemble;
pub mod download;
pub mod job;
pub mod manifest;
pub mod workspace;

#[cfg(test)]
pub(crate) mod test_support;
pub(crate) mod user_agent;

// Re-export commonly used types
pub use assemble::{AssemblyError, AssemblyResult, assemble, hash_file};
pub use download::{
    DEFAULT_CONCURRENCY, DEFAULT_SEGMENT_RETRIES, DownloadError, DownloadStats, HttpClient,
    RetryPolicy, SegmentScheduler,
};
pub use job::{
    DedupCache, DownloadJob, JobError, JobOutcome, JobReport, JobSpec, JobStage, JobState,
    MediaTransform, TrackReport, TransformError, TransformInput, run,
};
pub use manifest::{Manifest, VariantPolicy, parse_manifest};
pub use workspace::{BufferMode, WorkspaceManager};
