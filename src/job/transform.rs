//! Hook for turning assembled tracks into the final output file.
//!
//! The crate never runs an encoder itself. A caller that wants the video
//! muxed with its audio and subtitle tracks (or remuxed into another
//! container) supplies a [`MediaTransform`]; the job then assembles every
//! track inside its workspace and hands the paths over.

use std::error::Error as StdError;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

/// Tracks handed to a [`MediaTransform`].
///
/// Every input path lives in the job's workspace and is deleted when the
/// job ends; the transform must write its result to `output`.
#[derive(Debug, Clone, Copy)]
pub struct TransformInput<'a> {
    pub video: &'a Path,
    pub audio: Option<&'a Path>,
    pub subtitles: Option<&'a Path>,
    /// Requested location of the final file.
    pub output: &'a Path,
}

/// Failure reported by a [`MediaTransform`].
#[derive(Debug, Error)]
#[error("{message}")]
pub struct TransformError {
    message: String,
    #[source]
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
}

impl TransformError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        message: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// Produces the final output from assembled tracks.
///
/// Uses `async_trait` so jobs can hold an `Arc<dyn MediaTransform>`; native
/// async trait methods are not object-safe.
#[async_trait]
pub trait MediaTransform: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Writes the final file and returns its path (normally `input.output`).
    async fn transform(&self, input: TransformInput<'_>) -> Result<PathBuf, TransformError>;
}
