//! What a finished job hands back to its caller.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

use super::{JobError, JobStage};
use crate::manifest::{RenditionKind, Variant};

/// Per-track summary: the primary video track or one rendition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackReport {
    /// `video`, `audio` or `subtitles`.
    pub track: String,
    /// Rendition name from the playlist; `None` for the video track.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Where the track was written. `None` when a transform consumed it.
    pub output_path: Option<PathBuf>,
    pub segments_total: usize,
    pub segments_written: usize,
    pub missing_indices: Vec<usize>,
    pub bytes_written: u64,
    pub content_hash: String,
}

/// Details of a completed (fully or partially) job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobReport {
    pub manifest_url: String,
    pub output_path: PathBuf,
    /// Variant that was downloaded; `None` when the URL was a media playlist.
    pub variant: Option<Variant>,
    /// Sum of advertised segment durations of the video track.
    pub duration_secs: f64,
    pub video: TrackReport,
    pub renditions: Vec<TrackReport>,
    /// Bytes of the final file at `output_path`.
    pub bytes_written: u64,
    /// SHA-256 of the final file at `output_path`, lowercase hex.
    pub content_hash: String,
    pub retries: usize,
    pub elapsed_ms: u64,
}

impl JobReport {
    /// Track report for a rendition kind, if one was downloaded.
    #[must_use]
    pub fn rendition(&self, kind: RenditionKind) -> Option<&TrackReport> {
        self.renditions.iter().find(|r| r.track == kind.as_str())
    }

    /// True when some rendition lost segments.
    #[must_use]
    pub fn renditions_incomplete(&self) -> bool {
        self.renditions.iter().any(|r| !r.missing_indices.is_empty())
    }
}

/// Result of [`run`](super::run).
#[derive(Debug)]
pub enum JobOutcome {
    /// Every segment of every track made it into the output.
    Success { output_path: PathBuf, report: JobReport },
    /// The output exists but some segments are missing. `missing_indices`
    /// refers to the video track; rendition gaps are in the report.
    PartialSuccess {
        output_path: PathBuf,
        missing_indices: Vec<usize>,
        report: JobReport,
    },
    /// The job stopped at `stage`; no complete output was produced.
    Failure { stage: JobStage, cause: JobError },
}

impl JobOutcome {
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure { .. })
    }

    /// The report of a job that produced output.
    #[must_use]
    pub fn report(&self) -> Option<&JobReport> {
        match self {
            Self::Success { report, .. } | Self::PartialSuccess { report, .. } => Some(report),
            Self::Failure { .. } => None,
        }
    }

    #[must_use]
    pub fn output_path(&self) -> Option<&Path> {
        match self {
            Self::Success { output_path, .. } | Self::PartialSuccess { output_path, .. } => {
                Some(output_path)
            }
            Self::Failure { .. } => None,
        }
    }
}

impl fmt::Display for JobOutcome {
    /// One line suitable for a chat message or a terminal.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success {
                output_path,
                report,
            } => write!(
                f,
                "Downloaded {} segments ({} bytes) to {}",
                report.video.segments_written,
                report.bytes_written,
                output_path.display()
            ),
            Self::PartialSuccess {
                output_path,
                missing_indices,
                report,
            } => {
                write!(
                    f,
                    "Downloaded {}/{} segments to {}",
                    report.video.segments_written,
                    report.video.segments_total,
                    output_path.display()
                )?;
                if !missing_indices.is_empty() {
                    write!(f, "; missing segments {}", format_indices(missing_indices))?;
                }
                if report.renditions_incomplete() {
                    write!(f, "; some rendition segments are missing")?;
                }
                Ok(())
            }
            Self::Failure { stage, cause } => write!(f, "Failed while {stage}: {cause}"),
        }
    }
}

/// Renders indices compactly, at most ten of them.
fn format_indices(indices: &[usize]) -> String {
    const SHOWN: usize = 10;
    let mut rendered: Vec<String> = indices.iter().take(SHOWN).map(ToString::to_string).collect();
    if indices.len() > SHOWN {
        rendered.push(format!("and {} more", indices.len() - SHOWN));
    }
    rendered.join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(missing: Vec<usize>) -> TrackReport {
        TrackReport {
            track: "video".to_string(),
            name: None,
            language: None,
            output_path: Some(PathBuf::from("/out/show.ts")),
            segments_total: 5,
            segments_written: 5 - missing.len(),
            missing_indices: missing,
            bytes_written: 300,
            content_hash: "00".repeat(32),
        }
    }

    fn report(missing: Vec<usize>) -> JobReport {
        JobReport {
            manifest_url: "https://cdn.example/master.m3u8".to_string(),
            output_path: PathBuf::from("/out/show.ts"),
            variant: None,
            duration_secs: 20.0,
            video: track(missing),
            renditions: Vec::new(),
            bytes_written: 300,
            content_hash: "00".repeat(32),
            retries: 0,
            elapsed_ms: 12,
        }
    }

    #[test]
    fn test_success_display() {
        let outcome = JobOutcome::Success {
            output_path: PathBuf::from("/out/show.ts"),
            report: report(vec![]),
        };
        assert_eq!(
            outcome.to_string(),
            "Downloaded 5 segments (300 bytes) to /out/show.ts"
        );
        assert!(outcome.is_success());
        assert!(outcome.report().is_some());
    }

    #[test]
    fn test_partial_display_lists_missing() {
        let outcome = JobOutcome::PartialSuccess {
            output_path: PathBuf::from("/out/show.ts"),
            missing_indices: vec![1, 3],
            report: report(vec![1, 3]),
        };
        let msg = outcome.to_string();
        assert!(msg.contains("3/5"), "got: {msg}");
        assert!(msg.contains("missing segments 1, 3"), "got: {msg}");
    }

    #[test]
    fn test_failure_display() {
        let outcome = JobOutcome::Failure {
            stage: JobStage::FetchingMaster,
            cause: JobError::Cancelled,
        };
        assert_eq!(outcome.to_string(), "Failed while fetching the playlist: job cancelled");
        assert!(outcome.is_failure());
        assert!(outcome.output_path().is_none());
    }

    #[test]
    fn test_format_indices_truncates() {
        let indices: Vec<usize> = (0..13).collect();
        let rendered = format_indices(&indices);
        assert!(rendered.starts_with("0, 1, 2"));
        assert!(rendered.ends_with("and 3 more"));
    }
}
