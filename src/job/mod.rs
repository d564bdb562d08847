//! Download jobs: one playlist URL in, one media file out.
//!
//! A [`DownloadJob`] walks the [`JobState`] machine: it fetches the playlist
//! at the job URL, picks a variant when that is a master playlist, downloads
//! every segment through a [`SegmentScheduler`], reassembles the track files
//! and optionally hands them to a [`MediaTransform`]. All scratch data lives
//! in a per-job [`Workspace`] that is gone when [`DownloadJob::run`] returns.
//!
//! # Example
//!
//! ```no_run
//! use hlsgrab_core::job::{JobSpec, run};
//! use url::Url;
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let url = Url::parse("https://cdn.example/show/master.m3u8")?;
//! let outcome = run(JobSpec::new(url, "show.ts")).await;
//! println!("{outcome}");
//! # Ok(())
//! # }
//! ```

mod dedup;
mod outcome;
mod state;
mod transform;

pub use dedup::DedupCache;
pub use outcome::{JobOutcome, JobReport, TrackReport};
pub use state::{JobStage, JobState};
pub use transform::{MediaTransform, TransformError, TransformInput};

use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::header::HeaderMap;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use crate::assemble::{AssemblyError, AssemblyResult, assemble, hash_file};
use crate::download::{
    DEFAULT_CONCURRENCY, DEFAULT_SEGMENT_RETRIES, DownloadError, DownloadStats, HttpClient,
    RetryPolicy, SchedulerError, SegmentScheduler, build_header_map,
};
use crate::manifest::{
    Manifest, MediaPlaylist, ParseError, Rendition, RenditionKind, SelectError, VariantPolicy,
    parse_manifest, select_renditions, select_variant,
};
use crate::workspace::{BufferMode, Workspace, WorkspaceError, WorkspaceManager};

/// Everything needed to run one job.
#[derive(Debug, Clone)]
pub struct JobSpec {
    /// Master or media playlist URL.
    pub manifest_url: Url,
    /// Final output file. Its parent directory must exist.
    pub output_path: PathBuf,
    /// Extra request headers sent with every playlist and segment request.
    pub headers: BTreeMap<String, String>,
    /// Segment download workers, 1 to 100.
    pub concurrency: usize,
    pub variant_policy: VariantPolicy,
    /// Retries per segment after the first attempt.
    pub segment_retries: u32,
    /// Also download the audio and subtitle renditions the variant refers to.
    pub include_renditions: bool,
    pub buffer_mode: BufferMode,
    /// Cancel the job once this much time has passed.
    pub deadline: Option<Duration>,
}

impl JobSpec {
    /// A spec with default settings for every optional field.
    #[must_use]
    pub fn new(manifest_url: Url, output_path: impl Into<PathBuf>) -> Self {
        Self {
            manifest_url,
            output_path: output_path.into(),
            headers: BTreeMap::new(),
            concurrency: DEFAULT_CONCURRENCY,
            variant_policy: VariantPolicy::default(),
            segment_retries: DEFAULT_SEGMENT_RETRIES,
            include_renditions: false,
            buffer_mode: BufferMode::default(),
            deadline: None,
        }
    }

    /// Checks the parts of the spec that can be judged without I/O.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::InvalidSpec`] describing the first problem found.
    pub fn validate(&self) -> Result<(), JobError> {
        if !matches!(self.manifest_url.scheme(), "http" | "https") {
            return Err(JobError::invalid_spec(format!(
                "unsupported URL scheme '{}'",
                self.manifest_url.scheme()
            )));
        }
        if self.output_path.file_name().is_none() {
            return Err(JobError::invalid_spec(format!(
                "output path '{}' does not name a file",
                self.output_path.display()
            )));
        }
        Ok(())
    }
}

/// Why a job failed.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("invalid job: {reason}")]
    InvalidSpec { reason: String },

    #[error(transparent)]
    Fetch(DownloadError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Select(#[from] SelectError),

    #[error(transparent)]
    Workspace(#[from] WorkspaceError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    Assembly(#[from] AssemblyError),

    #[error("transform failed: {0}")]
    Transform(#[from] TransformError),

    #[error("job cancelled")]
    Cancelled,

    #[error("expected a {expected} playlist at {url}, got a {found} playlist")]
    UnexpectedManifest {
        url: String,
        expected: &'static str,
        found: &'static str,
    },
}

impl JobError {
    pub(crate) fn invalid_spec(reason: impl Into<String>) -> Self {
        Self::InvalidSpec {
            reason: reason.into(),
        }
    }

    /// Wraps a fetch error; an interrupted fetch is a cancelled job.
    pub(crate) fn fetch(error: DownloadError) -> Self {
        if error.is_cancelled() {
            Self::Cancelled
        } else {
            Self::Fetch(error)
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// A failure tagged with the stage it happened in.
#[derive(Debug)]
struct StageFailure {
    stage: JobStage,
    cause: JobError,
}

impl StageFailure {
    fn new(stage: JobStage, cause: impl Into<JobError>) -> Self {
        Self {
            stage,
            cause: cause.into(),
        }
    }
}

/// One playlist to download: the video track or a rendition.
#[derive(Debug)]
struct Track {
    rendition: Option<Rendition>,
    playlist: MediaPlaylist,
}

impl Track {
    fn label(&self) -> &'static str {
        self.rendition.as_ref().map_or("video", |r| r.kind.as_str())
    }

    /// File extension taken from the first segment URI.
    fn extension(&self) -> String {
        let fallback = match self.rendition.as_ref().map(|r| r.kind) {
            Some(RenditionKind::Subtitles) => "vtt",
            _ => "ts",
        };
        self.playlist
            .segments
            .first()
            .and_then(|segment| {
                Path::new(segment.uri.path())
                    .extension()
                    .and_then(OsStr::to_str)
                    .filter(|ext| {
                        (1..=5).contains(&ext.len()) && ext.chars().all(|c| c.is_ascii_alphanumeric())
                    })
                    .map(str::to_ascii_lowercase)
            })
            .unwrap_or_else(|| fallback.to_string())
    }

    fn report(&self, result: &AssemblyResult, keep_path: bool) -> TrackReport {
        TrackReport {
            track: self.label().to_string(),
            name: self.rendition.as_ref().map(|r| r.name.clone()),
            language: self.rendition.as_ref().and_then(|r| r.language.clone()),
            output_path: keep_path.then(|| result.output_path.clone()),
            segments_total: self.playlist.segments.len(),
            segments_written: result.segments_written,
            missing_indices: result.missing_indices.clone(),
            bytes_written: result.bytes_written,
            content_hash: result.content_hash.clone(),
        }
    }
}

/// Where a rendition goes when no transform merges it: next to the output,
/// as `<stem>.<kind>.<ext>`.
fn rendition_output_path(output: &Path, kind: RenditionKind, extension: &str) -> PathBuf {
    let stem = output
        .file_stem()
        .and_then(OsStr::to_str)
        .unwrap_or("output");
    output.with_file_name(format!("{stem}.{}.{extension}", kind.as_str()))
}

/// Cancels a token when the deadline passes; disarmed on drop.
struct DeadlineTimer(JoinHandle<()>);

impl DeadlineTimer {
    fn arm(limit: Duration, token: CancellationToken) -> Self {
        Self(tokio::spawn(async move {
            tokio::time::sleep(limit).await;
            warn!(limit_secs = limit.as_secs_f64(), "job deadline reached; cancelling");
            token.cancel();
        }))
    }
}

impl Drop for DeadlineTimer {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// A single download job and its lifecycle.
pub struct DownloadJob {
    spec: JobSpec,
    client: HttpClient,
    workspaces: WorkspaceManager,
    retry_policy: Option<RetryPolicy>,
    transform: Option<Arc<dyn MediaTransform>>,
    stats: Arc<DownloadStats>,
    state: JobState,
    history: Vec<JobState>,
}

impl fmt::Debug for DownloadJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadJob")
            .field("spec", &self.spec)
            .field("workspace_root", &self.workspaces.root())
            .field("transform", &self.transform.as_ref().map(|t| t.name()))
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl DownloadJob {
    #[must_use]
    pub fn new(spec: JobSpec) -> Self {
        Self {
            spec,
            client: HttpClient::new(),
            workspaces: WorkspaceManager::default(),
            retry_policy: None,
            transform: None,
            stats: Arc::new(DownloadStats::new()),
            state: JobState::created(),
            history: vec![JobState::created()],
        }
    }

    #[must_use]
    pub fn with_client(mut self, client: HttpClient) -> Self {
        self.client = client;
        self
    }

    /// Creates workspaces under `manager`'s root instead of the temp dir.
    #[must_use]
    pub fn with_workspace_manager(mut self, manager: WorkspaceManager) -> Self {
        self.workspaces = manager;
        self
    }

    /// Overrides the policy derived from `segment_retries`.
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    /// Runs `transform` on the assembled tracks before finishing.
    #[must_use]
    pub fn with_transform(mut self, transform: Arc<dyn MediaTransform>) -> Self {
        self.transform = Some(transform);
        self
    }

    /// Reports segment progress into `stats`.
    #[must_use]
    pub fn with_stats(mut self, stats: Arc<DownloadStats>) -> Self {
        self.stats = stats;
        self
    }

    #[must_use]
    pub fn spec(&self) -> &JobSpec {
        &self.spec
    }

    #[must_use]
    pub fn state(&self) -> &JobState {
        &self.state
    }

    /// Every state the job has been in, oldest first, current last.
    #[must_use]
    pub fn history(&self) -> &[JobState] {
        &self.history
    }

    #[must_use]
    pub fn stats(&self) -> Arc<DownloadStats> {
        Arc::clone(&self.stats)
    }

    /// Runs the job to a terminal state.
    ///
    /// Cancelling `cancel` (or reaching the spec's deadline) stops the job at
    /// the current stage with [`JobError::Cancelled`]. The workspace is
    /// removed before this returns, whatever the outcome.
    #[instrument(
        skip(self, cancel),
        fields(url = %self.spec.manifest_url, output = %self.spec.output_path.display())
    )]
    pub async fn run(&mut self, cancel: &CancellationToken) -> JobOutcome {
        if self.state != JobState::created() {
            warn!(state = %self.state, "job already ran");
            return JobOutcome::Failure {
                stage: JobStage::Created,
                cause: JobError::invalid_spec("job has already been run"),
            };
        }

        let started = Instant::now();
        let retries_before = self.stats.retried();
        let token = cancel.child_token();
        let _deadline = self
            .spec
            .deadline
            .map(|limit| DeadlineTimer::arm(limit, token.clone()));

        let (headers, scheduler) = match self.prepare() {
            Ok(prepared) => prepared,
            Err(cause) => return self.fail(JobStage::Created, cause),
        };

        let workspaces = self.workspaces.clone();
        let result = workspaces
            .with_workspace(self.spec.buffer_mode, |workspace| {
                self.execute(workspace, &headers, &scheduler, &token)
            })
            .await;

        match result {
            Ok(Ok(mut report)) => {
                report.retries = self.stats.retried().saturating_sub(retries_before);
                report.elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
                self.complete(report)
            }
            Ok(Err(StageFailure { stage, cause })) => self.fail(stage, cause),
            Err(e) => self.fail(JobStage::Created, e.into()),
        }
    }

    fn prepare(&self) -> Result<(HeaderMap, SegmentScheduler), JobError> {
        self.spec.validate()?;
        let headers = build_header_map(&self.spec.headers).map_err(JobError::Fetch)?;
        let policy = self
            .retry_policy
            .clone()
            .unwrap_or_else(|| RetryPolicy::from_retries(self.spec.segment_retries));
        let scheduler = SegmentScheduler::new(self.client.clone(), self.spec.concurrency, policy)?
            .with_stats(Arc::clone(&self.stats));
        Ok((headers, scheduler))
    }

    async fn execute(
        &mut self,
        workspace: Arc<Workspace>,
        headers: &HeaderMap,
        scheduler: &SegmentScheduler,
        cancel: &CancellationToken,
    ) -> Result<JobReport, StageFailure> {
        self.enter(JobStage::FetchingMaster);
        let manifest_url = self.spec.manifest_url.clone();
        let top = self
            .load_manifest(JobStage::FetchingMaster, &manifest_url, headers, cancel)
            .await?;

        let (variant, video, renditions) = match top {
            Manifest::Media(playlist) => {
                info!("URL is a media playlist; skipping variant selection");
                (None, Track { rendition: None, playlist }, Vec::new())
            }
            Manifest::Master(master) => {
                self.enter(JobStage::SelectingVariant);
                let variant = select_variant(&master, &self.spec.variant_policy)
                    .map_err(|e| StageFailure::new(JobStage::SelectingVariant, e))?
                    .clone();
                let wanted: Vec<Rendition> = if self.spec.include_renditions {
                    let selected = select_renditions(&master, &variant);
                    [selected.audio, selected.subtitles]
                        .into_iter()
                        .flatten()
                        .cloned()
                        .collect()
                } else {
                    Vec::new()
                };
                info!(
                    uri = %variant.uri,
                    bandwidth = variant.bandwidth,
                    renditions = wanted.len(),
                    "selected variant"
                );

                self.enter(JobStage::FetchingMedia);
                let playlist = self.load_media(&variant.uri, headers, cancel).await?;
                let mut renditions = Vec::with_capacity(wanted.len());
                for rendition in wanted {
                    let playlist = self.load_media(&rendition.uri, headers, cancel).await?;
                    renditions.push(Track {
                        rendition: Some(rendition),
                        playlist,
                    });
                }
                (Some(variant), Track { rendition: None, playlist }, renditions)
            }
        };

        self.enter(JobStage::Downloading);
        let video_tasks = scheduler
            .download_all(video.label(), &video.playlist.segments, headers, &workspace, cancel)
            .await;
        let mut rendition_tasks = Vec::with_capacity(renditions.len());
        for track in &renditions {
            if cancel.is_cancelled() {
                break;
            }
            rendition_tasks.push(
                scheduler
                    .download_all(track.label(), &track.playlist.segments, headers, &workspace, cancel)
                    .await,
            );
        }
        if cancel.is_cancelled() {
            return Err(StageFailure::new(JobStage::Downloading, JobError::Cancelled));
        }

        self.enter(JobStage::Assembling);
        let transform = self.transform.clone();
        let video_path = if transform.is_some() {
            workspace.scratch_path(&format!("video.{}", video.extension()))
        } else {
            self.spec.output_path.clone()
        };
        let video_result = assemble(video_tasks, &video_path)
            .await
            .map_err(|e| StageFailure::new(JobStage::Assembling, e))?;

        let mut assembled = Vec::with_capacity(renditions.len());
        for (track, tasks) in renditions.into_iter().zip(rendition_tasks) {
            let extension = track.extension();
            let kind = track.rendition.as_ref().map_or(RenditionKind::Audio, |r| r.kind);
            let path = if transform.is_some() {
                workspace.scratch_path(&format!("{}.{extension}", kind.as_str()))
            } else {
                rendition_output_path(&self.spec.output_path, kind, &extension)
            };
            let result = assemble(tasks, &path)
                .await
                .map_err(|e| StageFailure::new(JobStage::Assembling, e))?;
            assembled.push((track, result));
        }

        let keep_paths = transform.is_none();
        let (output_path, bytes_written, content_hash) = match transform {
            Some(transform) => {
                self.enter(JobStage::Transforming);
                self.run_transform(transform.as_ref(), &video_result, &assembled)
                    .await?
            }
            None => (
                video_result.output_path.clone(),
                video_result.bytes_written,
                video_result.content_hash.clone(),
            ),
        };

        Ok(JobReport {
            manifest_url: manifest_url.to_string(),
            output_path,
            variant,
            duration_secs: video.playlist.total_duration_secs(),
            video: video.report(&video_result, keep_paths),
            renditions: assembled
                .iter()
                .map(|(track, result)| track.report(result, keep_paths))
                .collect(),
            bytes_written,
            content_hash,
            retries: 0,
            elapsed_ms: 0,
        })
    }

    async fn load_manifest(
        &self,
        stage: JobStage,
        url: &Url,
        headers: &HeaderMap,
        cancel: &CancellationToken,
    ) -> Result<Manifest, StageFailure> {
        let fetched = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(StageFailure::new(stage, JobError::Cancelled)),
            fetched = self.client.fetch_manifest(url, headers) => fetched,
        };
        let text = fetched.map_err(|e| StageFailure::new(stage, JobError::fetch(e)))?;
        let manifest = parse_manifest(&text, url).map_err(|e| StageFailure::new(stage, e))?;
        debug!(%url, kind = manifest.kind(), "loaded playlist");
        Ok(manifest)
    }

    async fn load_media(
        &self,
        url: &Url,
        headers: &HeaderMap,
        cancel: &CancellationToken,
    ) -> Result<MediaPlaylist, StageFailure> {
        match self
            .load_manifest(JobStage::FetchingMedia, url, headers, cancel)
            .await?
        {
            Manifest::Media(playlist) => Ok(playlist),
            Manifest::Master(_) => Err(StageFailure::new(
                JobStage::FetchingMedia,
                JobError::UnexpectedManifest {
                    url: url.to_string(),
                    expected: "media",
                    found: "master",
                },
            )),
        }
    }

    async fn run_transform(
        &self,
        transform: &dyn MediaTransform,
        video: &AssemblyResult,
        renditions: &[(Track, AssemblyResult)],
    ) -> Result<(PathBuf, u64, String), StageFailure> {
        let track_path = |kind: RenditionKind| {
            renditions
                .iter()
                .find(|(track, _)| track.rendition.as_ref().is_some_and(|r| r.kind == kind))
                .map(|(_, result)| result.output_path.as_path())
        };
        let input = TransformInput {
            video: &video.output_path,
            audio: track_path(RenditionKind::Audio),
            subtitles: track_path(RenditionKind::Subtitles),
            output: &self.spec.output_path,
        };

        info!(transform = transform.name(), "running media transform");
        let produced = transform
            .transform(input)
            .await
            .map_err(|e| StageFailure::new(JobStage::Transforming, e))?;
        let (bytes, hash) = hash_file(&produced).await.map_err(|e| {
            StageFailure::new(
                JobStage::Transforming,
                TransformError::with_source(
                    format!("cannot read transform output {}", produced.display()),
                    e,
                ),
            )
        })?;
        Ok((produced, bytes, hash))
    }

    fn enter(&mut self, stage: JobStage) {
        self.transition(JobState::Active { stage });
    }

    fn transition(&mut self, next: JobState) {
        if !self.state.can_transition_to(&next) {
            warn!(from = %self.state, to = %next, "unexpected job state transition");
        }
        info!(from = %self.state, to = %next, "job state changed");
        self.state = next.clone();
        self.history.push(next);
    }

    fn complete(&mut self, report: JobReport) -> JobOutcome {
        let missing_indices = report.video.missing_indices.clone();
        let output_path = report.output_path.clone();

        if missing_indices.is_empty() && !report.renditions_incomplete() {
            self.transition(JobState::Done);
            info!(
                bytes = report.bytes_written,
                elapsed_ms = report.elapsed_ms,
                "job finished"
            );
            JobOutcome::Success {
                output_path,
                report,
            }
        } else {
            self.transition(JobState::PartiallyDone {
                missing_indices: missing_indices.clone(),
            });
            warn!(
                missing = missing_indices.len(),
                renditions_incomplete = report.renditions_incomplete(),
                "job finished with missing segments"
            );
            JobOutcome::PartialSuccess {
                output_path,
                missing_indices,
                report,
            }
        }
    }

    fn fail(&mut self, stage: JobStage, cause: JobError) -> JobOutcome {
        error!(stage = stage.as_str(), error = %cause, "job failed");
        self.transition(JobState::Failed {
            stage,
            cause: cause.to_string(),
        });
        JobOutcome::Failure { stage, cause }
    }
}

/// Runs `spec` with default collaborators and no external cancellation.
pub async fn run(spec: JobSpec) -> JobOutcome {
    DownloadJob::new(spec).run(&CancellationToken::new()).await
}
