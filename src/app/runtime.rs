use std::fs;
use std::io::{self, IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::Ordering;

use anyhow::{Context, Result};
use clap::Parser;
use hlsgrab_core::download::constants::{CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS};
use hlsgrab_core::{
    DedupCache, DownloadJob, DownloadStats, HttpClient, JobOutcome, JobReport, JobSpec, JobStage,
    WorkspaceManager,
};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::ProcessExit;
use crate::app::config::{self, Settings};
use crate::app::{exit_handler, output, progress_manager, terminal};
use crate::cli::Args;

pub(crate) async fn run_hlsgrab() -> Result<ProcessExit> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();
    terminal::init_tracing(terminal::default_log_level(args.quiet, args.verbose));
    debug!(?args, "CLI arguments parsed");

    let file_config = config::load_default_file_config()?;
    let settings = Settings::resolve(&args, file_config.as_ref());
    debug!(?settings, "resolved settings");

    let inputs = collect_inputs(&args.urls)?;
    if inputs.is_empty() {
        info!("No input provided. Pass playlist URLs as arguments or pipe them via stdin.");
        info!("Example: hlsgrab https://cdn.example/show/master.m3u8 -o show.ts");
        return Ok(ProcessExit::Success);
    }

    let mut records = Vec::with_capacity(inputs.len());
    let mut urls = Vec::with_capacity(inputs.len());
    for input in inputs {
        match Url::parse(&input) {
            Ok(url) => urls.push(url),
            Err(e) => {
                warn!(input = %input, error = %e, "Skipping invalid URL");
                records.push(JobRecord::rejected(input, format!("invalid URL: {e}")));
            }
        }
    }

    let outputs = output::plan_outputs(&urls, args.output.as_deref());
    let client = HttpClient::new_with_timeouts(
        settings.connect_timeout_secs.unwrap_or(CONNECT_TIMEOUT_SECS),
        settings.read_timeout_secs.unwrap_or(READ_TIMEOUT_SECS),
    );
    let workspaces = settings
        .workspace_root
        .clone()
        .map_or_else(WorkspaceManager::default, WorkspaceManager::new);

    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; cancelling");
            signal_token.cancel();
        }
    });

    let stats = Arc::new(DownloadStats::new());
    let use_spinner = terminal::should_use_spinner(
        io::stderr().is_terminal(),
        args.quiet,
        args.json,
        terminal::is_dumb_terminal(),
    );
    let (progress_handle, progress_stop) =
        progress_manager::spawn_progress_ui(use_spinner, Arc::clone(&stats), urls.len());

    let mut dedup = DedupCache::new();
    for (url, output_path) in urls.into_iter().zip(outputs) {
        if cancel.is_cancelled() {
            records.push(JobRecord::rejected(url.to_string(), "skipped after interrupt".to_string()));
            continue;
        }
        if let Err(e) = ensure_parent_dir(&output_path) {
            warn!(output = %output_path.display(), error = %e, "Cannot prepare output directory");
            records.push(JobRecord::rejected(url.to_string(), format!("{e:#}")));
            continue;
        }

        let spec = JobSpec {
            manifest_url: url.clone(),
            output_path,
            headers: settings.headers.clone(),
            concurrency: settings.concurrency,
            variant_policy: settings.policy,
            segment_retries: settings.segment_retries,
            include_renditions: settings.include_renditions,
            buffer_mode: settings.buffer_mode,
            deadline: settings.deadline,
        };
        let mut job = DownloadJob::new(spec)
            .with_client(client.clone())
            .with_workspace_manager(workspaces.clone())
            .with_stats(Arc::clone(&stats));
        let outcome = job.run(&cancel).await;

        let duplicate_of = outcome
            .report()
            .and_then(|report| record_artifact(&mut dedup, report));
        if let Some(first) = &duplicate_of {
            warn!(
                url = %url,
                duplicate_of = %first.display(),
                "Output is identical to an earlier download"
            );
        }

        if !args.json {
            if outcome.is_failure() {
                eprintln!("{url}: {outcome}");
            } else {
                println!("{outcome}");
            }
        }
        records.push(JobRecord::from_outcome(&url, &outcome, duplicate_of));
    }

    progress_stop.store(true, Ordering::SeqCst);
    if let Some(handle) = progress_handle {
        let _ = handle.await;
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&records)?);
    }

    let (succeeded, partial, failed) = tally(&records);
    info!(
        succeeded,
        partial,
        failed,
        segments = stats.finished(),
        retried = stats.retried(),
        "All jobs finished"
    );
    if cancel.is_cancelled() {
        warn!("Interrupted; remaining jobs were not run");
    }

    Ok(exit_handler::determine_exit_outcome(succeeded, partial, failed))
}

/// Playlist URLs from arguments, or from stdin when none were given.
fn collect_inputs(urls: &[String]) -> Result<Vec<String>> {
    if !urls.is_empty() {
        return Ok(urls.to_vec());
    }
    if io::stdin().is_terminal() {
        return Ok(Vec::new());
    }
    let mut buffer = String::new();
    io::stdin()
        .read_to_string(&mut buffer)
        .context("Failed to read URLs from stdin")?;
    Ok(parse_input_lines(&buffer))
}

/// One URL per line; blank lines and `#` comments are ignored.
fn parse_input_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(ToString::to_string)
        .collect()
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) else {
        return Ok(());
    };
    if !parent.exists() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory '{}'", parent.display()))?;
        info!(dir = %parent.display(), "Created output directory");
    }
    Ok(())
}

/// Remembers a non-empty artifact, returning the earlier output with the same
/// content. Empty outputs all share one hash and are never compared.
fn record_artifact(dedup: &mut DedupCache, report: &JobReport) -> Option<PathBuf> {
    if report.bytes_written == 0 {
        return None;
    }
    dedup.record(&report.content_hash, &report.output_path)
}

/// Per-URL entry of the `--json` output.
#[derive(Debug, Serialize)]
struct JobRecord {
    url: String,
    status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    output_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    missing_indices: Vec<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    failed_stage: Option<JobStage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    duplicate_of: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    report: Option<JobReport>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum JobStatus {
    Success,
    PartialSuccess,
    Failure,
}

impl JobRecord {
    /// A URL that never reached a job.
    fn rejected(url: String, error: String) -> Self {
        Self {
            url,
            status: JobStatus::Failure,
            output_path: None,
            missing_indices: Vec::new(),
            failed_stage: None,
            error: Some(error),
            duplicate_of: None,
            report: None,
        }
    }

    fn from_outcome(url: &Url, outcome: &JobOutcome, duplicate_of: Option<PathBuf>) -> Self {
        let (status, missing_indices, failed_stage, error) = match outcome {
            JobOutcome::Success { .. } => (JobStatus::Success, Vec::new(), None, None),
            JobOutcome::PartialSuccess {
                missing_indices, ..
            } => (JobStatus::PartialSuccess, missing_indices.clone(), None, None),
            JobOutcome::Failure { stage, cause } => {
                (JobStatus::Failure, Vec::new(), Some(*stage), Some(cause.to_string()))
            }
        };
        Self {
            url: url.to_string(),
            status,
            output_path: outcome.output_path().map(Path::to_path_buf),
            missing_indices,
            failed_stage,
            error,
            duplicate_of,
            report: outcome.report().cloned(),
        }
    }
}

/// Counts (succeeded, partial, failed).
fn tally(records: &[JobRecord]) -> (usize, usize, usize) {
    records
        .iter()
        .fold((0, 0, 0), |(ok, partial, failed), record| match record.status {
            JobStatus::Success => (ok + 1, partial, failed),
            JobStatus::PartialSuccess => (ok, partial + 1, failed),
            JobStatus::Failure => (ok, partial, failed + 1),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use hlsgrab_core::JobError;

    #[test]
    fn test_parse_input_lines_skips_blanks_and_comments() {
        let lines = parse_input_lines(
            "\n  https://cdn.example/a.m3u8  \n# later\n\nhttps://cdn.example/b.m3u8\n",
        );
        assert_eq!(
            lines,
            vec![
                "https://cdn.example/a.m3u8".to_string(),
                "https://cdn.example/b.m3u8".to_string(),
            ]
        );
    }

    #[test]
    fn test_ensure_parent_dir_creates_missing_directories() {
        let root = tempfile::TempDir::new().unwrap();
        let output = root.path().join("a").join("b").join("show.ts");
        ensure_parent_dir(&output).unwrap();
        assert!(output.parent().unwrap().is_dir());

        ensure_parent_dir(Path::new("relative.ts")).unwrap();
    }

    #[test]
    fn test_failure_record_serializes_stage_and_error() {
        let url = Url::parse("https://cdn.example/master.m3u8").unwrap();
        let outcome = JobOutcome::Failure {
            stage: JobStage::FetchingMaster,
            cause: JobError::Cancelled,
        };
        let record = JobRecord::from_outcome(&url, &outcome, None);
        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["status"], "failure");
        assert_eq!(json["failed_stage"], "fetching_master");
        assert_eq!(json["error"], "job cancelled");
        assert!(json.get("report").is_none());
    }

    fn report(output: &str, bytes_written: u64, content_hash: &str) -> JobReport {
        let video = hlsgrab_core::TrackReport {
            track: "video".to_string(),
            name: None,
            language: None,
            output_path: Some(PathBuf::from(output)),
            segments_total: 2,
            segments_written: if bytes_written == 0 { 0 } else { 2 },
            missing_indices: if bytes_written == 0 { vec![0, 1] } else { Vec::new() },
            bytes_written,
            content_hash: content_hash.to_string(),
        };
        JobReport {
            manifest_url: "https://cdn.example/show/index.m3u8".to_string(),
            output_path: PathBuf::from(output),
            variant: None,
            duration_secs: 8.0,
            video,
            renditions: Vec::new(),
            bytes_written,
            content_hash: content_hash.to_string(),
            retries: 0,
            elapsed_ms: 10,
        }
    }

    #[test]
    fn test_record_artifact_flags_identical_outputs() {
        let mut dedup = DedupCache::new();
        assert_eq!(record_artifact(&mut dedup, &report("a.ts", 4, "abcd")), None);
        assert_eq!(
            record_artifact(&mut dedup, &report("b.ts", 4, "abcd")),
            Some(PathBuf::from("a.ts"))
        );
    }

    #[test]
    fn test_record_artifact_ignores_empty_outputs() {
        // sha256 of no bytes
        let empty = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";
        let mut dedup = DedupCache::new();
        assert_eq!(record_artifact(&mut dedup, &report("a.ts", 0, empty)), None);
        assert_eq!(record_artifact(&mut dedup, &report("b.ts", 0, empty)), None);
        assert!(dedup.is_empty());
    }

    #[test]
    fn test_tally_counts_each_status() {
        let url = Url::parse("https://cdn.example/master.m3u8").unwrap();
        let failure = JobOutcome::Failure {
            stage: JobStage::Created,
            cause: JobError::Cancelled,
        };
        let records = vec![
            JobRecord::rejected("not a url".to_string(), "invalid URL".to_string()),
            JobRecord::from_outcome(&url, &failure, None),
        ];
        assert_eq!(tally(&records), (0, 0, 2));
    }
}
