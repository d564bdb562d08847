//! CLI argument definitions using clap derive macros.
//!
//! Most options are `Option`s so that values from the config file can fill
//! whatever the command line leaves unset.

use std::path::PathBuf;

use clap::Parser;
use hlsgrab_core::VariantPolicy;

/// Download HLS streams into single media files.
///
/// Takes master or media playlist URLs as arguments, or one per line on
/// stdin, and writes one output file per URL.
#[derive(Parser, Debug)]
#[command(name = "hlsgrab")]
#[command(author, version, about)]
pub struct Args {
    /// Playlist URLs (read from stdin when omitted)
    pub urls: Vec<String>,

    /// Output file for a single URL, output directory for several
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Extra request header as "Name: Value" (repeatable)
    #[arg(short = 'H', long = "header", value_parser = parse_header_arg)]
    pub headers: Vec<(String, String)>,

    /// User-Agent header for every request
    #[arg(long)]
    pub user_agent: Option<String>,

    /// Referer header for every request
    #[arg(long)]
    pub referer: Option<String>,

    /// Concurrent segment downloads (1-100) [default: 5]
    #[arg(short = 'c', long, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub concurrency: Option<u8>,

    /// Retries per failed segment (0-10) [default: 0]
    #[arg(short = 'r', long, value_parser = clap::value_parser!(u8).range(0..=10))]
    pub max_retries: Option<u8>,

    /// Variant choice: highest, lowest, bandwidth:<bps> or resolution:<W>x<H>
    #[arg(short = 'p', long)]
    pub policy: Option<VariantPolicy>,

    /// Also download the audio and subtitle renditions of the chosen variant
    #[arg(long)]
    pub renditions: bool,

    /// Keep segment buffers in memory instead of the workspace directory
    #[arg(long)]
    pub memory_buffers: bool,

    /// Directory job workspaces are created in [default: system temp dir]
    #[arg(long)]
    pub workspace_root: Option<PathBuf>,

    /// Cancel each job after this many seconds
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..=86_400))]
    pub deadline_secs: Option<u64>,

    /// HTTP connect timeout in seconds (1-3600)
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..=3600))]
    pub connect_timeout_secs: Option<u64>,

    /// HTTP read timeout in seconds (1-3600)
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..=3600))]
    pub read_timeout_secs: Option<u64>,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,

    /// Print job reports as JSON on stdout
    #[arg(long)]
    pub json: bool,
}

/// Parses `Name: Value` into a header pair.
fn parse_header_arg(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected \"Name: Value\", got '{raw}'"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("header name is empty in '{raw}'"));
    }
    Ok((name.to_string(), value.trim().to_string()))
}
