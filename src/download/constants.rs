//! Constants for the download module (timeouts, worker pool bounds).

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default total request timeout (2 minutes). Playlists and segments are
/// small, so a request that takes longer than this is treated as stalled.
pub const READ_TIMEOUT_SECS: u64 = 120;

/// Minimum allowed worker count.
pub const MIN_CONCURRENCY: usize = 1;

/// Maximum allowed worker count.
pub const MAX_CONCURRENCY: usize = 100;

/// Default worker count for segment downloads.
pub const DEFAULT_CONCURRENCY: usize = 5;
