//! Exit code logic for the hlsgrab process.
//!
//! Single responsibility: map per-job outcomes to the process exit outcome.

use crate::ProcessExit;

/// Determines the process exit outcome from job counts.
///
/// `partial` counts jobs that produced output with missing segments.
pub(crate) fn determine_exit_outcome(succeeded: usize, partial: usize, failed: usize) -> ProcessExit {
    if failed == 0 && partial == 0 {
        ProcessExit::Success
    } else if succeeded + partial > 0 {
        ProcessExit::Partial
    } else {
        ProcessExit::Failure
    }
}
