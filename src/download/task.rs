//! Per-segment download tasks and their buffers.

use std::fmt;
use std::path::PathBuf;

use bytes::Bytes;

use super::DownloadError;
use crate::manifest::Segment;

/// Where a segment body is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BufferTarget {
    /// A file inside the job's workspace.
    File(PathBuf),
    /// An owned in-memory buffer.
    Memory,
}

/// Bytes of one downloaded segment, held until the reassembler consumes them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentBuffer {
    /// Segment body stored in a workspace file.
    File {
        /// Location of the buffer file.
        path: PathBuf,
        /// Number of bytes written.
        len: u64,
    },
    /// Segment body kept in memory.
    Memory(Bytes),
}

impl SegmentBuffer {
    /// Number of bytes held.
    #[must_use]
    pub fn len(&self) -> u64 {
        match self {
            Self::File { len, .. } => *len,
            Self::Memory(bytes) => bytes.len() as u64,
        }
    }

    /// True when the segment body was empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Lifecycle of one segment download.
///
/// Transitions are monotonic: `Pending → InFlight → Succeeded | Failed`, or
/// `Pending → Failed` for a task cancelled before dispatch. Terminal states
/// never change.
#[derive(Debug)]
pub enum TaskState {
    Pending,
    InFlight,
    Succeeded(SegmentBuffer),
    Failed(DownloadError),
}

impl TaskState {
    /// True for `Succeeded` and `Failed`.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded(_) | Self::Failed(_))
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InFlight => "in-flight",
            Self::Succeeded(_) => "succeeded",
            Self::Failed(_) => "failed",
        }
    }

    fn may_become(&self, next: &Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::InFlight | Self::Failed(_))
                | (Self::InFlight, Self::Succeeded(_) | Self::Failed(_))
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One segment paired with its download state.
#[derive(Debug)]
pub struct DownloadTask {
    pub segment: Segment,
    state: TaskState,
}

impl DownloadTask {
    /// Creates a pending task.
    #[must_use]
    pub fn new(segment: Segment) -> Self {
        Self {
            segment,
            state: TaskState::Pending,
        }
    }

    /// Position of the segment in its playlist.
    #[must_use]
    pub fn index(&self) -> usize {
        self.segment.sequence_index
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> &TaskState {
        &self.state
    }

    /// Moves the task to `next` if the transition is legal.
    ///
    /// An illegal transition leaves the task unchanged and hands `next`
    /// back in the error.
    pub fn transition(&mut self, next: TaskState) -> Result<(), TaskState> {
        if self.state.may_become(&next) {
            self.state = next;
            Ok(())
        } else {
            Err(next)
        }
    }

    /// Marks a non-terminal task failed. Terminal tasks are left untouched.
    pub(crate) fn fail_if_unfinished(&mut self, error: DownloadError) {
        if !self.state.is_terminal() {
            self.state = TaskState::Failed(error);
        }
    }

    /// Consumes the task, returning its final state.
    #[must_use]
    pub fn into_state(self) -> TaskState {
        self.state
    }
}
