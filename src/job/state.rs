//! Job lifecycle states.

use std::fmt;

use serde::Serialize;

/// Non-terminal stage a job can be in (and fail at).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStage {
    Created,
    FetchingMaster,
    SelectingVariant,
    FetchingMedia,
    Downloading,
    Assembling,
    Transforming,
}

impl JobStage {
    /// Stable identifier, as used in JSON output.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::FetchingMaster => "fetching_master",
            Self::SelectingVariant => "selecting_variant",
            Self::FetchingMedia => "fetching_media",
            Self::Downloading => "downloading",
            Self::Assembling => "assembling",
            Self::Transforming => "transforming",
        }
    }
}

impl fmt::Display for JobStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Created => "preparing the job",
            Self::FetchingMaster => "fetching the playlist",
            Self::SelectingVariant => "selecting a variant",
            Self::FetchingMedia => "fetching the media playlist",
            Self::Downloading => "downloading segments",
            Self::Assembling => "assembling the output",
            Self::Transforming => "transforming the output",
        })
    }
}

/// Where a job is in its lifecycle.
///
/// ```text
/// Created → FetchingMaster → SelectingVariant → FetchingMedia → Downloading
///         → Assembling → [Transforming] → Done | PartiallyDone
/// ```
///
/// A media playlist URL goes straight from `FetchingMaster` to `Downloading`.
/// `Failed` is reachable from every stage; from `Downloading` only through
/// cancellation. `PartiallyDone` is reachable only from `Assembling` and
/// `Transforming`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    Active { stage: JobStage },
    Done,
    PartiallyDone { missing_indices: Vec<usize> },
    Failed { stage: JobStage, cause: String },
}

impl JobState {
    #[must_use]
    pub fn created() -> Self {
        Self::Active {
            stage: JobStage::Created,
        }
    }

    /// The active stage, if the job has not finished.
    #[must_use]
    pub fn stage(&self) -> Option<JobStage> {
        match self {
            Self::Active { stage } => Some(*stage),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Active { .. })
    }

    /// Whether the lifecycle allows moving from `self` to `next`.
    #[must_use]
    pub fn can_transition_to(&self, next: &Self) -> bool {
        use JobStage::{
            Assembling, Created, Downloading, FetchingMaster, FetchingMedia, SelectingVariant,
            Transforming,
        };

        let Self::Active { stage: from } = self else {
            return false;
        };

        match next {
            Self::Active { stage: to } => matches!(
                (from, to),
                (Created, FetchingMaster)
                    | (FetchingMaster, SelectingVariant | Downloading)
                    | (SelectingVariant, FetchingMedia)
                    | (FetchingMedia, Downloading)
                    | (Downloading, Assembling)
                    | (Assembling, Transforming)
            ),
            Self::Done | Self::PartiallyDone { .. } => matches!(from, Assembling | Transforming),
            Self::Failed { stage, .. } => stage == from,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active { stage } => f.write_str(stage.as_str()),
            Self::Done => f.write_str("done"),
            Self::PartiallyDone { missing_indices } => {
                write!(f, "partially done ({} missing)", missing_indices.len())
            }
            Self::Failed { stage, .. } => write!(f, "failed at {}", stage.as_str()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn active(stage: JobStage) -> JobState {
        JobState::Active { stage }
    }

    fn failed(stage: JobStage) -> JobState {
        JobState::Failed {
            stage,
            cause: "boom".to_string(),
        }
    }

    #[test]
    fn test_linear_path_is_legal() {
        let path = [
            JobStage::Created,
            JobStage::FetchingMaster,
            JobStage::SelectingVariant,
            JobStage::FetchingMedia,
            JobStage::Downloading,
            JobStage::Assembling,
            JobStage::Transforming,
        ];
        for pair in path.windows(2) {
            assert!(
                active(pair[0]).can_transition_to(&active(pair[1])),
                "{} -> {}",
                pair[0],
                pair[1]
            );
        }
        assert!(active(JobStage::Transforming).can_transition_to(&JobState::Done));
        assert!(active(JobStage::Assembling).can_transition_to(&JobState::Done));
    }

    #[test]
    fn test_media_playlist_shortcut() {
        assert!(active(JobStage::FetchingMaster).can_transition_to(&active(JobStage::Downloading)));
    }

    #[test]
    fn test_partial_only_after_assembly() {
        let partial = JobState::PartiallyDone {
            missing_indices: vec![1],
        };
        assert!(active(JobStage::Assembling).can_transition_to(&partial));
        assert!(active(JobStage::Transforming).can_transition_to(&partial));
        assert!(!active(JobStage::Downloading).can_transition_to(&partial));
        assert!(!active(JobStage::FetchingMedia).can_transition_to(&JobState::Done));
    }

    #[test]
    fn test_failed_records_current_stage_only() {
        assert!(active(JobStage::FetchingMaster).can_transition_to(&failed(JobStage::FetchingMaster)));
        assert!(!active(JobStage::FetchingMaster).can_transition_to(&failed(JobStage::Assembling)));
    }

    #[test]
    fn test_terminal_states_are_absorbing() {
        for terminal in [
            JobState::Done,
            JobState::PartiallyDone {
                missing_indices: vec![],
            },
            failed(JobStage::Created),
        ] {
            assert!(terminal.is_terminal());
            assert!(!terminal.can_transition_to(&active(JobStage::FetchingMaster)));
            assert!(!terminal.can_transition_to(&JobState::Done));
        }
    }

    #[test]
    fn test_no_skipping_stages() {
        assert!(!active(JobStage::Created).can_transition_to(&active(JobStage::Downloading)));
        assert!(!active(JobStage::SelectingVariant).can_transition_to(&active(JobStage::Assembling)));
        assert!(!active(JobStage::Assembling).can_transition_to(&active(JobStage::Downloading)));
    }
}
