use crate::pipeline::Stage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle status of a job.
///
/// This is a closed union: unknown status strings are a parse error, never a
/// silently mishandled default. Transitions are monotonic along the stage
/// order except the two terminal branches (`Failed`, `NeedsClarification`),
/// which are reachable from any in-progress status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Validating,
    RetrievingContext,
    GeneratingScript,
    GeneratingMedia,
    ProcessingOutput,
    Notifying,
    Completed,
    Failed,
    NeedsClarification,
}

impl JobStatus {
    /// Position along the pipeline, used to enforce monotonicity.
    /// Terminal branches carry no rank.
    fn rank(&self) -> Option<u8> {
        match self {
            JobStatus::Pending => Some(0),
            JobStatus::Validating => Some(1),
            JobStatus::RetrievingContext => Some(2),
            JobStatus::GeneratingScript => Some(3),
            JobStatus::GeneratingMedia => Some(4),
            JobStatus::ProcessingOutput => Some(5),
            JobStatus::Notifying => Some(6),
            JobStatus::Completed => Some(7),
            JobStatus::Failed | JobStatus::NeedsClarification => None,
        }
    }

    /// Valid transitions:
    /// - forward along the stage order, never backwards
    /// - `Failed` from any non-terminal status
    /// - `NeedsClarification` from any in-progress status
    /// - terminal statuses have no outgoing transitions
    pub fn can_transition_to(&self, next: &JobStatus) -> bool {
        if self == next || self.is_terminal() {
            return false;
        }
        match next {
            JobStatus::Failed => true,
            JobStatus::NeedsClarification => *self != JobStatus::Pending,
            _ => match (self.rank(), next.rank()) {
                (Some(from), Some(to)) => to > from,
                _ => false,
            },
        }
    }

    /// Terminal statuses never transition again. `NeedsClarification` is
    /// terminal-for-now: a settled success, not an error.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::NeedsClarification
        )
    }

    pub fn is_in_progress(&self) -> bool {
        !self.is_terminal() && *self != JobStatus::Pending
    }

    /// The status a job carries while the given stage runs.
    pub fn for_stage(stage: Stage) -> Self {
        match stage {
            Stage::Validating => JobStatus::Validating,
            Stage::RetrievingContext => JobStatus::RetrievingContext,
            Stage::GeneratingScript => JobStatus::GeneratingScript,
            Stage::GeneratingMedia => JobStatus::GeneratingMedia,
            Stage::ProcessingOutput => JobStatus::ProcessingOutput,
            Stage::Notifying => JobStatus::Notifying,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Validating => "validating",
            JobStatus::RetrievingContext => "retrieving_context",
            JobStatus::GeneratingScript => "generating_script",
            JobStatus::GeneratingMedia => "generating_media",
            JobStatus::ProcessingOutput => "processing_output",
            JobStatus::Notifying => "notifying",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::NeedsClarification => "needs_clarification",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "validating" => Ok(JobStatus::Validating),
            "retrieving_context" => Ok(JobStatus::RetrievingContext),
            "generating_script" => Ok(JobStatus::GeneratingScript),
            "generating_media" => Ok(JobStatus::GeneratingMedia),
            "processing_output" => Ok(JobStatus::ProcessingOutput),
            "notifying" => Ok(JobStatus::Notifying),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "needs_clarification" => Ok(JobStatus::NeedsClarification),
            _ => Err(format!("Invalid JobStatus: {}", s)),
        }
    }
}

/// Status of a single stage record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Skipped,
}

impl StageStatus {
    /// Settled records are immutable; retries only bump `attempt_count`
    /// while the record stays `InProgress`.
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            StageStatus::Completed | StageStatus::Failed | StageStatus::Skipped
        )
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StageStatus::Pending => "pending",
            StageStatus::InProgress => "in_progress",
            StageStatus::Completed => "completed",
            StageStatus::Failed => "failed",
            StageStatus::Skipped => "skipped",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for StageStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(StageStatus::Pending),
            "in_progress" => Ok(StageStatus::InProgress),
            "completed" => Ok(StageStatus::Completed),
            "failed" => Ok(StageStatus::Failed),
            "skipped" => Ok(StageStatus::Skipped),
            _ => Err(format!("Invalid StageStatus: {}", s)),
        }
    }
}
