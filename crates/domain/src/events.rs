//! Append-only audit events and the status fan-out payload.

use crate::ids::JobId;
use crate::job::Job;
use crate::pipeline::Stage;
use crate::status::JobStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of audit event appended to a job's history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobEventKind {
    JobReceived,
    StageStarted,
    StageCompleted,
    StageSkipped,
    StageRetried,
    StageFailed,
    JobCompleted,
    JobFailed,
    ClarificationRequested,
    DuplicateDelivery,
}

impl std::fmt::Display for JobEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobEventKind::JobReceived => "job_received",
            JobEventKind::StageStarted => "stage_started",
            JobEventKind::StageCompleted => "stage_completed",
            JobEventKind::StageSkipped => "stage_skipped",
            JobEventKind::StageRetried => "stage_retried",
            JobEventKind::StageFailed => "stage_failed",
            JobEventKind::JobCompleted => "job_completed",
            JobEventKind::JobFailed => "job_failed",
            JobEventKind::ClarificationRequested => "clarification_requested",
            JobEventKind::DuplicateDelivery => "duplicate_delivery",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for JobEventKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "job_received" => Ok(JobEventKind::JobReceived),
            "stage_started" => Ok(JobEventKind::StageStarted),
            "stage_completed" => Ok(JobEventKind::StageCompleted),
            "stage_skipped" => Ok(JobEventKind::StageSkipped),
            "stage_retried" => Ok(JobEventKind::StageRetried),
            "stage_failed" => Ok(JobEventKind::StageFailed),
            "job_completed" => Ok(JobEventKind::JobCompleted),
            "job_failed" => Ok(JobEventKind::JobFailed),
            "clarification_requested" => Ok(JobEventKind::ClarificationRequested),
            "duplicate_delivery" => Ok(JobEventKind::DuplicateDelivery),
            other => Err(format!("Unknown event kind: {}", other)),
        }
    }
}

/// One append-only audit row. Never mutated; retention is an operational
/// concern, not a correctness one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEvent {
    pub job_id: JobId,
    pub kind: JobEventKind,
    pub status: JobStatus,
    pub stage: Option<Stage>,
    pub message: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl JobEvent {
    pub fn now(job: &Job, kind: JobEventKind, message: Option<String>) -> Self {
        Self {
            job_id: job.id,
            kind,
            status: job.status,
            stage: job.current_stage,
            message,
            occurred_at: Utc::now(),
        }
    }
}

/// Payload published to the status fan-out channel on every transition.
///
/// Best-effort latency convenience for live dashboards; the job store stays
/// the source of truth and observers re-fetch on (re)connect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub job_id: JobId,
    pub status: JobStatus,
    pub stage: Option<Stage>,
    pub progress_percentage: u8,
    pub timestamp: DateTime<Utc>,
}

impl StatusUpdate {
    pub fn from_job(job: &Job) -> Self {
        Self {
            job_id: job.id,
            status: job.status,
            stage: job.current_stage,
            progress_percentage: job.progress_percentage(),
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::Job;

    #[test]
    fn test_status_update_reflects_job() {
        let mut job = Job::new(
            JobId::new(),
            "u1".to_string(),
            "t".to_string(),
            serde_json::json!({}),
            vec![],
            None,
        );
        job.begin_stage(Stage::GeneratingScript).unwrap();

        let update = StatusUpdate::from_job(&job);
        assert_eq!(update.job_id, job.id);
        assert_eq!(update.status, JobStatus::GeneratingScript);
        assert_eq!(update.stage, Some(Stage::GeneratingScript));
        assert_eq!(update.progress_percentage, 45);
    }

    #[test]
    fn test_job_event_snapshot() {
        let job = Job::new(
            JobId::new(),
            "u1".to_string(),
            "t".to_string(),
            serde_json::json!({}),
            vec![],
            None,
        );
        let event = JobEvent::now(&job, JobEventKind::JobReceived, None);
        assert_eq!(event.status, JobStatus::Pending);
        assert_eq!(event.stage, None);
        assert_eq!(event.kind, JobEventKind::JobReceived);
    }
}
