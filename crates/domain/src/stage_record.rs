//! Per-stage execution records, owned by the job.
//!
//! Records are created lazily when a stage first runs and are immutable once
//! settled. Retries of an in-progress stage bump `attempt_count`, preserving
//! history for audit.

use crate::ids::JobId;
use crate::pipeline::Stage;
use crate::status::StageStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    pub job_id: JobId,
    pub stage: Stage,
    pub order: u8,
    pub status: StageStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub output_snapshot: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub attempt_count: u32,
}

impl StageRecord {
    pub fn started(job_id: JobId, stage: Stage) -> Self {
        Self {
            job_id,
            stage,
            order: stage.order(),
            status: StageStatus::InProgress,
            started_at: Some(Utc::now()),
            finished_at: None,
            duration_ms: None,
            output_snapshot: None,
            error_message: None,
            attempt_count: 1,
        }
    }

    pub fn skipped(job_id: JobId, stage: Stage) -> Self {
        let now = Utc::now();
        Self {
            job_id,
            stage,
            order: stage.order(),
            status: StageStatus::Skipped,
            started_at: Some(now),
            finished_at: Some(now),
            duration_ms: Some(0),
            output_snapshot: None,
            error_message: None,
            attempt_count: 0,
        }
    }

    pub fn complete(&mut self, output_snapshot: Option<serde_json::Value>) {
        let now = Utc::now();
        self.status = StageStatus::Completed;
        self.finished_at = Some(now);
        self.duration_ms = self
            .started_at
            .map(|s| now.signed_duration_since(s).num_milliseconds());
        self.output_snapshot = output_snapshot;
    }

    pub fn fail(&mut self, error_message: String) {
        let now = Utc::now();
        self.status = StageStatus::Failed;
        self.finished_at = Some(now);
        self.duration_ms = self
            .started_at
            .map(|s| now.signed_duration_since(s).num_milliseconds());
        self.error_message = Some(error_message);
    }

    pub fn record_attempt(&mut self) {
        self.attempt_count += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_started_record_is_in_progress_with_one_attempt() {
        let rec = StageRecord::started(JobId::new(), Stage::GeneratingScript);
        assert_eq!(rec.status, StageStatus::InProgress);
        assert_eq!(rec.attempt_count, 1);
        assert_eq!(rec.order, 2);
        assert!(rec.started_at.is_some());
        assert!(rec.finished_at.is_none());
    }

    #[test]
    fn test_complete_settles_with_duration_and_snapshot() {
        let mut rec = StageRecord::started(JobId::new(), Stage::Validating);
        rec.complete(Some(serde_json::json!({"topic": "photosynthesis"})));
        assert_eq!(rec.status, StageStatus::Completed);
        assert!(rec.finished_at.is_some());
        assert!(rec.duration_ms.is_some());
        assert!(rec.output_snapshot.is_some());
    }

    #[test]
    fn test_retries_accumulate_attempts() {
        let mut rec = StageRecord::started(JobId::new(), Stage::GeneratingMedia);
        rec.record_attempt();
        rec.record_attempt();
        rec.fail("timed out".to_string());
        assert_eq!(rec.attempt_count, 3);
        assert_eq!(rec.status, StageStatus::Failed);
        assert_eq!(rec.error_message.as_deref(), Some("timed out"));
    }

    #[test]
    fn test_skipped_record_never_ran() {
        let rec = StageRecord::skipped(JobId::new(), Stage::GeneratingMedia);
        assert_eq!(rec.status, StageStatus::Skipped);
        assert_eq!(rec.attempt_count, 0);
        assert_eq!(rec.duration_ms, Some(0));
    }
}
