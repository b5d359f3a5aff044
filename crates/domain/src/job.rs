//! The Job aggregate: one end-to-end content-generation request and its
//! persisted state.

use crate::error::{DomainError, Result};
use crate::ids::JobId;
use crate::pipeline::{Modality, Stage};
use crate::status::JobStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Incrementally populated output of a job.
///
/// Intermediate artifacts (topic, snippets, media handle) are persisted here
/// so a resumed delivery picks up where the last attempt stopped instead of
/// re-invoking paid collaborators.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobOutput {
    pub topic: Option<String>,
    pub topic_confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub context_snippets: Vec<String>,
    pub script: Option<String>,
    /// Handle returned by the media synthesizer; present once submission
    /// succeeded so a retried stage polls instead of re-submitting.
    pub media_handle: Option<String>,
    pub media_url: Option<String>,
    pub captions: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub clarification_questions: Vec<String>,
}

/// Sanitized failure detail surfaced through the query API.
///
/// Raw collaborator errors stay in the logs; only this summary is stored on
/// the job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub stage: Stage,
    pub message: String,
    pub retry_count: u32,
}

/// The job aggregate. Created `Pending` by the request API, mutated only by
/// the consumer runtime and stage executor, never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    /// For tracing only, never identity.
    pub correlation_id: Option<String>,
    pub requester_id: String,
    pub request_text: String,
    pub context_fields: serde_json::Value,
    pub requested_modalities: Vec<Modality>,
    pub status: JobStatus,
    pub current_stage: Option<Stage>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    /// Set when the job settles: completion, failure or clarification.
    pub completed_at: Option<DateTime<Utc>>,
    pub output: JobOutput,
    pub error_detail: Option<ErrorDetail>,
    pub retry_count: u32,
    /// Optimistic-concurrency guard; bumped by every store write.
    pub version: i64,
}

impl Job {
    pub fn new(
        id: JobId,
        requester_id: String,
        request_text: String,
        context_fields: serde_json::Value,
        requested_modalities: Vec<Modality>,
        correlation_id: Option<String>,
    ) -> Self {
        Self {
            id,
            correlation_id,
            requester_id,
            request_text,
            context_fields,
            requested_modalities,
            status: JobStatus::Pending,
            current_stage: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            output: JobOutput::default(),
            error_detail: None,
            retry_count: 0,
            version: 0,
        }
    }

    /// Whether the requested modalities include any media output.
    /// An empty list means the caller never sent the field: default to full.
    pub fn wants_media(&self) -> bool {
        self.requested_modalities.is_empty()
            || self.requested_modalities.iter().any(|m| m.includes_media())
    }

    /// Mark the given stage as the one currently running.
    ///
    /// Persisting this before the external call is what makes redelivery
    /// resume instead of restart.
    pub fn begin_stage(&mut self, stage: Stage) -> Result<()> {
        let next = JobStatus::for_stage(stage);
        if self.status != next {
            self.transition_to(next)?;
        }
        if self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
        self.current_stage = Some(stage);
        Ok(())
    }

    /// Settle the job as completed.
    pub fn complete(&mut self) -> Result<()> {
        self.transition_to(JobStatus::Completed)?;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Settle the job as failed with a sanitized error detail.
    pub fn fail(&mut self, stage: Stage, message: String, retry_count: u32) -> Result<()> {
        self.transition_to(JobStatus::Failed)?;
        self.completed_at = Some(Utc::now());
        self.error_detail = Some(ErrorDetail {
            stage,
            message,
            retry_count,
        });
        Ok(())
    }

    /// Settle the job as needing clarification. Not an error: the questions
    /// go into the output and the job counts as a success.
    pub fn need_clarification(&mut self, questions: Vec<String>) -> Result<()> {
        self.transition_to(JobStatus::NeedsClarification)?;
        self.completed_at = Some(Utc::now());
        self.output.clarification_questions = questions;
        Ok(())
    }

    fn transition_to(&mut self, next: JobStatus) -> Result<()> {
        if !self.status.can_transition_to(&next) {
            return Err(DomainError::InvalidStatusTransition {
                job_id: self.id,
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Derived progress, keyed off the status. Terminal branches report the
    /// progress of the stage they settled from.
    pub fn progress_percentage(&self) -> u8 {
        match self.status {
            JobStatus::Pending => 0,
            JobStatus::Validating => 10,
            JobStatus::RetrievingContext => 25,
            JobStatus::GeneratingScript => 45,
            JobStatus::GeneratingMedia => 70,
            JobStatus::ProcessingOutput => 85,
            JobStatus::Notifying => 95,
            JobStatus::Completed => 100,
            JobStatus::Failed | JobStatus::NeedsClarification => match self.current_stage {
                Some(Stage::Validating) => 10,
                Some(Stage::RetrievingContext) => 25,
                Some(Stage::GeneratingScript) => 45,
                Some(Stage::GeneratingMedia) => 70,
                Some(Stage::ProcessingOutput) => 85,
                Some(Stage::Notifying) => 95,
                None => 0,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> Job {
        Job::new(
            JobId::new(),
            "u1".to_string(),
            "explain photosynthesis".to_string(),
            serde_json::json!({"grade": 9}),
            vec![],
            None,
        )
    }

    #[test]
    fn test_begin_stage_advances_status_and_records_stage() {
        let mut job = job();
        job.begin_stage(Stage::Validating).unwrap();
        assert_eq!(job.status, JobStatus::Validating);
        assert_eq!(job.current_stage, Some(Stage::Validating));
        assert!(job.started_at.is_some());

        job.begin_stage(Stage::RetrievingContext).unwrap();
        assert_eq!(job.status, JobStatus::RetrievingContext);
    }

    #[test]
    fn test_stage_regression_is_rejected() {
        let mut job = job();
        job.begin_stage(Stage::GeneratingScript).unwrap();
        let err = job.begin_stage(Stage::Validating).unwrap_err();
        assert!(matches!(err, DomainError::InvalidStatusTransition { .. }));
        // The failed transition leaves the job untouched.
        assert_eq!(job.status, JobStatus::GeneratingScript);
        assert_eq!(job.current_stage, Some(Stage::GeneratingScript));
    }

    #[test]
    fn test_complete_requires_notifying() {
        let mut job = job();
        assert!(job.complete().is_err());

        job.begin_stage(Stage::Notifying).unwrap();
        job.complete().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.completed_at.is_some());
        assert_eq!(job.progress_percentage(), 100);
    }

    #[test]
    fn test_fail_from_any_stage_sets_error_detail() {
        let mut job = job();
        job.begin_stage(Stage::GeneratingMedia).unwrap();
        job.fail(Stage::GeneratingMedia, "synthesis backend unavailable".to_string(), 3)
            .unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        let detail = job.error_detail.as_ref().unwrap();
        assert_eq!(detail.stage, Stage::GeneratingMedia);
        assert_eq!(detail.retry_count, 3);
        // Terminal: nothing moves afterwards.
        assert!(job.begin_stage(Stage::ProcessingOutput).is_err());
    }

    #[test]
    fn test_clarification_is_settled_success_with_questions() {
        let mut job = job();
        job.begin_stage(Stage::GeneratingScript).unwrap();
        job.need_clarification(vec!["Which grade level?".to_string()])
            .unwrap();
        assert_eq!(job.status, JobStatus::NeedsClarification);
        assert!(job.error_detail.is_none());
        assert_eq!(job.output.clarification_questions.len(), 1);
        assert!(job.completed_at.is_some());
    }

    #[test]
    fn test_wants_media_defaults_to_full() {
        let mut job = job();
        assert!(job.wants_media());
        job.requested_modalities = vec![Modality::Text];
        assert!(!job.wants_media());
        job.requested_modalities = vec![Modality::Text, Modality::Video];
        assert!(job.wants_media());
    }

    #[test]
    fn test_progress_is_monotonic_along_pipeline() {
        let mut job = job();
        let mut last = job.progress_percentage();
        for stage in [
            Stage::Validating,
            Stage::RetrievingContext,
            Stage::GeneratingScript,
            Stage::GeneratingMedia,
            Stage::ProcessingOutput,
            Stage::Notifying,
        ] {
            job.begin_stage(stage).unwrap();
            let p = job.progress_percentage();
            assert!(p > last, "progress must grow at {}", stage);
            last = p;
        }
    }
}
