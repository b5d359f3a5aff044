use crate::ids::JobId;
use crate::status::JobStatus;

pub type Result<T> = std::result::Result<T, DomainError>;

#[derive(Debug, thiserror::Error)]
pub enum DomainError {
    #[error("Job not found: {job_id}")]
    JobNotFound { job_id: JobId },

    #[error("Invalid status transition for job {job_id}: {from} -> {to}")]
    InvalidStatusTransition {
        job_id: JobId,
        from: JobStatus,
        to: JobStatus,
    },

    /// A conditional write lost the optimistic-concurrency race. The caller
    /// backs off to idempotency-guard re-entry on the next delivery.
    #[error("Version conflict writing job {job_id}: expected version {expected}")]
    VersionConflict { job_id: JobId, expected: i64 },

    #[error("Store error: {message}")]
    Store { message: String },
}

impl DomainError {
    pub fn store(message: impl Into<String>) -> Self {
        DomainError::Store {
            message: message.into(),
        }
    }
}
