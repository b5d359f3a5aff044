//! Idempotency guard.
//!
//! Under at-least-once delivery the same job-start message can arrive any
//! number of times. Given a validated command, the guard decides whether
//! this delivery is the first, a duplicate of an already settled job, or a
//! resume of an interrupted one.

use crate::validator::StartJobCommand;
use scriba_domain::repository::{CreateOutcome, JobRepository};
use scriba_domain::{DomainError, Job, JobStatus};
use std::sync::Arc;
use tracing::debug;

/// What to do with a delivery.
#[derive(Debug)]
pub enum Disposition {
    /// First delivery: a fresh `Pending` record was created.
    Fresh(Job),
    /// The job already settled. Ack with zero side effects; the occasional
    /// duplicate is expected, not an anomaly.
    DuplicateOfTerminal(JobStatus),
    /// The job exists but is unfinished: run the executor from its persisted
    /// stage rather than restarting, so completed stages' collaborators are
    /// never paid twice.
    Resume(Job),
}

pub struct IdempotencyGuard {
    jobs: Arc<dyn JobRepository>,
}

impl IdempotencyGuard {
    pub fn new(jobs: Arc<dyn JobRepository>) -> Self {
        Self { jobs }
    }

    pub async fn classify(&self, cmd: &StartJobCommand) -> Result<Disposition, DomainError> {
        if let Some(existing) = self.jobs.find_by_id(&cmd.job_id).await? {
            return Ok(Self::dispose_existing(existing));
        }

        let job = Job::new(
            cmd.job_id,
            cmd.requester_id.clone(),
            cmd.request_text.clone(),
            cmd.context_fields.clone(),
            cmd.requested_modalities.clone(),
            cmd.correlation_id.clone(),
        );

        match self.jobs.create(&job).await? {
            CreateOutcome::Created => Ok(Disposition::Fresh(job)),
            // Lost a create race against a concurrent duplicate delivery:
            // re-read and classify what the winner wrote.
            CreateOutcome::AlreadyExists => {
                debug!(job_id = %cmd.job_id, "concurrent create detected, re-reading");
                let existing = self
                    .jobs
                    .find_by_id(&cmd.job_id)
                    .await?
                    .ok_or(DomainError::JobNotFound { job_id: cmd.job_id })?;
                Ok(Self::dispose_existing(existing))
            }
        }
    }

    fn dispose_existing(job: Job) -> Disposition {
        if job.status.is_terminal() {
            Disposition::DuplicateOfTerminal(job.status)
        } else {
            Disposition::Resume(job)
        }
    }
}
