//! Repository ports over the job store.
//!
//! The job store is the only shared mutable resource in the system. All job
//! writes go through [`JobRepository::update`], which is conditioned on the
//! job's version: concurrent duplicate deliveries detect the conflict and
//! fall back to idempotency-guard re-entry instead of corrupting state.

use crate::error::Result;
use crate::events::JobEvent;
use crate::ids::JobId;
use crate::job::Job;
use crate::pipeline::Stage;
use crate::stage_record::StageRecord;
use crate::status::JobStatus;
use async_trait::async_trait;

/// Outcome of a conditional insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    /// A record with this id already exists; the caller re-reads and
    /// classifies the delivery instead.
    AlreadyExists,
}

/// Filter for paginated job listings.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub requester_id: Option<String>,
    pub limit: i64,
    pub offset: i64,
}

#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Insert the job if no record with its id exists yet.
    async fn create(&self, job: &Job) -> Result<CreateOutcome>;

    async fn find_by_id(&self, job_id: &JobId) -> Result<Option<Job>>;

    /// Conditional update: succeeds only if the stored version matches
    /// `job.version`, then bumps it (both in the store and on `job`).
    /// Returns [`crate::DomainError::VersionConflict`] when the row moved
    /// under us.
    async fn update(&self, job: &mut Job) -> Result<()>;

    /// Matching page of jobs plus the total count for the filter.
    async fn list(&self, filter: &JobFilter) -> Result<(Vec<Job>, i64)>;
}

#[async_trait]
pub trait StageRepository: Send + Sync {
    /// Insert or replace the record for (job, stage).
    async fn upsert(&self, record: &StageRecord) -> Result<()>;

    async fn find(&self, job_id: &JobId, stage: Stage) -> Result<Option<StageRecord>>;

    /// All records for a job, in stage order.
    async fn find_by_job(&self, job_id: &JobId) -> Result<Vec<StageRecord>>;
}

#[async_trait]
pub trait EventRepository: Send + Sync {
    async fn append(&self, event: &JobEvent) -> Result<()>;

    /// Most recent events first.
    async fn recent_for_job(&self, job_id: &JobId, limit: i64) -> Result<Vec<JobEvent>>;
}
