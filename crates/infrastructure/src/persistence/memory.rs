//! In-memory repository implementations.
//!
//! Used by the integration scenario tests and handy for local experiments.
//! Semantics mirror the Postgres implementations, including the
//! version-conditioned update.

use async_trait::async_trait;
use scriba_domain::repository::{
    CreateOutcome, EventRepository, JobFilter, JobRepository, StageRepository,
};
use scriba_domain::{DomainError, Job, JobEvent, JobId, Result, Stage, StageRecord};
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Default)]
pub struct InMemoryJobRepository {
    jobs: Mutex<HashMap<JobId, Job>>,
}

impl InMemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobRepository for InMemoryJobRepository {
    async fn create(&self, job: &Job) -> Result<CreateOutcome> {
        let mut jobs = self.jobs.lock().unwrap();
        if jobs.contains_key(&job.id) {
            return Ok(CreateOutcome::AlreadyExists);
        }
        jobs.insert(job.id, job.clone());
        Ok(CreateOutcome::Created)
    }

    async fn find_by_id(&self, job_id: &JobId) -> Result<Option<Job>> {
        Ok(self.jobs.lock().unwrap().get(job_id).cloned())
    }

    async fn update(&self, job: &mut Job) -> Result<()> {
        let mut jobs = self.jobs.lock().unwrap();
        let stored = jobs
            .get_mut(&job.id)
            .ok_or(DomainError::JobNotFound { job_id: job.id })?;
        if stored.version != job.version {
            return Err(DomainError::VersionConflict {
                job_id: job.id,
                expected: job.version,
            });
        }
        job.version += 1;
        *stored = job.clone();
        Ok(())
    }

    async fn list(&self, filter: &JobFilter) -> Result<(Vec<Job>, i64)> {
        let jobs = self.jobs.lock().unwrap();
        let mut matching: Vec<Job> = jobs
            .values()
            .filter(|j| filter.status.map_or(true, |s| j.status == s))
            .filter(|j| {
                filter
                    .requester_id
                    .as_ref()
                    .map_or(true, |r| &j.requester_id == r)
            })
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let total = matching.len() as i64;
        let page = matching
            .into_iter()
            .skip(filter.offset as usize)
            .take(filter.limit as usize)
            .collect();
        Ok((page, total))
    }
}

#[derive(Default)]
pub struct InMemoryStageRepository {
    records: Mutex<HashMap<(JobId, Stage), StageRecord>>,
}

impl InMemoryStageRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StageRepository for InMemoryStageRepository {
    async fn upsert(&self, record: &StageRecord) -> Result<()> {
        self.records
            .lock()
            .unwrap()
            .insert((record.job_id, record.stage), record.clone());
        Ok(())
    }

    async fn find(&self, job_id: &JobId, stage: Stage) -> Result<Option<StageRecord>> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .get(&(*job_id, stage))
            .cloned())
    }

    async fn find_by_job(&self, job_id: &JobId) -> Result<Vec<StageRecord>> {
        let records = self.records.lock().unwrap();
        let mut found: Vec<StageRecord> = records
            .values()
            .filter(|r| &r.job_id == job_id)
            .cloned()
            .collect();
        found.sort_by_key(|r| r.order);
        Ok(found)
    }
}

#[derive(Default)]
pub struct InMemoryEventRepository {
    events: Mutex<Vec<JobEvent>>,
}

impl InMemoryEventRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every event appended so far, oldest first.
    pub fn all(&self) -> Vec<JobEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventRepository for InMemoryEventRepository {
    async fn append(&self, event: &JobEvent) -> Result<()> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }

    async fn recent_for_job(&self, job_id: &JobId, limit: i64) -> Result<Vec<JobEvent>> {
        let events = self.events.lock().unwrap();
        Ok(events
            .iter()
            .rev()
            .filter(|e| &e.job_id == job_id)
            .take(limit as usize)
            .cloned()
            .collect())
    }
}
