//! Read side of the job store: get-by-id with full history, and paginated,
//! filterable listings. Shapes here are what the HTTP layer serializes.

use chrono::{DateTime, Utc};
use scriba_domain::events::JobEvent;
use scriba_domain::repository::{EventRepository, JobFilter, JobRepository, StageRepository};
use scriba_domain::stage_record::StageRecord;
use scriba_domain::{DomainError, Job, JobId, JobStatus, Stage};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const DEFAULT_PER_PAGE: u32 = 20;
const MAX_PER_PAGE: u32 = 100;
const RECENT_EVENTS_LIMIT: i64 = 50;

/// Compact row for listings.
#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub id: JobId,
    pub requester_id: String,
    pub status: JobStatus,
    pub current_stage: Option<Stage>,
    pub progress_percentage: u8,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&Job> for JobSummary {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id,
            requester_id: job.requester_id.clone(),
            status: job.status,
            current_stage: job.current_stage,
            progress_percentage: job.progress_percentage(),
            created_at: job.created_at,
            completed_at: job.completed_at,
        }
    }
}

/// Full job view: aggregate, stage records, recent audit events.
#[derive(Debug, Clone, Serialize)]
pub struct JobDetail {
    #[serde(flatten)]
    pub job: Job,
    pub progress_percentage: u8,
    pub stages: Vec<StageRecord>,
    pub recent_events: Vec<JobEvent>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ListParams {
    pub status: Option<JobStatus>,
    pub requester_id: Option<String>,
    /// 1-based.
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: u32,
    pub per_page: u32,
}

pub struct JobQueryService {
    jobs: Arc<dyn JobRepository>,
    stages: Arc<dyn StageRepository>,
    events: Arc<dyn EventRepository>,
}

impl JobQueryService {
    pub fn new(
        jobs: Arc<dyn JobRepository>,
        stages: Arc<dyn StageRepository>,
        events: Arc<dyn EventRepository>,
    ) -> Self {
        Self {
            jobs,
            stages,
            events,
        }
    }

    pub async fn get(&self, job_id: &JobId) -> Result<Option<JobDetail>, DomainError> {
        let Some(job) = self.jobs.find_by_id(job_id).await? else {
            return Ok(None);
        };
        let stages = self.stages.find_by_job(job_id).await?;
        let recent_events = self
            .events
            .recent_for_job(job_id, RECENT_EVENTS_LIMIT)
            .await?;
        let progress_percentage = job.progress_percentage();
        Ok(Some(JobDetail {
            job,
            progress_percentage,
            stages,
            recent_events,
        }))
    }

    pub async fn list(&self, params: &ListParams) -> Result<Page<JobSummary>, DomainError> {
        let page = params.page.unwrap_or(1).max(1);
        let per_page = params
            .per_page
            .unwrap_or(DEFAULT_PER_PAGE)
            .clamp(1, MAX_PER_PAGE);

        let filter = JobFilter {
            status: params.status,
            requester_id: params.requester_id.clone(),
            limit: per_page as i64,
            offset: ((page - 1) * per_page) as i64,
        };
        let (jobs, total) = self.jobs.list(&filter).await?;

        Ok(Page {
            items: jobs.iter().map(JobSummary::from).collect(),
            total,
            page,
            per_page,
        })
    }
}
