use async_trait::async_trait;
use scriba_domain::repository::{CreateOutcome, JobFilter, JobRepository};
use scriba_domain::{DomainError, Job, JobId, Result};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;

/// Job store backed by the `jobs` table.
///
/// Every update is conditioned on the stored `version`: the rare concurrent
/// duplicate delivery loses the race, gets a `VersionConflict` and re-enters
/// through the idempotency guard on redelivery. No distributed lock.
#[derive(Clone)]
pub struct PostgresJobRepository {
    pool: PgPool,
}

impl PostgresJobRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn map_row_to_job(row: PgRow) -> Result<Job> {
    let id: uuid::Uuid = row.get("id");
    let status_str: String = row.get("status");
    let current_stage_str: Option<String> = row.get("current_stage");
    let context_fields: serde_json::Value = row.get("context_fields");
    let modalities_json: serde_json::Value = row.get("requested_modalities");
    let output_json: serde_json::Value = row.get("output");
    let error_detail_json: Option<serde_json::Value> = row.get("error_detail");
    let retry_count: i32 = row.get("retry_count");

    let status = status_str
        .parse()
        .map_err(|e: String| DomainError::store(e))?;
    let current_stage = current_stage_str
        .map(|s| s.parse().map_err(|e: String| DomainError::store(e)))
        .transpose()?;
    let requested_modalities = serde_json::from_value(modalities_json)
        .map_err(|e| DomainError::store(format!("Failed to deserialize modalities: {}", e)))?;
    let output = serde_json::from_value(output_json)
        .map_err(|e| DomainError::store(format!("Failed to deserialize job output: {}", e)))?;
    let error_detail = error_detail_json
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| DomainError::store(format!("Failed to deserialize error detail: {}", e)))?;

    Ok(Job {
        id: JobId::from_uuid(id),
        correlation_id: row.get("correlation_id"),
        requester_id: row.get("requester_id"),
        request_text: row.get("request_text"),
        context_fields,
        requested_modalities,
        status,
        current_stage,
        created_at: row.get("created_at"),
        started_at: row.get("started_at"),
        completed_at: row.get("completed_at"),
        output,
        error_detail,
        retry_count: retry_count as u32,
        version: row.get("version"),
    })
}

#[async_trait]
impl JobRepository for PostgresJobRepository {
    async fn create(&self, job: &Job) -> Result<CreateOutcome> {
        let modalities = serde_json::to_value(&job.requested_modalities)
            .map_err(|e| DomainError::store(format!("Failed to serialize modalities: {}", e)))?;
        let output = serde_json::to_value(&job.output)
            .map_err(|e| DomainError::store(format!("Failed to serialize output: {}", e)))?;
        let error_detail = job
            .error_detail
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| DomainError::store(format!("Failed to serialize error detail: {}", e)))?;

        let result = sqlx::query(
            r#"
            INSERT INTO jobs (
                id, correlation_id, requester_id, request_text, context_fields,
                requested_modalities, status, current_stage, created_at,
                started_at, completed_at, output, error_detail, retry_count, version
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(job.id.0)
        .bind(&job.correlation_id)
        .bind(&job.requester_id)
        .bind(&job.request_text)
        .bind(&job.context_fields)
        .bind(&modalities)
        .bind(job.status.to_string())
        .bind(job.current_stage.map(|s| s.to_string()))
        .bind(job.created_at)
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(&output)
        .bind(&error_detail)
        .bind(job.retry_count as i32)
        .bind(job.version)
        .execute(&self.pool)
        .await
        .map_err(|e| DomainError::store(format!("Failed to insert job: {}", e)))?;

        if result.rows_affected() == 1 {
            Ok(CreateOutcome::Created)
        } else {
            Ok(CreateOutcome::AlreadyExists)
        }
    }

    async fn find_by_id(&self, job_id: &JobId) -> Result<Option<Job>> {
        let row = sqlx::query("SELECT * FROM jobs WHERE id = $1")
            .bind(job_id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| DomainError::store(format!("Failed to fetch job: {}", e)))?;

        row.map(map_row_to_job).transpose()
    }

    async fn update(&self, job: &mut Job) -> Result<()> {
        let output = serde_json::to_value(&job.output)
            .map_err(|e| DomainError::store(format!("Failed to serialize output: {}", e)))?;
        let error_detail = job
            .error_detail
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| DomainError::store(format!("Failed to serialize error detail: {}", e)))?;

        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = $1, current_stage = $2, started_at = $3, completed_at = $4,
                output = $5, error_detail = $6, retry_count = $7, version = version + 1
            WHERE id = $8 AND version = $9
            "#,
        )
        .bind(job.status.to_string())
        .bind(job.current_stage.map(|s| s.to_string()))
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(&output)
        .bind(&error_detail)
        .bind(job.retry_count as i32)
        .bind(job.id.0)
        .bind(job.version)
        .execute(&self.pool)
        .await
        .map_err(|e| DomainError::store(format!("Failed to update job: {}", e)))?;

        if result.rows_affected() == 0 {
            let exists = sqlx::query("SELECT 1 FROM jobs WHERE id = $1")
                .bind(job.id.0)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| DomainError::store(format!("Failed to re-check job: {}", e)))?
                .is_some();
            return Err(if exists {
                DomainError::VersionConflict {
                    job_id: job.id,
                    expected: job.version,
                }
            } else {
                DomainError::JobNotFound { job_id: job.id }
            });
        }

        job.version += 1;
        Ok(())
    }

    async fn list(&self, filter: &JobFilter) -> Result<(Vec<Job>, i64)> {
        let status = filter.status.map(|s| s.to_string());

        let rows = sqlx::query(
            r#"
            SELECT * FROM jobs
            WHERE ($1::text IS NULL OR status = $1)
              AND ($2::text IS NULL OR requester_id = $2)
            ORDER BY created_at DESC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(&status)
        .bind(&filter.requester_id)
        .bind(filter.limit)
        .bind(filter.offset)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DomainError::store(format!("Failed to list jobs: {}", e)))?;

        let total: i64 = sqlx::query(
            r#"
            SELECT COUNT(*) AS count FROM jobs
            WHERE ($1::text IS NULL OR status = $1)
              AND ($2::text IS NULL OR requester_id = $2)
            "#,
        )
        .bind(&status)
        .bind(&filter.requester_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| DomainError::store(format!("Failed to count jobs: {}", e)))?
        .get("count");

        let jobs = rows
            .into_iter()
            .map(map_row_to_job)
            .collect::<Result<Vec<_>>>()?;

        Ok((jobs, total))
    }
}
