use async_trait::async_trait;
use scriba_domain::repository::StageRepository;
use scriba_domain::{DomainError, JobId, Result, Stage, StageRecord};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;

/// Stage history store backed by the `job_stages` table.
///
/// One row per (job, stage); re-runs of the same stage update the row in
/// place, with `attempt_count` preserving how many times it was tried.
#[derive(Clone)]
pub struct PostgresStageRepository {
    pool: PgPool,
}

impl PostgresStageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn map_row_to_record(row: PgRow) -> Result<StageRecord> {
    let job_id: uuid::Uuid = row.get("job_id");
    let stage_str: String = row.get("stage");
    let status_str: String = row.get("status");
    let order: i32 = row.get("stage_order");
    let attempt_count: i32 = row.get("attempt_count");

    Ok(StageRecord {
        job_id: JobId::from_uuid(job_id),
        stage: stage_str
            .parse()
            .map_err(|e: String| DomainError::store(e))?,
        order: order as u8,
        status: status_str
            .parse()
            .map_err(|e: String| DomainError::store(e))?,
        started_at: row.get("started_at"),
        finished_at: row.get("finished_at"),
        duration_ms: row.get("duration_ms"),
        output_snapshot: row.get("output_snapshot"),
        error_message: row.get("error_message"),
        attempt_count: attempt_count as u32,
    })
}

#[async_trait]
impl StageRepository for PostgresStageRepository {
    async fn upsert(&self, record: &StageRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO job_stages (
                job_id, stage, stage_order, status, started_at, finished_at,
                duration_ms, output_snapshot, error_message, attempt_count
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (job_id, stage) DO UPDATE SET
                status = EXCLUDED.status,
                started_at = EXCLUDED.started_at,
                finished_at = EXCLUDED.finished_at,
                duration_ms = EXCLUDED.duration_ms,
                output_snapshot = EXCLUDED.output_snapshot,
                error_message = EXCLUDED.error_message,
                attempt_count = EXCLUDED.attempt_count
            "#,
        )
        .bind(record.job_id.0)
        .bind(record.stage.to_string())
        .bind(record.order as i32)
        .bind(record.status.to_string())
        .bind(record.started_at)
        .bind(record.finished_at)
        .bind(record.duration_ms)
        .bind(&record.output_snapshot)
        .bind(&record.error_message)
        .bind(record.attempt_count as i32)
        .execute(&self.pool)
        .await
        .map_err(|e| DomainError::store(format!("Failed to upsert stage record: {}", e)))?;

        Ok(())
    }

    async fn find(&self, job_id: &JobId, stage: Stage) -> Result<Option<StageRecord>> {
        let row = sqlx::query("SELECT * FROM job_stages WHERE job_id = $1 AND stage = $2")
            .bind(job_id.0)
            .bind(stage.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| DomainError::store(format!("Failed to fetch stage record: {}", e)))?;

        row.map(map_row_to_record).transpose()
    }

    async fn find_by_job(&self, job_id: &JobId) -> Result<Vec<StageRecord>> {
        let rows = sqlx::query("SELECT * FROM job_stages WHERE job_id = $1 ORDER BY stage_order")
            .bind(job_id.0)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| DomainError::store(format!("Failed to fetch stage records: {}", e)))?;

        rows.into_iter().map(map_row_to_record).collect()
    }
}
