use async_trait::async_trait;
use scriba_domain::repository::EventRepository;
use scriba_domain::{DomainError, JobEvent, JobId, Result};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;

/// Append-only audit log backed by the `job_events` table.
#[derive(Clone)]
pub struct PostgresEventRepository {
    pool: PgPool,
}

impl PostgresEventRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn map_row_to_event(row: PgRow) -> Result<JobEvent> {
    let job_id: uuid::Uuid = row.get("job_id");
    let kind_str: String = row.get("kind");
    let status_str: String = row.get("status");
    let stage_str: Option<String> = row.get("stage");

    Ok(JobEvent {
        job_id: JobId::from_uuid(job_id),
        kind: kind_str.parse().map_err(|e: String| DomainError::store(e))?,
        status: status_str
            .parse()
            .map_err(|e: String| DomainError::store(e))?,
        stage: stage_str
            .map(|s| s.parse().map_err(|e: String| DomainError::store(e)))
            .transpose()?,
        message: row.get("message"),
        occurred_at: row.get("occurred_at"),
    })
}

#[async_trait]
impl EventRepository for PostgresEventRepository {
    async fn append(&self, event: &JobEvent) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO job_events (job_id, kind, status, stage, message, occurred_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(event.job_id.0)
        .bind(event.kind.to_string())
        .bind(event.status.to_string())
        .bind(event.stage.map(|s| s.to_string()))
        .bind(&event.message)
        .bind(event.occurred_at)
        .execute(&self.pool)
        .await
        .map_err(|e| DomainError::store(format!("Failed to append event: {}", e)))?;

        Ok(())
    }

    async fn recent_for_job(&self, job_id: &JobId, limit: i64) -> Result<Vec<JobEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM job_events
            WHERE job_id = $1
            ORDER BY occurred_at DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(job_id.0)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DomainError::store(format!("Failed to fetch events: {}", e)))?;

        rows.into_iter().map(map_row_to_event).collect()
    }
}
