//! PostgreSQL persistence: the job store, stage records and the append-only
//! event log.
//!
//! Writes to `jobs` are guarded by a `version` column; see
//! [`job_repository::PostgresJobRepository`].

mod event_repository;
mod job_repository;
mod stage_repository;

pub use event_repository::PostgresEventRepository;
pub use job_repository::PostgresJobRepository;
pub use stage_repository::PostgresStageRepository;

use scriba_domain::{DomainError, Result};
use scriba_shared::config::DatabaseConfig;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

pub async fn connect(config: &DatabaseConfig) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(config.pool_size)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
        .connect(&config.url)
        .await
        .map_err(|e| DomainError::store(format!("Failed to connect to database: {}", e)))
}

pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS jobs (
            id UUID PRIMARY KEY,
            correlation_id TEXT,
            requester_id TEXT NOT NULL,
            request_text TEXT NOT NULL,
            context_fields JSONB NOT NULL,
            requested_modalities JSONB NOT NULL,
            status TEXT NOT NULL,
            current_stage TEXT,
            created_at TIMESTAMPTZ NOT NULL,
            started_at TIMESTAMPTZ,
            completed_at TIMESTAMPTZ,
            output JSONB NOT NULL,
            error_detail JSONB,
            retry_count INT NOT NULL DEFAULT 0,
            version BIGINT NOT NULL DEFAULT 0
        );
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| DomainError::store(format!("Failed to create jobs table: {}", e)))?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);")
        .execute(pool)
        .await
        .map_err(|e| DomainError::store(format!("Failed to create jobs status index: {}", e)))?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_requester ON jobs(requester_id);")
        .execute(pool)
        .await
        .map_err(|e| DomainError::store(format!("Failed to create jobs requester index: {}", e)))?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS job_stages (
            id BIGSERIAL PRIMARY KEY,
            job_id UUID NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
            stage TEXT NOT NULL,
            stage_order INT NOT NULL,
            status TEXT NOT NULL,
            started_at TIMESTAMPTZ,
            finished_at TIMESTAMPTZ,
            duration_ms BIGINT,
            output_snapshot JSONB,
            error_message TEXT,
            attempt_count INT NOT NULL DEFAULT 0,
            UNIQUE (job_id, stage)
        );
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| DomainError::store(format!("Failed to create job_stages table: {}", e)))?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS job_events (
            id BIGSERIAL PRIMARY KEY,
            job_id UUID NOT NULL,
            kind TEXT NOT NULL,
            status TEXT NOT NULL,
            stage TEXT,
            message TEXT,
            occurred_at TIMESTAMPTZ NOT NULL
        );
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| DomainError::store(format!("Failed to create job_events table: {}", e)))?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_job_events_job ON job_events(job_id, occurred_at DESC);",
    )
    .execute(pool)
    .await
    .map_err(|e| DomainError::store(format!("Failed to create job_events index: {}", e)))?;

    Ok(())
}
