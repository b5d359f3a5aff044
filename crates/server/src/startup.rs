//! Startup sequence: storage, streams, collaborator clients, consumer loop
//! and the HTTP query API.

use crate::api;
use crate::state::AppState;
use scriba_application::backoff::BackoffConfig;
use scriba_application::queries::JobQueryService;
use scriba_application::{ExecutorConfig, IdempotencyGuard, StageExecutor};
use scriba_domain::repository::{EventRepository, JobRepository, StageRepository};
use scriba_infrastructure::collaborators::HttpCollaborators;
use scriba_infrastructure::messaging::{
    ensure_streams, ConsumerMetrics, JobConsumer, NatsStatusPublisher,
};
use scriba_infrastructure::persistence::postgres::{
    self, PostgresEventRepository, PostgresJobRepository, PostgresStageRepository,
};
use scriba_shared::config::ServerConfig;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

pub async fn run(config: ServerConfig) -> anyhow::Result<()> {
    info!(version = env!("CARGO_PKG_VERSION"), "starting scriba server");

    let pool = postgres::connect(&config.database).await?;
    postgres::run_migrations(&pool).await?;
    info!("database ready");

    let client = async_nats::connect(&config.nats.url).await?;
    let jetstream = async_nats::jetstream::new(client.clone());
    ensure_streams(&jetstream, &config.nats).await?;

    let jobs: Arc<dyn JobRepository> = Arc::new(PostgresJobRepository::new(pool.clone()));
    let stages: Arc<dyn StageRepository> = Arc::new(PostgresStageRepository::new(pool.clone()));
    let events: Arc<dyn EventRepository> = Arc::new(PostgresEventRepository::new(pool.clone()));

    let collaborators = HttpCollaborators::build(&config.collaborators)?;
    let publisher = Arc::new(NatsStatusPublisher::new(client));

    let executor_config = ExecutorConfig {
        backoff: BackoffConfig {
            base_delay_ms: config.consumer.retry_base_delay_ms,
            max_retries: config.consumer.max_stage_retries,
            ..BackoffConfig::default()
        },
        ..ExecutorConfig::default()
    };
    let executor = Arc::new(StageExecutor::new(
        jobs.clone(),
        stages.clone(),
        events.clone(),
        publisher,
        collaborators,
        executor_config,
    ));
    let guard = IdempotencyGuard::new(jobs.clone());
    let metrics = Arc::new(ConsumerMetrics::new());

    let consumer = JobConsumer::new(
        jetstream,
        config.nats.clone(),
        config.consumer.clone(),
        guard,
        executor,
        events.clone(),
        metrics.clone(),
    );
    let consumer_handle = tokio::spawn(async move {
        if let Err(e) = consumer.run().await {
            error!(error = %e, "job consumer stopped");
        }
    });

    let state = AppState {
        queries: Arc::new(JobQueryService::new(jobs, stages, events)),
        metrics,
    };
    let app = api::router(state);
    let listener = tokio::net::TcpListener::bind(config.http.bind_address).await?;
    info!(addr = %config.http.bind_address, "query api listening");

    tokio::select! {
        result = axum::serve(listener, app) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    // Anything cut off mid-message is left unacked, redelivered, and
    // absorbed by the idempotency guard.
    consumer_handle.abort();
    let _ = tokio::time::timeout(Duration::from_secs(5), consumer_handle).await;
    info!("scriba server stopped");
    Ok(())
}
