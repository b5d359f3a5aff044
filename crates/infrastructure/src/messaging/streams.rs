//! JetStream topology bootstrap.
//!
//! Stream creation is idempotent; every instance runs it at startup so the
//! first one up wins and the rest are no-ops.

use async_nats::jetstream::stream::{Config as StreamConfig, StorageType};
use async_nats::jetstream::Context;
use scriba_shared::config::NatsConfig;
use std::time::Duration;
use tracing::info;

const DLQ_RETENTION_DAYS: u64 = 7;

pub async fn ensure_streams(jetstream: &Context, config: &NatsConfig) -> anyhow::Result<()> {
    jetstream
        .get_or_create_stream(StreamConfig {
            name: config.stream.clone(),
            subjects: vec![config.start_subject.clone()],
            storage: StorageType::File,
            num_replicas: 1,
            ..Default::default()
        })
        .await
        .map_err(|e| anyhow::anyhow!("Failed to ensure stream {}: {}", config.stream, e))?;
    info!(stream = %config.stream, subject = %config.start_subject, "job stream ready");

    jetstream
        .get_or_create_stream(StreamConfig {
            name: config.dlq_stream.clone(),
            subjects: vec![config.dlq_subject.clone()],
            storage: StorageType::File,
            max_age: Duration::from_secs(60 * 60 * 24 * DLQ_RETENTION_DAYS),
            num_replicas: 1,
            ..Default::default()
        })
        .await
        .map_err(|e| anyhow::anyhow!("Failed to ensure stream {}: {}", config.dlq_stream, e))?;
    info!(stream = %config.dlq_stream, "dead-letter stream ready");

    Ok(())
}
