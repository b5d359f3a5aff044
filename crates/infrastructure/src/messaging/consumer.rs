//! JetStream pull consumer for job-start messages.
//!
//! Delivery contract: the message is acked only after the job settles
//! (completed, failed, or needs_clarification) or is classified as a
//! duplicate or malformed. Transient store errors leave the message
//! unacked (Nak) so the channel redelivers it; the idempotency guard makes
//! redelivery safe. A message that keeps failing is copied to the
//! dead-letter stream on its final permitted delivery and acked, so it can
//! never wedge the work queue.

use async_nats::jetstream::consumer::pull::Config as PullConfig;
use async_nats::jetstream::consumer::{AckPolicy, PullConsumer};
use async_nats::jetstream::{AckKind, Context};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use futures::StreamExt;
use scriba_application::{
    validate_message, Disposition, IdempotencyGuard, PipelineOutcome, StageExecutor,
};
use scriba_domain::repository::EventRepository;
use scriba_domain::{DomainError, JobEvent, JobEventKind};
use scriba_shared::config::{ConsumerTuning, NatsConfig};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// What to do with a delivery once handling has finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageAction {
    /// Settled or permanently unprocessable: consume the message.
    Ack,
    /// Transient trouble: leave it for redelivery.
    Retry,
}

/// Envelope written to the dead-letter subject.
#[derive(Debug, Serialize)]
struct DlqEntry<'a> {
    original_subject: &'a str,
    delivered: i64,
    reason: &'a str,
    quarantined_at: chrono::DateTime<Utc>,
    payload: serde_json::Value,
}

/// Raw fallback for payloads that are not valid JSON.
#[derive(Debug, Serialize)]
struct RawDlqEntry<'a> {
    original_subject: &'a str,
    delivered: i64,
    reason: &'a str,
    quarantined_at: chrono::DateTime<Utc>,
    payload_base64: String,
}

#[derive(Debug, Default)]
pub struct ConsumerMetrics {
    received: AtomicU64,
    completed: AtomicU64,
    clarified: AtomicU64,
    failed: AtomicU64,
    duplicates: AtomicU64,
    validation_failures: AtomicU64,
    retried: AtomicU64,
    quarantined: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub received: u64,
    pub completed: u64,
    pub clarified: u64,
    pub failed: u64,
    pub duplicates: u64,
    pub validation_failures: u64,
    pub retried: u64,
    pub quarantined: u64,
}

impl ConsumerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            clarified: self.clarified.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            validation_failures: self.validation_failures.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            quarantined: self.quarantined.load(Ordering::Relaxed),
        }
    }

    fn bump(&self, counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

pub struct JobConsumer {
    jetstream: Context,
    nats: NatsConfig,
    tuning: ConsumerTuning,
    guard: IdempotencyGuard,
    executor: Arc<StageExecutor>,
    events: Arc<dyn EventRepository>,
    metrics: Arc<ConsumerMetrics>,
}

impl JobConsumer {
    pub fn new(
        jetstream: Context,
        nats: NatsConfig,
        tuning: ConsumerTuning,
        guard: IdempotencyGuard,
        executor: Arc<StageExecutor>,
        events: Arc<dyn EventRepository>,
        metrics: Arc<ConsumerMetrics>,
    ) -> Self {
        Self {
            jetstream,
            nats,
            tuning,
            guard,
            executor,
            events,
            metrics,
        }
    }

    /// Consume job-start messages until the stream closes.
    pub async fn run(&self) -> anyhow::Result<()> {
        let stream = self
            .jetstream
            .get_stream(&self.nats.stream)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to get stream {}: {}", self.nats.stream, e))?;

        let consumer: PullConsumer = stream
            .get_or_create_consumer(
                &self.nats.durable_name,
                PullConfig {
                    durable_name: Some(self.nats.durable_name.clone()),
                    filter_subject: self.nats.start_subject.clone(),
                    ack_policy: AckPolicy::Explicit,
                    ack_wait: Duration::from_secs(self.nats.ack_wait_secs),
                    max_deliver: self.nats.max_deliver,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| {
                anyhow::anyhow!("Failed to create consumer {}: {}", self.nats.durable_name, e)
            })?;

        let mut messages = consumer
            .messages()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to subscribe: {}", e))?;

        info!(
            durable = %self.nats.durable_name,
            subject = %self.nats.start_subject,
            "job consumer started"
        );

        while let Some(msg_result) = messages.next().await {
            let msg = match msg_result {
                Ok(msg) => msg,
                Err(e) => {
                    warn!(error = %e, "error receiving message");
                    continue;
                }
            };

            let delivered = match msg.info() {
                Ok(info) => info.delivered,
                Err(e) => {
                    warn!(error = %e, "message without delivery info");
                    1
                }
            };

            self.metrics.bump(&self.metrics.received);
            if delivered > self.nats.poison_warn_threshold && delivered < self.nats.max_deliver {
                warn!(
                    delivered,
                    max_deliver = self.nats.max_deliver,
                    "possible poison message, repeated redelivery"
                );
            }

            let budget = Duration::from_secs(self.tuning.message_budget_secs);
            let action =
                match tokio::time::timeout(budget, self.handle_payload(&msg.payload)).await {
                    Ok(action) => action,
                    Err(_) => {
                        warn!(
                            budget_secs = self.tuning.message_budget_secs,
                            "message processing exceeded budget"
                        );
                        MessageAction::Retry
                    }
                };

            match action {
                MessageAction::Ack => {
                    if let Err(e) = msg.ack().await {
                        warn!(error = %e, "failed to ack message");
                    }
                }
                MessageAction::Retry if delivered >= self.nats.max_deliver => {
                    // Last permitted delivery. Copy to the dead-letter stream
                    // and ack so the queue keeps moving; ack only after the
                    // copy is confirmed so the payload cannot be lost.
                    match self.quarantine(&msg.payload, delivered).await {
                        Ok(()) => {
                            self.metrics.bump(&self.metrics.quarantined);
                            if let Err(e) = msg.ack().await {
                                warn!(error = %e, "failed to ack quarantined message");
                            }
                        }
                        Err(e) => {
                            error!(error = %e, "failed to quarantine message, nacking for redelivery");
                            if let Err(e) = msg.ack_with(AckKind::Nak(None)).await {
                                warn!(error = %e, "failed to nak message");
                            }
                        }
                    }
                }
                MessageAction::Retry => {
                    self.metrics.bump(&self.metrics.retried);
                    if let Err(e) = msg.ack_with(AckKind::Nak(None)).await {
                        warn!(error = %e, "failed to nak message");
                    }
                }
            }
        }

        Ok(())
    }

    async fn handle_payload(&self, payload: &[u8]) -> MessageAction {
        let cmd = match validate_message(payload) {
            Ok(cmd) => cmd,
            Err(e) => {
                // Malformed payloads never become processable; redelivering
                // them would only burn attempts.
                warn!(error = %e, "rejecting malformed job-start message");
                self.metrics.bump(&self.metrics.validation_failures);
                return MessageAction::Ack;
            }
        };

        let job = match self.guard.classify(&cmd).await {
            Ok(Disposition::Fresh(job)) => {
                info!(job_id = %job.id, "accepted new job");
                let received = JobEvent::now(&job, JobEventKind::JobReceived, None);
                if let Err(e) = self.events.append(&received).await {
                    warn!(job_id = %job.id, error = %e, "failed to append received event");
                }
                job
            }
            Ok(Disposition::Resume(job)) => {
                info!(job_id = %job.id, stage = ?job.current_stage, "resuming unfinished job");
                job
            }
            Ok(Disposition::DuplicateOfTerminal(status)) => {
                debug!(job_id = %cmd.job_id, %status, "duplicate delivery of settled job");
                self.metrics.bump(&self.metrics.duplicates);
                let event = JobEvent {
                    job_id: cmd.job_id,
                    kind: JobEventKind::DuplicateDelivery,
                    status,
                    stage: None,
                    message: None,
                    occurred_at: Utc::now(),
                };
                if let Err(e) = self.events.append(&event).await {
                    warn!(job_id = %cmd.job_id, error = %e, "failed to append duplicate event");
                }
                return MessageAction::Ack;
            }
            Err(e) => {
                error!(job_id = %cmd.job_id, error = %e, "idempotency classification failed");
                return MessageAction::Retry;
            }
        };

        match self.executor.run(job).await {
            Ok(PipelineOutcome::Completed) => {
                self.metrics.bump(&self.metrics.completed);
                MessageAction::Ack
            }
            Ok(PipelineOutcome::NeedsClarification) => {
                self.metrics.bump(&self.metrics.clarified);
                MessageAction::Ack
            }
            Ok(PipelineOutcome::Failed) => {
                self.metrics.bump(&self.metrics.failed);
                MessageAction::Ack
            }
            Err(DomainError::VersionConflict { job_id, .. }) => {
                // A concurrent delivery of the same job won the race. Leave
                // this one for redelivery; the guard re-classifies it then.
                debug!(%job_id, "lost update race, deferring to redelivery");
                MessageAction::Retry
            }
            Err(e) => {
                error!(error = %e, "pipeline aborted on store error");
                MessageAction::Retry
            }
        }
    }

    async fn quarantine(&self, payload: &[u8], delivered: i64) -> anyhow::Result<()> {
        let quarantined_at = Utc::now();
        let reason = "exhausted delivery attempts";

        let bytes = match serde_json::from_slice::<serde_json::Value>(payload) {
            Ok(raw) => serde_json::to_vec(&DlqEntry {
                original_subject: &self.nats.start_subject,
                delivered,
                reason,
                quarantined_at,
                payload: raw,
            })?,
            Err(_) => serde_json::to_vec(&RawDlqEntry {
                original_subject: &self.nats.start_subject,
                delivered,
                reason,
                quarantined_at,
                payload_base64: BASE64.encode(payload),
            })?,
        };

        self.jetstream
            .publish(self.nats.dlq_subject.clone(), bytes.into())
            .await
            .map_err(|e| anyhow::anyhow!("Failed to publish to DLQ: {}", e))?
            .await
            .map_err(|e| anyhow::anyhow!("DLQ publish unconfirmed: {}", e))?;

        warn!(
            subject = %self.nats.dlq_subject,
            delivered,
            "quarantined message to dead-letter stream"
        );
        Ok(())
    }
}
