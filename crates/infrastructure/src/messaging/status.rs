//! Status fan-out over core NATS.

use async_trait::async_trait;
use scriba_application::StatusPublisher;
use scriba_domain::StatusUpdate;
use scriba_shared::event_topics;
use tracing::warn;

/// Publishes per-job status updates to `scriba.jobs.status.<job_id>`.
///
/// Core NATS, not JetStream: updates are a latency convenience and observers
/// re-fetch job state on (re)connect, so a dropped update costs nothing.
#[derive(Clone)]
pub struct NatsStatusPublisher {
    client: async_nats::Client,
}

impl NatsStatusPublisher {
    pub fn new(client: async_nats::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl StatusPublisher for NatsStatusPublisher {
    async fn publish(&self, update: &StatusUpdate) {
        let subject = event_topics::status_subject(&update.job_id.to_string());
        let payload = match serde_json::to_vec(update) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(job_id = %update.job_id, error = %e, "failed to serialize status update");
                return;
            }
        };
        if let Err(e) = self.client.publish(subject, payload.into()).await {
            warn!(job_id = %update.job_id, error = %e, "failed to publish status update");
        }
    }
}
