//! Status fan-out port.

use async_trait::async_trait;
use scriba_domain::events::StatusUpdate;

/// Publishes status-changed events to whatever fan-out channel the
/// deployment wires in. Delivery is best-effort by contract: implementations
/// log failures and return, they never fail the pipeline.
#[async_trait]
pub trait StatusPublisher: Send + Sync {
    async fn publish(&self, update: &StatusUpdate);
}

/// Publisher that drops everything. Used in tests and single-process setups
/// without a dashboard.
#[derive(Debug, Default, Clone)]
pub struct NoopStatusPublisher;

#[async_trait]
impl StatusPublisher for NoopStatusPublisher {
    async fn publish(&self, _update: &StatusUpdate) {}
}
