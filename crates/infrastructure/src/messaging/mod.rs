pub mod consumer;
pub mod status;
pub mod streams;

pub use consumer::{ConsumerMetrics, JobConsumer, MetricsSnapshot};
pub use status::NatsStatusPublisher;
pub use streams::ensure_streams;
