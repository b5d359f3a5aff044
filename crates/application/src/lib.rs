//! Application layer: the use cases between the message channel and the
//! domain. Validation, idempotency classification, the stage executor and
//! the query service all live here, wired to the outside world through the
//! domain ports.

pub mod backoff;
pub mod executor;
pub mod idempotency;
pub mod publisher;
pub mod queries;
pub mod validator;

pub use backoff::BackoffConfig;
pub use executor::{Collaborators, ExecutorConfig, PipelineOutcome, StageExecutor};
pub use idempotency::{Disposition, IdempotencyGuard};
pub use publisher::StatusPublisher;
pub use validator::{validate_message, StartJobCommand, ValidationError};
