//! Infrastructure layer: PostgreSQL persistence, NATS JetStream messaging
//! (consumer runtime, stream topology, status fan-out) and the HTTP clients
//! for the external AI collaborators.

pub mod collaborators;
pub mod messaging;
pub mod persistence;
