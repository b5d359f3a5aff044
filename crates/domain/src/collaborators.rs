//! Ports for the external AI collaborators.
//!
//! Every collaborator is a slow, fallible, opaque remote call. The executor
//! only sees these traits and the three-way error taxonomy below; transport
//! details (HTTP, auth, payload shapes) live in the infrastructure layer.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Failure taxonomy for collaborator calls.
///
/// The split between `Transient` and `Permanent` drives the retry decision;
/// `NeedsClarification` is not a failure at all, it settles the job as a
/// success with a distinct status.
#[derive(Debug, thiserror::Error)]
pub enum CollaboratorError {
    /// Timeout, rate limit, network fault. Retried with backoff up to the
    /// stage retry bound.
    #[error("Transient collaborator error: {0}")]
    Transient(String),

    /// The collaborator rejected the request in a way redelivery cannot fix.
    #[error("Permanent collaborator error: {0}")]
    Permanent(String),

    /// The upstream model asked for clarification instead of producing
    /// output. Carries the questions to persist on the job.
    #[error("Clarification requested")]
    NeedsClarification { questions: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicExtraction {
    pub topic: String,
    pub confidence: f64,
}

/// Topic/intent extraction over the raw request text.
#[async_trait]
pub trait TopicExtractor: Send + Sync {
    async fn extract(
        &self,
        text: &str,
        context: &serde_json::Value,
    ) -> Result<TopicExtraction, CollaboratorError>;
}

/// Retrieval of ranked context snippets for a topic.
#[async_trait]
pub trait ContextRetriever: Send + Sync {
    async fn retrieve(&self, topic: &str) -> Result<Vec<String>, CollaboratorError>;
}

/// Retrieval-augmented script generation.
#[async_trait]
pub trait ScriptGenerator: Send + Sync {
    async fn generate(
        &self,
        topic: &str,
        snippets: &[String],
        context: &serde_json::Value,
    ) -> Result<String, CollaboratorError>;
}

/// State of a submitted media synthesis request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum MediaPoll {
    Pending,
    Done { artifact_url: String },
    Error { message: String },
}

/// Asynchronous media synthesis: submit once, poll until done.
///
/// Submission is the paid side effect; the handle is persisted on the job so
/// a retried stage resumes polling instead of submitting again.
#[async_trait]
pub trait MediaSynthesizer: Send + Sync {
    async fn submit(&self, script: &str) -> Result<String, CollaboratorError>;

    async fn poll(&self, handle: &str) -> Result<MediaPoll, CollaboratorError>;
}

/// Fire-and-forget completion notification to the requester.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, requester_id: &str, summary: &str) -> Result<(), CollaboratorError>;
}
