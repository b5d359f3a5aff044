//! HTTP clients for the external AI collaborators.
//!
//! Error mapping drives the executor's retry decision: connection faults,
//! timeouts, 429 and 5xx are transient; other 4xx are permanent. A response
//! body carrying `needs_clarification: true` is neither, it settles the job
//! with the carried questions.

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use scriba_application::Collaborators;
use scriba_domain::collaborators::{
    CollaboratorError, ContextRetriever, MediaPoll, MediaSynthesizer, Notifier, ScriptGenerator,
    TopicExtraction, TopicExtractor,
};
use scriba_shared::config::CollaboratorsConfig;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Shared clarification shape collaborators may answer with instead of
/// producing output.
#[derive(Debug, Deserialize)]
struct ClarificationBody {
    #[serde(default)]
    needs_clarification: bool,
    #[serde(default)]
    questions: Vec<String>,
}

fn map_transport_error(e: reqwest::Error) -> CollaboratorError {
    // Anything that never reached the collaborator, or timed out on the
    // way, is worth retrying.
    CollaboratorError::Transient(e.to_string())
}

/// Resolve a non-success response into the error taxonomy.
async fn map_error_response(resp: Response) -> CollaboratorError {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();

    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        return CollaboratorError::Transient(format!("HTTP {}: {}", status, body));
    }

    if let Ok(clarification) = serde_json::from_str::<ClarificationBody>(&body) {
        if clarification.needs_clarification {
            return CollaboratorError::NeedsClarification {
                questions: clarification.questions,
            };
        }
    }

    CollaboratorError::Permanent(format!("HTTP {}: {}", status, body))
}

async fn decode<T: serde::de::DeserializeOwned>(resp: Response) -> Result<T, CollaboratorError> {
    if !resp.status().is_success() {
        return Err(map_error_response(resp).await);
    }
    resp.json::<T>().await.map_err(|e| {
        CollaboratorError::Permanent(format!("Malformed collaborator response: {}", e))
    })
}

pub struct HttpCollaborators;

impl HttpCollaborators {
    /// Build the full collaborator set over one shared connection pool.
    pub fn build(config: &CollaboratorsConfig) -> anyhow::Result<Collaborators> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Collaborators {
            topic_extractor: Arc::new(HttpTopicExtractor {
                client: client.clone(),
                base_url: config.topic_extractor_url.clone(),
            }),
            context_retriever: Arc::new(HttpContextRetriever {
                client: client.clone(),
                base_url: config.context_retriever_url.clone(),
            }),
            script_generator: Arc::new(HttpScriptGenerator {
                client: client.clone(),
                base_url: config.script_generator_url.clone(),
            }),
            media_synthesizer: Arc::new(HttpMediaSynthesizer {
                client: client.clone(),
                base_url: config.media_synthesizer_url.clone(),
            }),
            notifier: Arc::new(HttpNotifier {
                client,
                base_url: config.notifier_url.clone(),
            }),
        })
    }
}

pub struct HttpTopicExtractor {
    client: Client,
    base_url: String,
}

#[derive(Serialize)]
struct ExtractRequest<'a> {
    text: &'a str,
    context: &'a serde_json::Value,
}

#[async_trait]
impl TopicExtractor for HttpTopicExtractor {
    async fn extract(
        &self,
        text: &str,
        context: &serde_json::Value,
    ) -> Result<TopicExtraction, CollaboratorError> {
        let resp = self
            .client
            .post(format!("{}/extract", self.base_url))
            .json(&ExtractRequest { text, context })
            .send()
            .await
            .map_err(map_transport_error)?;
        decode(resp).await
    }
}

pub struct HttpContextRetriever {
    client: Client,
    base_url: String,
}

#[derive(Serialize)]
struct RetrieveRequest<'a> {
    topic: &'a str,
}

#[derive(Deserialize)]
struct RetrieveResponse {
    snippets: Vec<String>,
}

#[async_trait]
impl ContextRetriever for HttpContextRetriever {
    async fn retrieve(&self, topic: &str) -> Result<Vec<String>, CollaboratorError> {
        let resp = self
            .client
            .post(format!("{}/retrieve", self.base_url))
            .json(&RetrieveRequest { topic })
            .send()
            .await
            .map_err(map_transport_error)?;
        let body: RetrieveResponse = decode(resp).await?;
        Ok(body.snippets)
    }
}

pub struct HttpScriptGenerator {
    client: Client,
    base_url: String,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    topic: &'a str,
    snippets: &'a [String],
    context: &'a serde_json::Value,
}

#[derive(Deserialize)]
struct GenerateResponse {
    script: Option<String>,
    #[serde(default)]
    needs_clarification: bool,
    #[serde(default)]
    questions: Vec<String>,
}

#[async_trait]
impl ScriptGenerator for HttpScriptGenerator {
    async fn generate(
        &self,
        topic: &str,
        snippets: &[String],
        context: &serde_json::Value,
    ) -> Result<String, CollaboratorError> {
        let resp = self
            .client
            .post(format!("{}/generate", self.base_url))
            .json(&GenerateRequest {
                topic,
                snippets,
                context,
            })
            .send()
            .await
            .map_err(map_transport_error)?;
        let body: GenerateResponse = decode(resp).await?;

        // The generator can decline with questions inside a 200 as well.
        if body.needs_clarification {
            return Err(CollaboratorError::NeedsClarification {
                questions: body.questions,
            });
        }
        body.script.ok_or_else(|| {
            CollaboratorError::Permanent("Generator returned neither script nor questions".into())
        })
    }
}

pub struct HttpMediaSynthesizer {
    client: Client,
    base_url: String,
}

#[derive(Serialize)]
struct SubmitRequest<'a> {
    script: &'a str,
}

#[derive(Deserialize)]
struct SubmitResponse {
    handle: String,
}

#[async_trait]
impl MediaSynthesizer for HttpMediaSynthesizer {
    async fn submit(&self, script: &str) -> Result<String, CollaboratorError> {
        let resp = self
            .client
            .post(format!("{}/media", self.base_url))
            .json(&SubmitRequest { script })
            .send()
            .await
            .map_err(map_transport_error)?;
        let body: SubmitResponse = decode(resp).await?;
        Ok(body.handle)
    }

    async fn poll(&self, handle: &str) -> Result<MediaPoll, CollaboratorError> {
        let resp = self
            .client
            .get(format!("{}/media/{}", self.base_url, handle))
            .send()
            .await
            .map_err(map_transport_error)?;
        decode(resp).await
    }
}

pub struct HttpNotifier {
    client: Client,
    base_url: String,
}

#[derive(Serialize)]
struct NotifyRequest<'a> {
    requester_id: &'a str,
    summary: &'a str,
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn notify(&self, requester_id: &str, summary: &str) -> Result<(), CollaboratorError> {
        let resp = self
            .client
            .post(format!("{}/notify", self.base_url))
            .json(&NotifyRequest {
                requester_id,
                summary,
            })
            .send()
            .await
            .map_err(map_transport_error)?;
        if !resp.status().is_success() {
            return Err(map_error_response(resp).await);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clarification_body_parses_with_questions() {
        let body = r#"{"needs_clarification": true, "questions": ["Which audience?"]}"#;
        let parsed: ClarificationBody = serde_json::from_str(body).unwrap();
        assert!(parsed.needs_clarification);
        assert_eq!(parsed.questions, vec!["Which audience?"]);
    }

    #[test]
    fn test_media_poll_wire_shapes() {
        let done: MediaPoll =
            serde_json::from_str(r#"{"status": "done", "artifact_url": "https://cdn/x.mp4"}"#)
                .unwrap();
        assert_eq!(
            done,
            MediaPoll::Done {
                artifact_url: "https://cdn/x.mp4".to_string()
            }
        );

        let pending: MediaPoll = serde_json::from_str(r#"{"status": "pending"}"#).unwrap();
        assert_eq!(pending, MediaPoll::Pending);
    }
}
