//! Message validation.
//!
//! Every failure here is permanent: a malformed message stays malformed on
//! redelivery, so the consumer acks it immediately. Conflating these with
//! transient failures is how unbounded redelivery loops start; the whole
//! point of this module is that its error type never reaches the retry path.

use scriba_domain::{JobId, Modality};
use serde::Deserialize;

/// Permanent rejection reasons. Logged, never retried.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ValidationError {
    #[error("Message payload is not valid JSON: {0}")]
    MalformedPayload(String),

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Field {field} must be a non-empty string")]
    EmptyField { field: &'static str },

    #[error("job_id is not a canonical UUID: {0}")]
    MalformedJobId(String),

    #[error("context_fields must be a JSON object")]
    ContextNotObject,

    #[error("Unknown modality: {0}")]
    UnknownModality(String),
}

/// Raw wire shape of a job-start message. All fields optional so that
/// missing-field errors are precise instead of a generic serde failure.
#[derive(Debug, Deserialize)]
struct RawStartMessage {
    job_id: Option<String>,
    requester_id: Option<String>,
    request_text: Option<String>,
    context_fields: Option<serde_json::Value>,
    requested_modalities: Option<Vec<String>>,
    correlation_id: Option<String>,
}

/// A validated job-start command.
#[derive(Debug, Clone, PartialEq)]
pub struct StartJobCommand {
    pub job_id: JobId,
    pub requester_id: String,
    pub request_text: String,
    pub context_fields: serde_json::Value,
    pub requested_modalities: Vec<Modality>,
    pub correlation_id: Option<String>,
}

/// Decode and validate a raw payload into a typed command.
pub fn validate_message(payload: &[u8]) -> Result<StartJobCommand, ValidationError> {
    let raw: RawStartMessage = serde_json::from_slice(payload)
        .map_err(|e| ValidationError::MalformedPayload(e.to_string()))?;

    let job_id_str = raw.job_id.ok_or(ValidationError::MissingField("job_id"))?;
    let job_id: JobId = job_id_str
        .parse()
        .map_err(|_| ValidationError::MalformedJobId(job_id_str))?;

    let requester_id = required_string(raw.requester_id, "requester_id")?;
    let request_text = required_string(raw.request_text, "request_text")?;

    let context_fields = raw
        .context_fields
        .ok_or(ValidationError::MissingField("context_fields"))?;
    if !context_fields.is_object() {
        return Err(ValidationError::ContextNotObject);
    }

    // Absent field defaults to the full, media-including modality so callers
    // unaware of the option keep their behavior.
    let requested_modalities = match raw.requested_modalities {
        None => vec![Modality::Full],
        Some(raw_modalities) => {
            let mut modalities = Vec::with_capacity(raw_modalities.len());
            for m in raw_modalities {
                modalities.push(
                    m.parse::<Modality>()
                        .map_err(|_| ValidationError::UnknownModality(m))?,
                );
            }
            if modalities.is_empty() {
                vec![Modality::Full]
            } else {
                modalities
            }
        }
    };

    Ok(StartJobCommand {
        job_id,
        requester_id,
        request_text,
        context_fields,
        requested_modalities,
        correlation_id: raw.correlation_id,
    })
}

fn required_string(
    value: Option<String>,
    field: &'static str,
) -> Result<String, ValidationError> {
    let value = value.ok_or(ValidationError::MissingField(field))?;
    if value.trim().is_empty() {
        return Err(ValidationError::EmptyField { field });
    }
    Ok(value)
}
