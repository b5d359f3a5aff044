//! The fixed pipeline: stage identifiers, the ordered stage table and
//! per-stage skip predicates.
//!
//! Stages are data, not control flow. Adding a stage or a modality-driven
//! skip is an edit to [`STAGE_TABLE`], not a rewrite of the executor.

use crate::job::Job;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One discrete pipeline step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Validating,
    RetrievingContext,
    GeneratingScript,
    GeneratingMedia,
    ProcessingOutput,
    Notifying,
}

impl Stage {
    /// Zero-based position in the fixed order.
    pub fn order(&self) -> u8 {
        match self {
            Stage::Validating => 0,
            Stage::RetrievingContext => 1,
            Stage::GeneratingScript => 2,
            Stage::GeneratingMedia => 3,
            Stage::ProcessingOutput => 4,
            Stage::Notifying => 5,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Validating => "validating",
            Stage::RetrievingContext => "retrieving_context",
            Stage::GeneratingScript => "generating_script",
            Stage::GeneratingMedia => "generating_media",
            Stage::ProcessingOutput => "processing_output",
            Stage::Notifying => "notifying",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "validating" => Ok(Stage::Validating),
            "retrieving_context" => Ok(Stage::RetrievingContext),
            "generating_script" => Ok(Stage::GeneratingScript),
            "generating_media" => Ok(Stage::GeneratingMedia),
            "processing_output" => Ok(Stage::ProcessingOutput),
            "notifying" => Ok(Stage::Notifying),
            _ => Err(format!("Invalid Stage: {}", s)),
        }
    }
}

/// Requested output modality of a job.
///
/// Callers unaware of the option send nothing and get the full,
/// media-including pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    Full,
    Text,
    Audio,
    Video,
}

impl Modality {
    pub fn includes_media(&self) -> bool {
        match self {
            Modality::Full | Modality::Audio | Modality::Video => true,
            Modality::Text => false,
        }
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Modality::Full => "full",
            Modality::Text => "text",
            Modality::Audio => "audio",
            Modality::Video => "video",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for Modality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full" => Ok(Modality::Full),
            "text" => Ok(Modality::Text),
            "audio" => Ok(Modality::Audio),
            "video" => Ok(Modality::Video),
            _ => Err(format!("Invalid Modality: {}", s)),
        }
    }
}

/// One entry of the static stage table.
pub struct StageEntry {
    pub stage: Stage,
    /// When the predicate returns true the stage is recorded `Skipped`,
    /// never invoked and never retried.
    pub skip: fn(&Job) -> bool,
}

fn never(_job: &Job) -> bool {
    false
}

fn media_not_requested(job: &Job) -> bool {
    !job.wants_media()
}

/// The pipeline in execution order.
pub static STAGE_TABLE: &[StageEntry] = &[
    StageEntry {
        stage: Stage::Validating,
        skip: never,
    },
    StageEntry {
        stage: Stage::RetrievingContext,
        skip: never,
    },
    StageEntry {
        stage: Stage::GeneratingScript,
        skip: never,
    },
    StageEntry {
        stage: Stage::GeneratingMedia,
        skip: media_not_requested,
    },
    StageEntry {
        stage: Stage::ProcessingOutput,
        skip: never,
    },
    StageEntry {
        stage: Stage::Notifying,
        skip: never,
    },
];

/// Stages at or after `from`, in order. `None` yields the whole table.
pub fn stages_from(from: Option<Stage>) -> impl Iterator<Item = &'static StageEntry> {
    let start = from.map(|s| s.order()).unwrap_or(0);
    STAGE_TABLE.iter().filter(move |e| e.stage.order() >= start)
}
