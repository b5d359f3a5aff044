//! Domain layer for the Scriba content-generation pipeline.
//!
//! Pure types and ports: the job aggregate and its closed status union, the
//! static stage table, stage records, audit events, collaborator ports and
//! repository traits. No I/O happens here.

pub mod collaborators;
pub mod error;
pub mod events;
pub mod ids;
pub mod job;
pub mod pipeline;
pub mod repository;
pub mod stage_record;
pub mod status;

pub use error::{DomainError, Result};
pub use events::{JobEvent, JobEventKind, StatusUpdate};
pub use ids::JobId;
pub use job::{ErrorDetail, Job, JobOutput};
pub use pipeline::{Modality, Stage};
pub use stage_record::StageRecord;
pub use status::{JobStatus, StageStatus};
