//! Cross-cutting pieces shared by every crate: configuration, logging
//! bootstrap and the messaging subject/stream names.

pub mod config;
pub mod event_topics;
pub mod logging;
