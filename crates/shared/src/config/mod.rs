//! Configuration: DTOs loaded once at startup from the environment (plus an
//! optional `.env` file) and handed to services by value.

mod dto;
mod error;
mod loader;
mod validator;

pub use dto::{
    CollaboratorsConfig, ConsumerTuning, DatabaseConfig, HttpConfig, LoggingConfig, NatsConfig,
    ServerConfig,
};
pub use error::{ConfigError, Result};
pub use loader::ConfigLoader;
pub use validator::validate_server_config;
