use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {name}")]
    MissingVar { name: &'static str },

    #[error("Invalid value for {name}: {reason}")]
    InvalidVar { name: &'static str, reason: String },

    #[error("Failed to load env file {path}: {message}")]
    EnvFileLoad { path: PathBuf, message: String },

    #[error("Invalid configuration: {message}")]
    Validation { message: String },
}
