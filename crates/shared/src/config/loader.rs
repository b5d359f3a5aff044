//! Loads configuration from an optional `.env` file and the process
//! environment, then validates it.

use super::dto::ServerConfig;
use super::error::{ConfigError, Result};
use super::validator::validate_server_config;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default)]
pub struct ConfigLoader {
    env_file_path: Option<PathBuf>,
}

impl ConfigLoader {
    /// `env_file_path` is loaded before the environment is read, so values
    /// in the file win for local development.
    pub fn new(env_file_path: Option<PathBuf>) -> Self {
        Self { env_file_path }
    }

    pub fn load(&self) -> Result<ServerConfig> {
        if let Some(path) = &self.env_file_path {
            self.load_env_file(path)?;
        }
        let config = ServerConfig::from_env()?;
        validate_server_config(&config)?;
        Ok(config)
    }

    fn load_env_file(&self, path: &Path) -> Result<()> {
        dotenvy::from_path(path).map_err(|e| ConfigError::EnvFileLoad {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }
}
