//! `.tissue/config.toml` loading.

use crate::core::error::TissueError;
use crate::core::pool::ConnOptions;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub defaults: DefaultsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub busy_timeout_secs: u32,
    pub max_retries: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            busy_timeout_secs: 5,
            max_retries: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultsConfig {
    pub priority: i64,
    pub author: String,
    pub list_limit: usize,
    pub team: Option<String>,
    /// Tag the CLI adds to every issue it creates. Empty disables it.
    pub node_tag: String,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            priority: 3,
            author: "tissue".to_string(),
            list_limit: 50,
            team: None,
            node_tag: "node:agent".to_string(),
        }
    }
}

impl Config {
    /// Load `path`, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self, TissueError> {
        if !path.is_file() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, TissueError> {
        let config: Config =
            toml::from_str(content).map_err(|e| TissueError::ConfigError(e.to_string()))?;
        config.check()?;
        Ok(config)
    }

    fn check(&self) -> Result<(), TissueError> {
        if !(1..=5).contains(&self.defaults.priority) {
            return Err(TissueError::ConfigError(format!(
                "defaults.priority must be within 1..=5, got {}",
                self.defaults.priority
            )));
        }
        if self.defaults.list_limit == 0 {
            return Err(TissueError::ConfigError(
                "defaults.list_limit must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn conn_options(&self) -> ConnOptions {
        ConnOptions {
            busy_timeout_secs: self.store.busy_timeout_secs,
            max_retries: self.store.max_retries,
        }
    }

    pub fn to_toml(&self) -> Result<String, TissueError> {
        toml::to_string_pretty(self).map_err(|e| TissueError::ConfigError(e.to_string()))
    }
}
