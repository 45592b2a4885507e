//! Application configuration
//!
//! Read from a JSON file shaped like:
//!
//! ```json
//! { "ConnectionStrings": { "Default": "<connection string>" }, "TimeoutSecs": 60 }
//! ```
//!
//! `BLOBDEMO_CONNECTION_STRING` overrides the file's connection string.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable that overrides the configured connection string
pub const CONNECTION_STRING_ENV: &str = "BLOBDEMO_CONNECTION_STRING";

/// Config file looked up in the working directory
pub const CONFIG_FILE_NAME: &str = "config.json";

pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

const DEFAULT_CONNECTION_NAME: &str = "Default";

/// On-disk layout of the config file
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ConfigFile {
    #[serde(default)]
    pub connection_strings: HashMap<String, String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl ConfigFile {
    /// Load a config file; a missing file yields the empty default
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }
}

/// Resolved settings the program runs with
#[derive(Clone, Debug)]
pub struct Config {
    pub connection_string: String,
    pub timeout: Duration,
}

impl Config {
    /// Resolve configuration from `path` (or the default locations) and the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let env = std::env::var(CONNECTION_STRING_ENV).ok();
        Self::resolve(path, env)
    }

    fn resolve(path: Option<&Path>, env_connection: Option<String>) -> Result<Self> {
        let file = match path {
            Some(path) if !path.exists() => {
                return Err(Error::Config(format!(
                    "config file {} does not exist",
                    path.display()
                )))
            }
            Some(path) => ConfigFile::load(path)?,
            None => match Self::default_paths().into_iter().find(|p| p.exists()) {
                Some(found) => {
                    tracing::debug!(path = %found.display(), "using config file");
                    ConfigFile::load(&found)?
                }
                None => ConfigFile::default(),
            },
        };

        let connection_string = env_connection
            .filter(|s| !s.trim().is_empty())
            .or_else(|| {
                file.connection_strings
                    .get(DEFAULT_CONNECTION_NAME)
                    .filter(|s| !s.trim().is_empty())
                    .cloned()
            })
            .ok_or_else(|| {
                Error::Config(format!(
                    "connection string not found: set ConnectionStrings.{} in {} or {}",
                    DEFAULT_CONNECTION_NAME, CONFIG_FILE_NAME, CONNECTION_STRING_ENV
                ))
            })?;

        Ok(Config {
            connection_string,
            timeout: Duration::from_secs(file.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS)),
        })
    }

    /// `./config.json`, then `<config dir>/blobdemo/config.json`
    pub fn default_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(CONFIG_FILE_NAME)];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("blobdemo").join(CONFIG_FILE_NAME));
        }
        paths
    }
}
