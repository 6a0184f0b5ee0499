//! Engine configuration

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Chunk size used when reading script and bootstrap sources
pub const DEFAULT_READ_CHUNK_SIZE: usize = 65536;

fn default_engine_name() -> String {
    "cpython".to_string()
}

fn default_language_name() -> String {
    "CPython".to_string()
}

fn default_bootstrap_resource() -> String {
    "scripting-cpython.py".to_string()
}

fn default_read_chunk_size() -> usize {
    DEFAULT_READ_CHUNK_SIZE
}

fn default_close_grace_ms() -> u64 {
    1000
}

/// Settings shared by a script language and the engines it creates.
///
/// Every field has a default, so `{}` is a valid configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Short engine name reported to the host
    #[serde(default = "default_engine_name")]
    pub engine_name: String,
    /// Human-readable language name reported to the host
    #[serde(default = "default_language_name")]
    pub language_name: String,
    /// Name of the worker bootstrap resource
    #[serde(default = "default_bootstrap_resource")]
    pub bootstrap_resource: String,
    /// Bytes requested per read when consuming a script stream
    #[serde(default = "default_read_chunk_size")]
    pub read_chunk_size: usize,
    /// Upper bound on each teardown handoff (close notifications only)
    #[serde(default = "default_close_grace_ms")]
    pub close_grace_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            engine_name: default_engine_name(),
            language_name: default_language_name(),
            bootstrap_resource: default_bootstrap_resource(),
            read_chunk_size: default_read_chunk_size(),
            close_grace_ms: default_close_grace_ms(),
        }
    }
}

impl EngineConfig {
    /// Parses and validates a JSON configuration
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads a JSON configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    /// Rejects settings the engine cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.read_chunk_size == 0 {
            return Err(ConfigError::Invalid(
                "read_chunk_size must be greater than zero".to_string(),
            ));
        }
        if self.engine_name.trim().is_empty() {
            return Err(ConfigError::Invalid("engine_name must not be empty".to_string()));
        }
        Ok(())
    }

    /// Sets the teardown grace period, saturating at `u64::MAX` milliseconds
    pub fn with_close_grace(mut self, grace: Duration) -> Self {
        self.close_grace_ms = u64::try_from(grace.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Sets the stream read chunk size
    pub fn with_read_chunk_size(mut self, size: usize) -> Self {
        self.read_chunk_size = size;
        self
    }

    /// Teardown grace period as a `Duration`
    pub fn close_grace(&self) -> Duration {
        Duration::from_millis(self.close_grace_ms)
    }
}
