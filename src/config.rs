//! Configuration for the warden executive and isolate processes
//!
//! A [`WardenConfig`] starts from built-in defaults and may be partially
//! overridden from a JSON file, matching the layered default + override
//! scheme of the deployments this crate supervises. Both sides of the
//! process boundary read the same structure; the isolate entry point
//! accepts the override path as its second argument.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;

/// Configuration shared by the executive and isolate runtimes
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WardenConfig {
    /// How long `new_isolate` waits for the isolate-initialized signal (ms)
    pub isolate_init_timeout_ms: u64,

    /// How long a request sender waits for a correlated response (ms)
    pub response_timeout_ms: u64,

    /// Command line used to launch isolate processes; the app model name
    /// is appended as the first positional argument
    pub isolate_command: Vec<String>,

    /// Free-form string properties consulted by containers and embedders
    #[serde(default)]
    pub properties: HashMap<String, String>,
}

impl Default for WardenConfig {
    fn default() -> Self {
        Self {
            isolate_init_timeout_ms: 1_000,
            response_timeout_ms: 5_000,
            isolate_command: vec!["warden-isolate".to_string()],
            properties: HashMap::new(),
        }
    }
}

/// Partial override file: absent fields keep their defaults
#[derive(Debug, Default, Deserialize)]
struct ConfigOverride {
    isolate_init_timeout_ms: Option<u64>,
    response_timeout_ms: Option<u64>,
    isolate_command: Option<Vec<String>>,
    #[serde(default)]
    properties: HashMap<String, String>,
}

impl WardenConfig {
    /// Defaults, optionally merged with an override file.
    pub fn load_with_override(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(path) = path {
            config.apply_override(path)?;
        }
        Ok(config)
    }

    /// Merge a partial override file into this configuration.
    pub fn apply_override(&mut self, path: &Path) -> Result<(), ConfigError> {
        let data = std::fs::read(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let overrides: ConfigOverride =
            serde_json::from_slice(&data).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        if let Some(ms) = overrides.isolate_init_timeout_ms {
            self.isolate_init_timeout_ms = ms;
        }
        if let Some(ms) = overrides.response_timeout_ms {
            self.response_timeout_ms = ms;
        }
        if let Some(command) = overrides.isolate_command {
            self.isolate_command = command;
        }
        // Overridden properties shadow defaults key by key.
        self.properties.extend(overrides.properties);
        Ok(())
    }

    /// Isolate-init wait as a [`Duration`]
    pub fn isolate_init_timeout(&self) -> Duration {
        Duration::from_millis(self.isolate_init_timeout_ms)
    }

    /// Response wait as a [`Duration`]
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    /// Look up a string property.
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_without_override() {
        let config = WardenConfig::load_with_override(None).unwrap();
        assert_eq!(config, WardenConfig::default());
        assert_eq!(config.isolate_init_timeout(), Duration::from_millis(1_000));
    }

    #[test]
    fn partial_override_keeps_missing_fields() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"isolate_init_timeout_ms": 250, "properties": {{"windowing": "headless"}}}}"#
        )
        .unwrap();

        let config = WardenConfig::load_with_override(Some(file.path())).unwrap();
        assert_eq!(config.isolate_init_timeout_ms, 250);
        assert_eq!(config.response_timeout_ms, 5_000);
        assert_eq!(config.property("windowing"), Some("headless"));
    }

    #[test]
    fn invalid_override_is_reported() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();

        let err = WardenConfig::load_with_override(Some(file.path())).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
