//! Service configuration
//!
//! Defaults are usable out of the box. A JSON file can override any field
//! and `WMBENCH_*` environment variables override the file.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, WmError};

/// Default upload limit (100 MiB)
pub const DEFAULT_MAX_INPUT_BYTES: u64 = 100 * 1024 * 1024;

/// Default duration limit (2 hours)
pub const DEFAULT_MAX_DURATION_SECS: f64 = 7200.0;

/// Bit depths the WAV encoder can produce
pub const SUPPORTED_BIT_DEPTHS: [u16; 3] = [16, 24, 32];

/// Runtime configuration for [`crate::service::WatermarkService`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Directory holding `catalog.json` and the blob tree
    pub storage_root: PathBuf,
    /// Largest accepted encoded input
    pub max_input_bytes: u64,
    /// Longest accepted input, and cap on manipulation output length
    pub max_duration_secs: f64,
    /// Bit depth of produced WAV files (16, 24 or 32 float)
    pub output_bit_depth: u16,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            storage_root: PathBuf::from("wmbench-data"),
            max_input_bytes: DEFAULT_MAX_INPUT_BYTES,
            max_duration_secs: DEFAULT_MAX_DURATION_SECS,
            output_bit_depth: 16,
        }
    }
}

impl ServiceConfig {
    /// Config rooted at `storage_root`, everything else default
    pub fn with_root(storage_root: impl Into<PathBuf>) -> Self {
        Self {
            storage_root: storage_root.into(),
            ..Self::default()
        }
    }

    /// Load from a JSON file, then apply environment overrides
    ///
    /// # Errors
    /// * `Io` - If the file cannot be read
    /// * `Serialization` - If the file is not valid JSON
    /// * `InvalidParameter` - If a value is out of range
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: ServiceConfig = serde_json::from_str(&content)?;
        config.with_env_overrides()
    }

    /// Defaults plus environment overrides
    pub fn from_env() -> Result<Self> {
        Self::default().with_env_overrides()
    }

    /// Apply `WMBENCH_STORAGE_ROOT`, `WMBENCH_MAX_INPUT_BYTES`,
    /// `WMBENCH_MAX_DURATION_SECS` and `WMBENCH_OUTPUT_BIT_DEPTH`
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Ok(root) = std::env::var("WMBENCH_STORAGE_ROOT") {
            self.storage_root = PathBuf::from(root);
        }
        if let Ok(value) = std::env::var("WMBENCH_MAX_INPUT_BYTES") {
            self.max_input_bytes = value
                .parse()
                .map_err(|_| WmError::invalid("max_input_bytes", "not an integer"))?;
        }
        if let Ok(value) = std::env::var("WMBENCH_MAX_DURATION_SECS") {
            self.max_duration_secs = value
                .parse()
                .map_err(|_| WmError::invalid("max_duration_secs", "not a number"))?;
        }
        if let Ok(value) = std::env::var("WMBENCH_OUTPUT_BIT_DEPTH") {
            self.output_bit_depth = value
                .parse()
                .map_err(|_| WmError::invalid("output_bit_depth", "not an integer"))?;
        }
        self.validate()?;
        Ok(self)
    }

    /// Check every field is in range
    pub fn validate(&self) -> Result<()> {
        if self.max_input_bytes == 0 {
            return Err(WmError::invalid("max_input_bytes", "must be positive"));
        }
        if !self.max_duration_secs.is_finite() || self.max_duration_secs <= 0.0 {
            return Err(WmError::invalid(
                "max_duration_secs",
                "must be a positive number of seconds",
            ));
        }
        if !SUPPORTED_BIT_DEPTHS.contains(&self.output_bit_depth) {
            return Err(WmError::invalid(
                "output_bit_depth",
                format!("{} not one of 16, 24, 32", self.output_bit_depth),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config_is_valid() {
        let config = ServiceConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_input_bytes, 100 * 1024 * 1024);
    }

    #[test]
    fn test_load_partial_json_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "output_bit_depth": 24 }"#).unwrap();

        let config: ServiceConfig =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(config.output_bit_depth, 24);
        assert_eq!(config.max_duration_secs, DEFAULT_MAX_DURATION_SECS);
    }

    #[test]
    fn test_invalid_bit_depth_rejected() {
        let config = ServiceConfig {
            output_bit_depth: 12,
            ..ServiceConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("output_bit_depth"));
    }

    #[test]
    fn test_with_root() {
        let config = ServiceConfig::with_root("/tmp/catalog");
        assert_eq!(config.storage_root, PathBuf::from("/tmp/catalog"));
        assert_eq!(config.output_bit_depth, 16);
    }
}
