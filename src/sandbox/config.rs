//! Sandbox configuration

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Configuration for a [`Sandbox`](super::Sandbox).
///
/// Every field has a default, so a JSON config only needs the keys it
/// changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SandboxConfig {
    /// Virtual milliseconds an execution may spend awaiting asynchronous
    /// work before the watchdog tears it down.
    pub timeout_ms: u64,
    /// Maximum number of loop tasks one execution may run.
    pub max_tasks: usize,
    /// Install the tracking constructor. When off, nothing is tracked and
    /// every execution reports a synchronous result.
    pub intercept_async: bool,
    /// Report rejections nobody handled as `execution.error`.
    pub report_unhandled_rejections: bool,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 60_000,
            max_tasks: 100_000,
            intercept_async: true,
            report_unhandled_rejections: true,
        }
    }
}

impl SandboxConfig {
    /// Parse and validate a JSON configuration
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: SandboxConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Reject limits that would tear every execution down immediately
    pub fn validate(&self) -> Result<()> {
        if self.timeout_ms == 0 {
            return Err(Error::config_error("timeout_ms must be greater than zero"));
        }
        if self.max_tasks == 0 {
            return Err(Error::config_error("max_tasks must be greater than zero"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = SandboxConfig::default();
        assert_eq!(config.timeout_ms, 60_000);
        assert_eq!(config.max_tasks, 100_000);
        assert!(config.intercept_async);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = SandboxConfig::from_json_str(r#"{ "timeout_ms": 500 }"#).unwrap();
        assert_eq!(config.timeout_ms, 500);
        assert_eq!(config.max_tasks, 100_000);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = SandboxConfig::from_json_str(r#"{ "timeout": 5 }"#).unwrap_err();
        assert!(matches!(err, Error::JsonError { .. }));
    }

    #[test]
    fn test_zero_limits_rejected() {
        let err = SandboxConfig::from_json_str(r#"{ "max_tasks": 0 }"#).unwrap_err();
        assert!(matches!(err, Error::ConfigError(_)));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "intercept_async": false }}"#).unwrap();
        let config = SandboxConfig::from_file(file.path()).unwrap();
        assert!(!config.intercept_async);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = SandboxConfig::from_file("/nonexistent/sandbox.json").unwrap_err();
        assert!(matches!(err, Error::IoError { .. }));
    }
}
