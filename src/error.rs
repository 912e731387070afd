//! Error types for the sandbox host

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Main error type for the sandbox host.
///
/// Script-level failures (thrown values, rejected continuations) never
/// surface here; they travel as [`crate::Value`]s and are reported through
/// execution events. This type covers host-side failures only.
#[derive(Error, Debug)]
pub enum Error {
    /// The completion arbiter received an event its current state does not accept
    #[error("InvalidTransition: cannot {action} while {state}")]
    InvalidTransition {
        state: crate::sandbox::ArbiterState,
        action: &'static str,
    },

    /// An execution was finalized a second time
    #[error("AlreadyFinalized: execution {0} has already reported its result")]
    AlreadyFinalized(crate::sandbox::ExecutionId),

    /// Resource limit exceeded (watchdog teardown)
    #[error("ResourceLimitError: {kind}: {message}")]
    ResourceLimitError {
        kind: ResourceLimitKind,
        message: String,
    },

    /// Invalid sandbox configuration
    #[error("ConfigError: {0}")]
    ConfigError(String),

    /// Unknown demonstration script requested by name
    #[error("UnknownScenario: {0}")]
    UnknownScenario(String),

    /// IO error
    #[error("IOError: {source}")]
    IoError {
        #[from]
        source: std::io::Error,
    },

    /// JSON (de)serialization error
    #[error("JsonError: {source}")]
    JsonError {
        #[from]
        source: serde_json::Error,
    },
}

/// Resource limit kinds enforced by the watchdog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceLimitKind {
    /// Virtual execution time limit exceeded
    TimeLimit,
    /// Task count limit exceeded
    OperationLimit,
}

impl fmt::Display for ResourceLimitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceLimitKind::TimeLimit => write!(f, "TimeLimit"),
            ResourceLimitKind::OperationLimit => write!(f, "OperationLimit"),
        }
    }
}

/// Script-visible error constructor kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(clippy::enum_variant_names)]
pub enum ErrorKind {
    /// TypeError - wrong type for operation
    TypeError,
    /// Generic Error - user-thrown Error objects
    GenericError,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::TypeError => write!(f, "TypeError"),
            ErrorKind::GenericError => write!(f, "Error"),
        }
    }
}

impl Error {
    /// Create a configuration error
    pub fn config_error(message: impl Into<String>) -> Self {
        Error::ConfigError(message.into())
    }

    /// Create a resource limit error
    pub fn resource_limit(kind: ResourceLimitKind, message: impl Into<String>) -> Self {
        Error::ResourceLimitError {
            kind,
            message: message.into(),
        }
    }

    /// Whether this error comes from a watchdog teardown
    pub fn is_resource_limit(&self) -> bool {
        matches!(self, Error::ResourceLimitError { .. })
    }
}

/// Result type for sandbox host operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_display() {
        assert_eq!(ErrorKind::GenericError.to_string(), "Error");
        assert_eq!(ErrorKind::TypeError.to_string(), "TypeError");
    }

    #[test]
    fn test_resource_limit_display() {
        let err = Error::resource_limit(ResourceLimitKind::TimeLimit, "60000ms elapsed");
        assert!(err.is_resource_limit());
        assert_eq!(err.to_string(), "ResourceLimitError: TimeLimit: 60000ms elapsed");
    }

    #[test]
    fn test_config_error_display() {
        let err = Error::config_error("timeout_ms must be positive");
        assert_eq!(err.to_string(), "ConfigError: timeout_ms must be positive");
        assert!(!err.is_resource_limit());
    }
}
