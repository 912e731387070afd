//! Error normalization
//!
//! Scripts can throw, reject with, or pass to a completion callback any
//! value at all. Before such a value crosses to the host it is reduced to
//! an [`ErrorRecord`]. Normalization always succeeds.

use crate::runtime::value::{ObjectKind, Value};
use serde::{Deserialize, Serialize};

const FALLBACK_NAME: &str = "Error";

/// Structured, cross-boundary error record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// Error type (constructor name unless overridden by a `type` property)
    #[serde(rename = "type")]
    pub error_type: String,
    /// Error name
    pub name: String,
    /// Error message
    pub message: String,
}

impl ErrorRecord {
    /// Build a record for a generic `Error` with the given message
    pub fn generic(message: impl Into<String>) -> Self {
        Self {
            error_type: FALLBACK_NAME.to_string(),
            name: FALLBACK_NAME.to_string(),
            message: message.into(),
        }
    }
}

/// Reduce any script value to an [`ErrorRecord`]
pub fn normalize(value: &Value) -> ErrorRecord {
    let Value::Object(obj) = value else {
        return ErrorRecord::generic(value.to_js_string());
    };
    // A value that is mid-mutation cannot be inspected; fall back rather
    // than panic.
    let Ok(obj) = obj.try_borrow() else {
        return ErrorRecord::generic("[object Object]");
    };

    let string_prop = |key: &str| match obj.properties.get(key) {
        Some(Value::String(s)) => Some(s.clone()),
        _ => None,
    };

    match &obj.kind {
        ObjectKind::Error(kind) => ErrorRecord {
            error_type: string_prop("type").unwrap_or_else(|| kind.to_string()),
            name: string_prop("name").unwrap_or_else(|| kind.to_string()),
            message: obj
                .properties
                .get("message")
                .map(Value::to_js_string)
                .unwrap_or_default(),
        },
        ObjectKind::Ordinary | ObjectKind::Array(_) => ErrorRecord {
            error_type: string_prop("type")
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| FALLBACK_NAME.to_string()),
            name: string_prop("name")
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| FALLBACK_NAME.to_string()),
            message: obj
                .properties
                .get("message")
                .map(Value::to_js_string)
                .unwrap_or_else(|| value.to_json().to_string()),
        },
    }
}
