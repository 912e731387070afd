//! Script value types
//!
//! This module defines the runtime representation of the values scripts
//! pass around: returned results, thrown values, promise settlements and
//! completion-callback arguments.

use super::promise::AsyncValue;
use crate::error::ErrorKind;
use rustc_hash::{FxHashMap as HashMap, FxHashSet as HashSet};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// Outcome of running a piece of script code: `Ok` is a normal return,
/// `Err` carries the thrown value.
pub type Completion = std::result::Result<Value, Value>;

/// Placeholder for an object reached again while it is being rendered
const CIRCULAR: &str = "[Circular]";

/// A script value
#[derive(Clone)]
pub enum Value {
    /// undefined
    Undefined,
    /// null
    Null,
    /// Boolean value
    Boolean(bool),
    /// Number (IEEE 754 double)
    Number(f64),
    /// String
    String(String),
    /// Object (plain objects, arrays, errors)
    Object(Rc<RefCell<Object>>),
    /// Asynchronous value (as handed out by the installed constructor)
    Promise(AsyncValue),
}

/// Heap object storage
#[derive(Debug, Clone)]
pub struct Object {
    /// What kind of object this is
    pub kind: ObjectKind,
    /// Own properties
    pub properties: HashMap<String, Value>,
}

/// Object kinds
#[derive(Debug, Clone)]
pub enum ObjectKind {
    /// Plain `{}` object
    Ordinary,
    /// Array with its elements
    Array(Vec<Value>),
    /// Error instance created by the given constructor
    Error(ErrorKind),
}

impl Value {
    /// Check if value is undefined
    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    /// Check if value is nullish (null or undefined)
    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    /// Convert to boolean (truthiness)
    pub fn to_boolean(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Boolean(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
            Value::Object(_) | Value::Promise(_) => true,
        }
    }

    /// Convert to the script's string representation
    pub fn to_js_string(&self) -> String {
        self.to_js_string_guarded(&mut HashSet::default())
    }

    fn to_js_string_guarded(&self, visiting: &mut HashSet<*const RefCell<Object>>) -> String {
        match self {
            Value::Undefined => "undefined".to_string(),
            Value::Null => "null".to_string(),
            Value::Boolean(b) => b.to_string(),
            Value::Number(n) => format_number(*n),
            Value::String(s) => s.clone(),
            Value::Promise(_) => "[object Promise]".to_string(),
            Value::Object(cell) => {
                let ptr = Rc::as_ptr(cell);
                if !visiting.insert(ptr) {
                    return CIRCULAR.to_string();
                }
                let rendered = match cell.try_borrow() {
                    Ok(obj) => match &obj.kind {
                        ObjectKind::Ordinary => "[object Object]".to_string(),
                        ObjectKind::Array(items) => items
                            .iter()
                            .map(|v| {
                                if v.is_nullish() {
                                    String::new()
                                } else {
                                    v.to_js_string_guarded(visiting)
                                }
                            })
                            .collect::<Vec<_>>()
                            .join(","),
                        ObjectKind::Error(kind) => {
                            let name = obj
                                .properties
                                .get("name")
                                .map(|v| v.to_js_string_guarded(visiting))
                                .unwrap_or_else(|| kind.to_string());
                            match obj.properties.get("message").map(|v| v.to_js_string_guarded(visiting)) {
                                Some(message) if !message.is_empty() => format!("{}: {}", name, message),
                                _ => name,
                            }
                        }
                    },
                    Err(_) => "[object Object]".to_string(),
                };
                visiting.remove(&ptr);
                rendered
            }
        }
    }

    /// The `typeof` result
    pub fn type_of(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null | Value::Object(_) | Value::Promise(_) => "object",
            Value::Boolean(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
        }
    }

    /// Strict equality (`===`); asynchronous values compare by the identity
    /// of their underlying promise
    pub fn strict_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            (Value::Promise(a), Value::Promise(b)) => a.same_value(b),
            _ => false,
        }
    }

    /// Create a new plain object
    pub fn new_object() -> Value {
        Value::new_object_with_properties(HashMap::default())
    }

    /// Create a new plain object with the given properties
    pub fn new_object_with_properties(properties: HashMap<String, Value>) -> Value {
        Value::Object(Rc::new(RefCell::new(Object {
            kind: ObjectKind::Ordinary,
            properties,
        })))
    }

    /// Create a new array
    pub fn new_array(elements: Vec<Value>) -> Value {
        Value::Object(Rc::new(RefCell::new(Object {
            kind: ObjectKind::Array(elements),
            properties: HashMap::default(),
        })))
    }

    /// Create an error object, as `new Error(message)` would
    pub fn new_error(kind: ErrorKind, message: &str) -> Value {
        let mut properties = HashMap::default();
        properties.insert("name".to_string(), Value::String(kind.to_string()));
        properties.insert("message".to_string(), Value::String(message.to_string()));
        Value::Object(Rc::new(RefCell::new(Object {
            kind: ObjectKind::Error(kind),
            properties,
        })))
    }

    /// Shorthand for a generic `Error`
    pub fn error(message: &str) -> Value {
        Value::new_error(ErrorKind::GenericError, message)
    }

    /// Read an own property
    pub fn get_property(&self, key: &str) -> Option<Value> {
        match self {
            Value::Object(obj) => {
                let obj = obj.try_borrow().ok()?;
                match (&obj.kind, key) {
                    (ObjectKind::Array(items), "length") => Some(Value::Number(items.len() as f64)),
                    _ => obj.properties.get(key).cloned(),
                }
            }
            _ => None,
        }
    }

    /// Set an own property; returns `false` for non-objects
    pub fn set_property(&self, key: &str, value: Value) -> bool {
        match self {
            Value::Object(obj) => {
                obj.borrow_mut().properties.insert(key.to_string(), value);
                true
            }
            _ => false,
        }
    }

    /// Error constructor kind, when this is an error instance
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            Value::Object(obj) => match obj.try_borrow().ok()?.kind {
                ObjectKind::Error(kind) => Some(kind),
                _ => None,
            },
            _ => None,
        }
    }

    /// Render as JSON for crossing the host boundary. An object met again
    /// while it is still being rendered becomes `"[Circular]"`.
    pub fn to_json(&self) -> serde_json::Value {
        self.to_json_guarded(&mut HashSet::default())
    }

    fn to_json_guarded(&self, visiting: &mut HashSet<*const RefCell<Object>>) -> serde_json::Value {
        use serde_json::Value as Json;
        match self {
            Value::Undefined | Value::Null => Json::Null,
            Value::Boolean(b) => Json::Bool(*b),
            Value::Number(n) if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 => Json::from(*n as i64),
            Value::Number(n) => serde_json::Number::from_f64(*n)
                .map(Json::Number)
                .unwrap_or(Json::Null),
            Value::String(s) => Json::String(s.clone()),
            Value::Promise(_) => Json::Object(serde_json::Map::new()),
            Value::Object(cell) => {
                let ptr = Rc::as_ptr(cell);
                if !visiting.insert(ptr) {
                    return Json::String(CIRCULAR.to_string());
                }
                let rendered = match cell.try_borrow() {
                    Ok(obj) => match &obj.kind {
                        ObjectKind::Array(items) => {
                            Json::Array(items.iter().map(|v| v.to_json_guarded(visiting)).collect())
                        }
                        ObjectKind::Ordinary | ObjectKind::Error(_) => {
                            let mut entries: Vec<(&String, &Value)> =
                                obj.properties.iter().filter(|(_, v)| !v.is_undefined()).collect();
                            entries.sort_by(|a, b| a.0.cmp(b.0));
                            Json::Object(
                                entries
                                    .into_iter()
                                    .map(|(k, v)| (k.clone(), v.to_json_guarded(visiting)))
                                    .collect(),
                            )
                        }
                    },
                    Err(_) => Json::Null,
                };
                visiting.remove(&ptr);
                rendered
            }
        }
    }
}

fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if n == 0.0 {
        "0".to_string()
    } else {
        format!("{}", n)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Null => write!(f, "null"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", format_number(*n)),
            Value::String(s) => write!(f, "{:?}", s),
            Value::Object(_) => write!(f, "{}", self.to_json()),
            Value::Promise(p) => write!(f, "Promise({})", p.id()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_js_string())
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<AsyncValue> for Value {
    fn from(p: AsyncValue) -> Self {
        Value::Promise(p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truthiness() {
        assert!(!Value::Undefined.to_boolean());
        assert!(!Value::Null.to_boolean());
        assert!(!Value::String(String::new()).to_boolean());
        assert!(!Value::Number(0.0).to_boolean());
        assert!(!Value::Number(f64::NAN).to_boolean());
        assert!(Value::from("x").to_boolean());
        assert!(Value::new_object().to_boolean());
    }

    #[test]
    fn test_error_to_string() {
        let err = Value::error("boom");
        assert_eq!(err.to_js_string(), "Error: boom");
        assert_eq!(err.error_kind(), Some(ErrorKind::GenericError));

        let bare = Value::new_error(ErrorKind::TypeError, "");
        assert_eq!(bare.to_js_string(), "TypeError");
    }

    #[test]
    fn test_number_formatting() {
        assert_eq!(Value::Number(42.0).to_js_string(), "42");
        assert_eq!(Value::Number(1.5).to_js_string(), "1.5");
        assert_eq!(Value::Number(f64::INFINITY).to_js_string(), "Infinity");
    }

    #[test]
    fn test_array_length_and_join() {
        let arr = Value::new_array(vec![Value::from(1.0), Value::Null, Value::from("b")]);
        assert_eq!(arr.to_js_string(), "1,,b");
        assert!(matches!(arr.get_property("length"), Some(Value::Number(n)) if n == 3.0));
    }

    #[test]
    fn test_strict_equals_objects_by_identity() {
        let a = Value::new_object();
        let b = Value::new_object();
        assert!(a.strict_equals(&a.clone()));
        assert!(!a.strict_equals(&b));
        assert!(Value::from("x").strict_equals(&Value::from("x")));
    }

    #[test]
    fn test_to_json() {
        let obj = Value::new_object();
        obj.set_property("data", Value::from("first 123"));
        obj.set_property("skip", Value::Undefined);
        assert_eq!(obj.to_json(), serde_json::json!({ "data": "first 123" }));
        assert_eq!(Value::Number(f64::NAN).to_json(), serde_json::Value::Null);
        assert_eq!(Value::Number(7.0).to_json(), serde_json::json!(7));
        assert_eq!(Value::Number(0.5).to_json(), serde_json::json!(0.5));
    }

    #[test]
    fn test_self_reference_renders_circular() {
        let obj = Value::new_object();
        obj.set_property("self", obj.clone());
        obj.set_property("n", Value::Number(1.0));
        assert_eq!(obj.to_json(), serde_json::json!({ "n": 1, "self": "[Circular]" }));

        let arr = Value::new_array(Vec::new());
        if let Value::Object(cell) = &arr {
            if let ObjectKind::Array(items) = &mut cell.borrow_mut().kind {
                items.push(Value::from("a"));
                items.push(arr.clone());
            }
        }
        assert_eq!(arr.to_js_string(), "a,[Circular]");
        assert_eq!(arr.to_json(), serde_json::json!(["a", "[Circular]"]));
    }

    #[test]
    fn test_shared_reference_is_not_circular() {
        let shared = Value::from("x");
        let inner = Value::new_object();
        inner.set_property("v", shared);
        let outer = Value::new_array(vec![inner.clone(), inner]);
        assert_eq!(outer.to_json(), serde_json::json!([{ "v": "x" }, { "v": "x" }]));
    }
}
