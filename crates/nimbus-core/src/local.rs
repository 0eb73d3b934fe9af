//! # Local Bridge Messages
//!
//! The station daemon talks to the foreground process over a same-device
//! channel using flat key/value maps. The convention is simple:
//!
//! - key with a **value** means "set or report this value"
//! - key with **null** means "send me your last known value for this key"
//!
//! Configuration distribution uses `Config*`-prefixed keys by convention.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

// =============================================================================
// Scalar Values
// =============================================================================

/// The scalar value types allowed over the bridge.
///
/// Untagged, so the JSON side is just the plain value. Variant order
/// matters: serde tries bool, then integer, then float, then string.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ScalarValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl ScalarValue {
    /// Converts a JSON value into a scalar, or `None` if it is an array,
    /// object, or null.
    pub fn from_json(value: &Value) -> Option<ScalarValue> {
        match value {
            Value::Bool(b) => Some(ScalarValue::Bool(*b)),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(ScalarValue::Int(i))
                } else {
                    n.as_f64().map(ScalarValue::Float)
                }
            }
            Value::String(s) => Some(ScalarValue::Text(s.clone())),
            Value::Null | Value::Array(_) | Value::Object(_) => None,
        }
    }

    /// Converts back into a JSON value.
    pub fn to_json(&self) -> Value {
        match self {
            ScalarValue::Bool(b) => Value::from(*b),
            ScalarValue::Int(i) => Value::from(*i),
            ScalarValue::Float(f) => Value::from(*f),
            ScalarValue::Text(s) => Value::from(s.as_str()),
        }
    }
}

impl From<bool> for ScalarValue {
    fn from(v: bool) -> Self {
        ScalarValue::Bool(v)
    }
}

impl From<i64> for ScalarValue {
    fn from(v: i64) -> Self {
        ScalarValue::Int(v)
    }
}

impl From<f64> for ScalarValue {
    fn from(v: f64) -> Self {
        ScalarValue::Float(v)
    }
}

impl From<&str> for ScalarValue {
    fn from(v: &str) -> Self {
        ScalarValue::Text(v.to_string())
    }
}

impl From<String> for ScalarValue {
    fn from(v: String) -> Self {
        ScalarValue::Text(v)
    }
}

impl std::fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScalarValue::Bool(b) => write!(f, "{}", b),
            ScalarValue::Int(i) => write!(f, "{}", i),
            ScalarValue::Float(v) => write!(f, "{}", v),
            ScalarValue::Text(s) => write!(f, "{}", s),
        }
    }
}

// =============================================================================
// Local Message
// =============================================================================

/// A key/value map exchanged over the local bridge.
///
/// `None` values are requests ("tell me the current value of this key");
/// `Some` values are pushes, consumed without a reply.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct LocalMessage(pub BTreeMap<String, Option<ScalarValue>>);

impl LocalMessage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a value push. Builder style for terse call sites.
    pub fn set(mut self, key: impl Into<String>, value: impl Into<ScalarValue>) -> Self {
        self.0.insert(key.into(), Some(value.into()));
        self
    }

    /// Adds a value request (null on the wire).
    pub fn request(mut self, key: impl Into<String>) -> Self {
        self.0.insert(key.into(), None);
        self
    }

    /// Non-builder insertion, for call sites assembling a message in a loop.
    pub fn insert(&mut self, key: impl Into<String>, value: Option<ScalarValue>) {
        self.0.insert(key.into(), value);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, key: &str) -> Option<&Option<ScalarValue>> {
        self.0.get(key)
    }

    /// Keys whose value was requested (null).
    pub fn requested_keys(&self) -> impl Iterator<Item = &str> {
        self.0
            .iter()
            .filter(|(_, v)| v.is_none())
            .map(|(k, _)| k.as_str())
    }

    /// (key, value) pairs that carry an actual value.
    pub fn values(&self) -> impl Iterator<Item = (&str, &ScalarValue)> {
        self.0
            .iter()
            .filter_map(|(k, v)| v.as_ref().map(|v| (k.as_str(), v)))
    }
}

impl FromIterator<(String, Option<ScalarValue>)> for LocalMessage {
    fn from_iter<T: IntoIterator<Item = (String, Option<ScalarValue>)>>(iter: T) -> Self {
        LocalMessage(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_null_means_request() {
        let msg: LocalMessage =
            serde_json::from_value(json!({ "ConfigTemperatureUnit": null })).unwrap();
        let requested: Vec<_> = msg.requested_keys().collect();
        assert_eq!(requested, vec!["ConfigTemperatureUnit"]);
        assert_eq!(msg.values().count(), 0);
    }

    #[test]
    fn test_scalar_round_trip() {
        let msg = LocalMessage::new()
            .set("temperature", 21.5)
            .set("enabled", true)
            .set("unit", "C")
            .set("samples", 5i64);

        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["temperature"], 21.5);
        assert_eq!(json["enabled"], true);
        assert_eq!(json["unit"], "C");
        assert_eq!(json["samples"], 5);

        let back: LocalMessage = serde_json::from_value(json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn test_from_json_rejects_non_scalars() {
        assert_eq!(ScalarValue::from_json(&json!([1, 2])), None);
        assert_eq!(ScalarValue::from_json(&json!({"a": 1})), None);
        assert_eq!(ScalarValue::from_json(&json!(null)), None);
        assert_eq!(
            ScalarValue::from_json(&json!(42)),
            Some(ScalarValue::Int(42))
        );
    }
}
