//! # Device Twin Notifications
//!
//! The cloud keeps a versioned record of the device's desired configuration
//! (the "twin"). Changes arrive either as a full snapshot right after
//! authentication or as incremental pushes while connected. Both carry the
//! same shape: a flat object of properties plus an optional `$version`
//! counter maintained by the cloud.
//!
//! ```json
//! { "$version": 7, "ConfigTemperatureUnit": "C", "ConfigSampleSecs": 5 }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A desired-configuration notification from the cloud twin.
///
/// `#[serde(flatten)]` captures every property key; the `$version` field,
/// when present, is the batch-scope version the acceptance rule is gated on.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TwinNotification {
    /// Monotonically increasing version assigned by the cloud.
    /// Older twin services omit it entirely.
    #[serde(rename = "$version", skip_serializing_if = "Option::is_none")]
    pub version: Option<i64>,

    /// Property key/value pairs. Values may be any JSON; non-scalar
    /// entries are skipped by the consumer, not here.
    #[serde(flatten)]
    pub properties: Map<String, Value>,
}

impl TwinNotification {
    /// Builds an unversioned notification from pairs. Mostly used in tests
    /// and by the reported-properties path.
    pub fn from_pairs<I, K>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        TwinNotification {
            version: None,
            properties: pairs.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    /// Same, with a version attached.
    pub fn with_version(mut self, version: i64) -> Self {
        self.version = Some(version);
        self
    }

    /// True when the notification carries no properties at all.
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_version_extracted_from_dollar_field() {
        let notification: TwinNotification = serde_json::from_value(json!({
            "$version": 7,
            "ConfigTemperatureUnit": "C",
            "ConfigSampleSecs": 5
        }))
        .unwrap();

        assert_eq!(notification.version, Some(7));
        assert_eq!(notification.properties.len(), 2);
        assert_eq!(notification.properties["ConfigTemperatureUnit"], json!("C"));
    }

    #[test]
    fn test_unversioned_notification() {
        let notification: TwinNotification =
            serde_json::from_value(json!({ "ConfigFoo": true })).unwrap();
        assert_eq!(notification.version, None);
        assert!(!notification.is_empty());
    }

    #[test]
    fn test_version_not_emitted_when_absent() {
        let notification = TwinNotification::from_pairs([("ConfigFoo", json!(1))]);
        let value = serde_json::to_value(&notification).unwrap();
        assert!(value.get("$version").is_none());
    }
}
