//! # Cloud Protocol Messages
//!
//! Message types exchanged with the cloud telemetry endpoint.
//!
//! ## Protocol Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Cloud Protocol Messages                            │
//! │                                                                         │
//! │  SESSION HANDSHAKE                                                     │
//! │  ─────────────────                                                     │
//! │  DEVICE ───► Auth { device_id, token }                                 │
//! │  CLOUD  ◄─── AuthAck | AuthReject { reason }                           │
//! │                                                                         │
//! │  TELEMETRY UPLOAD                                                      │
//! │  ────────────────                                                      │
//! │  DEVICE ───► TelemetryBatch { batch_seq, messages: [...] }             │
//! │  CLOUD  ◄─── Ack { batch_seq } | Nack { batch_seq, code, message }     │
//! │                                                                         │
//! │  TWIN CONFIGURATION                                                    │
//! │  ──────────────────                                                    │
//! │  DEVICE ───► TwinRequest                                               │
//! │  CLOUD  ◄─── TwinSnapshot { $version, ... }                            │
//! │  CLOUD  ───► DesiredUpdate { $version, ... }         (pushed anytime)  │
//! │  DEVICE ───► ReportedUpdate { batch_seq, properties }                  │
//! │  CLOUD  ◄─── Ack { batch_seq } | Nack { ... }                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Wire Format (JSON)
//! Messages are serialized as tagged JSON using serde's adjacently tagged
//! enum:
//! ```json
//! { "type": "TelemetryBatch", "payload": { "batchSeq": 3, ... } }
//! ```

use serde::{Deserialize, Serialize};

use nimbus_core::TwinNotification;

/// Current protocol version, sent with the Auth handshake.
pub const PROTOCOL_VERSION: u32 = 1;

// =============================================================================
// Main Message Enum (Tagged Union)
// =============================================================================

/// All cloud protocol messages.
///
/// Uses serde's adjacently tagged enum for clean JSON serialization:
/// `{ "type": "Auth", "payload": { ... } }`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum CloudMessage {
    // =========================================================================
    // Handshake Messages
    // =========================================================================
    /// Session credentials, sent by the device immediately after connecting.
    Auth(AuthPayload),

    /// The endpoint accepted the token.
    AuthAck,

    /// The endpoint rejected the token.
    AuthReject { reason: String },

    // =========================================================================
    // Telemetry Messages
    // =========================================================================
    /// One batch of already-serialized telemetry documents.
    TelemetryBatch(TelemetryBatchPayload),

    /// The batch identified by `batch_seq` was accepted as a unit.
    #[serde(rename_all = "camelCase")]
    Ack { batch_seq: u64 },

    /// The batch identified by `batch_seq` was refused as a unit.
    #[serde(rename_all = "camelCase")]
    Nack {
        batch_seq: u64,
        code: RejectCode,
        message: String,
    },

    // =========================================================================
    // Twin Configuration Messages
    // =========================================================================
    /// Request the full current desired-configuration snapshot.
    TwinRequest,

    /// Full desired-configuration snapshot, in reply to `TwinRequest`.
    TwinSnapshot(TwinNotification),

    /// Incremental desired-configuration change, pushed by the cloud.
    DesiredUpdate(TwinNotification),

    /// Reported-configuration update pushed up by the device.
    ReportedUpdate(ReportedUpdatePayload),
}

impl CloudMessage {
    /// Message type name for logging.
    pub fn type_name(&self) -> &'static str {
        match self {
            CloudMessage::Auth(_) => "Auth",
            CloudMessage::AuthAck => "AuthAck",
            CloudMessage::AuthReject { .. } => "AuthReject",
            CloudMessage::TelemetryBatch(_) => "TelemetryBatch",
            CloudMessage::Ack { .. } => "Ack",
            CloudMessage::Nack { .. } => "Nack",
            CloudMessage::TwinRequest => "TwinRequest",
            CloudMessage::TwinSnapshot(_) => "TwinSnapshot",
            CloudMessage::DesiredUpdate(_) => "DesiredUpdate",
            CloudMessage::ReportedUpdate(_) => "ReportedUpdate",
        }
    }

    /// Serializes to the JSON wire form.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parses from the JSON wire form.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

// =============================================================================
// Rejection Codes
// =============================================================================

/// Why the endpoint refused a batch or report.
///
/// `Unauthorized` is the one the coordinator branches on: it triggers the
/// reauthenticate-and-retry-once policy. Everything else is transient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectCode {
    /// The session token is no longer valid.
    Unauthorized,

    /// The endpoint is shedding load; retry later.
    Throttled,

    /// The payload did not parse on the cloud side.
    Invalid,

    /// Forward compatibility: any code this build does not know.
    #[serde(other)]
    Unknown,
}

// =============================================================================
// Payloads
// =============================================================================

/// Auth handshake credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthPayload {
    /// Device identifier.
    pub device_id: String,

    /// Short-lived session token.
    pub token: String,

    /// Protocol version supported by this device.
    pub protocol_version: u32,
}

impl AuthPayload {
    pub fn new(device_id: &str, token: &str) -> Self {
        AuthPayload {
            device_id: device_id.to_string(),
            token: token.to_string(),
            protocol_version: PROTOCOL_VERSION,
        }
    }
}

/// One outbound telemetry batch.
///
/// Each element of `messages` is a complete JSON document, frozen when the
/// sample was queued; the envelope never reinterprets it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryBatchPayload {
    /// Device identifier.
    pub device_id: String,

    /// Per-connection sequence number, echoed back in Ack/Nack.
    pub batch_seq: u64,

    /// Serialized telemetry documents, oldest first.
    pub messages: Vec<String>,
}

/// Reported-configuration properties pushed up by the device.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportedUpdatePayload {
    /// Per-connection sequence number, echoed back in Ack/Nack.
    pub batch_seq: u64,

    /// Property key/value pairs.
    pub properties: serde_json::Map<String, serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_adjacently_tagged_wire_shape() {
        let msg = CloudMessage::Auth(AuthPayload::new("station-01", "tok"));
        let value: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "Auth");
        assert_eq!(value["payload"]["deviceId"], "station-01");
        assert_eq!(value["payload"]["protocolVersion"], 1);
    }

    #[test]
    fn test_nack_code_parsing() {
        let text = r#"{"type":"Nack","payload":{"batchSeq":7,"code":"unauthorized","message":"token expired"}}"#;
        let msg = CloudMessage::from_json(text).unwrap();
        match msg {
            CloudMessage::Nack { batch_seq, code, .. } => {
                assert_eq!(batch_seq, 7);
                assert_eq!(code, RejectCode::Unauthorized);
            }
            other => panic!("unexpected message: {}", other.type_name()),
        }
    }

    #[test]
    fn test_unknown_reject_code_is_forward_compatible() {
        let text = r#"{"type":"Nack","payload":{"batchSeq":1,"code":"quota_exceeded","message":"x"}}"#;
        let msg = CloudMessage::from_json(text).unwrap();
        match msg {
            CloudMessage::Nack { code, .. } => assert_eq!(code, RejectCode::Unknown),
            other => panic!("unexpected message: {}", other.type_name()),
        }
    }

    #[test]
    fn test_desired_update_carries_twin_version() {
        let text = r#"{"type":"DesiredUpdate","payload":{"$version":4,"ConfigUnit":"C"}}"#;
        let msg = CloudMessage::from_json(text).unwrap();
        match msg {
            CloudMessage::DesiredUpdate(n) => {
                assert_eq!(n.version, Some(4));
                assert_eq!(n.properties["ConfigUnit"], json!("C"));
            }
            other => panic!("unexpected message: {}", other.type_name()),
        }
    }
}
