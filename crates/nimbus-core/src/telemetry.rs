//! # Telemetry Types
//!
//! A [`TelemetryReading`] is what the sensor bus hands us. It is converted
//! into a [`TelemetryPayload`] (the exact JSON object the cloud endpoint
//! expects) and serialized immediately into a [`PendingMessage`], so a
//! queued message never changes shape after the fact.
//!
//! ## Wire Format
//! ```json
//! {
//!   "currentTemperature": 21.4,
//!   "currentHumidity": 48.2,
//!   "currentPressure": 101325.0,
//!   "deviceId": "station-01",
//!   "time": "2026-08-23T09:15:00Z"
//! }
//! ```

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;

// =============================================================================
// Sensor Reading
// =============================================================================

/// One sample from the weather sensor bus.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TelemetryReading {
    /// Temperature in degrees Celsius.
    pub temperature_c: f64,

    /// Relative humidity in percent.
    pub humidity_pct: f64,

    /// Barometric pressure in Pascal.
    pub pressure_pa: f64,
}

impl TelemetryReading {
    /// Rejects readings containing NaN or infinite values.
    ///
    /// Sensor drivers occasionally return garbage after an I2C glitch; a
    /// non-finite value would serialize to invalid JSON, so it is refused
    /// before it can enter the queue.
    pub fn validate(&self) -> Result<(), CoreError> {
        for (field, value) in [
            ("temperature", self.temperature_c),
            ("humidity", self.humidity_pct),
            ("pressure", self.pressure_pa),
        ] {
            if !value.is_finite() {
                return Err(CoreError::NonFiniteReading { field, value });
            }
        }
        Ok(())
    }
}

// =============================================================================
// Cloud Payload
// =============================================================================

/// The telemetry JSON object sent to the cloud endpoint.
///
/// Field names are part of the external contract and must stay camelCase.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryPayload {
    /// Temperature in degrees Celsius.
    pub current_temperature: f64,

    /// Relative humidity in percent.
    pub current_humidity: f64,

    /// Barometric pressure in Pascal.
    pub current_pressure: f64,

    /// Identity of the reporting device.
    pub device_id: String,

    /// Sample timestamp, RFC 3339 in UTC.
    pub time: String,
}

impl TelemetryPayload {
    /// Builds a payload from a validated reading.
    pub fn new(
        reading: TelemetryReading,
        device_id: &str,
        time: DateTime<Utc>,
    ) -> Result<Self, CoreError> {
        reading.validate()?;
        if device_id.is_empty() {
            return Err(CoreError::EmptyDeviceId);
        }
        Ok(TelemetryPayload {
            current_temperature: reading.temperature_c,
            current_humidity: reading.humidity_pct,
            current_pressure: reading.pressure_pa,
            device_id: device_id.to_string(),
            time: time.to_rfc3339_opts(SecondsFormat::Secs, true),
        })
    }
}

// =============================================================================
// Pending Message
// =============================================================================

/// An immutable, already-serialized telemetry message awaiting upload.
///
/// The body is frozen at enqueue time: whatever happens to the session or
/// the queue afterwards, the bytes that eventually reach the cloud are the
/// bytes produced when the sample was taken. The id exists only for log
/// correlation and never goes over the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingMessage {
    /// Local identifier for logging.
    pub id: Uuid,

    /// Serialized [`TelemetryPayload`] JSON document.
    pub body: String,
}

impl PendingMessage {
    /// Serializes a payload into a queueable message.
    pub fn from_payload(payload: &TelemetryPayload) -> Result<Self, CoreError> {
        Ok(PendingMessage {
            id: Uuid::new_v4(),
            body: serde_json::to_string(payload)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_reading() -> TelemetryReading {
        TelemetryReading {
            temperature_c: 21.5,
            humidity_pct: 48.0,
            pressure_pa: 101_325.0,
        }
    }

    #[test]
    fn test_payload_wire_field_names() {
        let time = Utc.with_ymd_and_hms(2026, 8, 23, 9, 15, 0).unwrap();
        let payload = TelemetryPayload::new(sample_reading(), "station-01", time).unwrap();
        let json: serde_json::Value = serde_json::to_value(&payload).unwrap();

        assert_eq!(json["currentTemperature"], 21.5);
        assert_eq!(json["currentHumidity"], 48.0);
        assert_eq!(json["currentPressure"], 101_325.0);
        assert_eq!(json["deviceId"], "station-01");
        assert_eq!(json["time"], "2026-08-23T09:15:00Z");
    }

    #[test]
    fn test_non_finite_reading_rejected() {
        let reading = TelemetryReading {
            temperature_c: f64::NAN,
            ..sample_reading()
        };
        assert!(reading.validate().is_err());

        let reading = TelemetryReading {
            pressure_pa: f64::INFINITY,
            ..sample_reading()
        };
        assert!(reading.validate().is_err());
    }

    #[test]
    fn test_empty_device_id_rejected() {
        let err = TelemetryPayload::new(sample_reading(), "", Utc::now());
        assert!(matches!(err, Err(CoreError::EmptyDeviceId)));
    }

    #[test]
    fn test_pending_message_body_is_frozen_json() {
        let payload = TelemetryPayload::new(sample_reading(), "station-01", Utc::now()).unwrap();
        let msg = PendingMessage::from_payload(&payload).unwrap();
        let parsed: TelemetryPayload = serde_json::from_str(&msg.body).unwrap();
        assert_eq!(parsed, payload);
    }
}
