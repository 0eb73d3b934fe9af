//! # nimbus-core: Pure Types for Nimbus Station
//!
//! This crate defines the data model shared by the sync engine and the
//! station daemon: telemetry readings and their wire payloads, device twin
//! notifications, and the key/value messages exchanged over the local
//! bridge.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Nimbus Station Architecture                        │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    stationd (daemon)                            │   │
//! │  │    sensor tick ──► coordinator ──► cloud endpoint               │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ nimbus-core (THIS CRATE) ★                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │ telemetry │  │   twin    │  │   local   │  │   error   │  │   │
//! │  │   │  Reading  │  │Notification│ │LocalMessage│ │ CoreError │  │   │
//! │  │   │  Payload  │  │  $version │  │ScalarValue│  │           │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO NETWORK • NO ASYNC • PURE TYPES                  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`telemetry`] - Sensor readings and the serialized cloud payload
//! - [`twin`] - Device twin configuration notifications
//! - [`local`] - Messages exchanged over the same-device bridge
//! - [`error`] - Data model error types

pub mod error;
pub mod local;
pub mod telemetry;
pub mod twin;

pub use error::CoreError;
pub use local::{LocalMessage, ScalarValue};
pub use telemetry::{PendingMessage, TelemetryPayload, TelemetryReading};
pub use twin::TwinNotification;
