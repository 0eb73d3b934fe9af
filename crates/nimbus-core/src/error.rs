//! # Data Model Errors
//!
//! Error types for the pure data model. Anything I/O related lives in
//! `nimbus-sync`'s error type instead.

use thiserror::Error;

/// Errors produced while building or validating data model values.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A sensor reading contained a NaN or infinite value.
    #[error("non-finite {field} reading: {value}")]
    NonFiniteReading { field: &'static str, value: f64 },

    /// The device identity string was empty.
    #[error("device id is empty")]
    EmptyDeviceId,

    /// A payload could not be serialized to JSON.
    #[error("serialization failed: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Serialization(err.to_string())
    }
}
