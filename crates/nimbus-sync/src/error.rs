//! # Sync Error Types
//!
//! Error types for the sync engine.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Identity/Auth  │  │   Transport     │  │     Coordination        │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │ IdentityUnavail.│  │ ConnectionFailed│  │  QueueFull              │ │
//! │  │ EmptyToken      │  │ Disconnected    │  │  LockTimeout            │ │
//! │  │ AuthFailed      │  │ Timeout         │  │  SendFailed             │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐                              │
//! │  │  Configuration  │  │    Protocol     │                              │
//! │  │                 │  │                 │                              │
//! │  │  InvalidConfig  │  │ Serialization   │                              │
//! │  │  ConfigLoad     │  │ Deserialization │                              │
//! │  └─────────────────┘  └─────────────────┘                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Sync error type covering all possible sync failures.
///
/// ## Design Principles
/// - Each variant includes enough context for debugging
/// - Errors are categorized for different handling strategies
/// - All errors are `Send + Sync` for async compatibility
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Identity & Authentication Errors
    // =========================================================================
    /// No usable device identity was available at startup.
    /// This disables all cloud operations for the process lifetime.
    #[error("device identity unavailable, cloud operations disabled")]
    IdentityUnavailable,

    /// The credential source returned an empty authentication token.
    #[error("credential source returned an empty token")]
    EmptyToken,

    /// The cloud endpoint rejected the session credentials.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    // =========================================================================
    // Transport Errors
    // =========================================================================
    /// Failed to establish a connection to the cloud endpoint.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The connection dropped unexpectedly.
    #[error("disconnected from cloud endpoint")]
    Disconnected,

    /// An operation timed out.
    #[error("operation timed out after {0} seconds")]
    Timeout(u64),

    /// WebSocket protocol error.
    #[error("websocket error: {0}")]
    WebSocketError(String),

    // =========================================================================
    // Coordination Errors
    // =========================================================================
    /// The telemetry queue is full; the newest sample was dropped.
    #[error("telemetry queue full, message dropped")]
    QueueFull,

    /// The single-flight send lock was not acquired within the bounded wait.
    #[error("send lock not acquired within {0} seconds")]
    LockTimeout(u64),

    /// A batch send failed for a non-authorization reason.
    #[error("send failed: {0}")]
    SendFailed(String),

    // =========================================================================
    // Protocol Errors
    // =========================================================================
    /// Failed to serialize a message.
    #[error("serialization failed: {0}")]
    SerializationFailed(String),

    /// Failed to deserialize a message.
    #[error("deserialization failed: {0}")]
    DeserializationFailed(String),

    /// A payload failed validation before it could be queued.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid station configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Failed to load the config file.
    #[error("failed to load config: {0}")]
    ConfigLoadFailed(String),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// Channel send/receive failed.
    #[error("channel error: {0}")]
    ChannelError(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<nimbus_core::CoreError> for SyncError {
    fn from(err: nimbus_core::CoreError) -> Self {
        SyncError::InvalidPayload(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::SerializationFailed(err.to_string())
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::InvalidConfig(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for SyncError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match err {
            WsError::ConnectionClosed => SyncError::Disconnected,
            WsError::AlreadyClosed => SyncError::Disconnected,
            WsError::Protocol(p) => SyncError::WebSocketError(p.to_string()),
            WsError::Io(io) => SyncError::ConnectionFailed(io.to_string()),
            WsError::Tls(tls) => SyncError::ConnectionFailed(tls.to_string()),
            other => SyncError::WebSocketError(other.to_string()),
        }
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization (for retry logic)
// =============================================================================

impl SyncError {
    /// Returns true if the operation may succeed at a later scheduled cycle.
    ///
    /// ## Retryable Errors
    /// - Authentication failures (token regenerated next cycle)
    /// - Connection failures and timeouts
    /// - Transient send failures (batch is re-enqueued)
    ///
    /// ## Non-Retryable Errors
    /// - Missing device identity (disabled for the process lifetime)
    /// - Configuration errors
    /// - Queue overflow (that sample is gone)
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::EmptyToken
                | SyncError::AuthFailed(_)
                | SyncError::ConnectionFailed(_)
                | SyncError::Disconnected
                | SyncError::Timeout(_)
                | SyncError::WebSocketError(_)
                | SyncError::SendFailed(_)
                | SyncError::LockTimeout(_)
        )
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_) | SyncError::ConfigLoadFailed(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(SyncError::ConnectionFailed("network error".into()).is_retryable());
        assert!(SyncError::EmptyToken.is_retryable());
        assert!(SyncError::AuthFailed("rejected".into()).is_retryable());
        assert!(SyncError::Timeout(30).is_retryable());

        assert!(!SyncError::IdentityUnavailable.is_retryable());
        assert!(!SyncError::QueueFull.is_retryable());
        assert!(!SyncError::InvalidConfig("bad".into()).is_retryable());
    }

    #[test]
    fn test_error_display() {
        let err = SyncError::LockTimeout(5);
        assert!(err.to_string().contains("5 seconds"));
    }
}
