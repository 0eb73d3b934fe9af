//! # Credential Source
//!
//! The device identity and short-lived SAS tokens come from a hardware
//! security module on real devices. The sync engine only ever sees this
//! narrow trait: an identity that is read once at startup, and a token that
//! is regenerated for every authentication attempt and never cached beyond
//! one session.

use async_trait::async_trait;

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Credential Source Trait
// =============================================================================

/// Supplies the device identity and fresh authentication tokens.
///
/// Both operations may fail or return empty values; the caller decides what
/// that means (a missing identity disables the subsystem, an empty token
/// fails one authentication attempt).
#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// Returns the device identifier. Read once at startup; never retried.
    async fn device_id(&self) -> SyncResult<String>;

    /// Generates a fresh short-lived token for one session.
    async fn sas_token(&self) -> SyncResult<String>;
}

// =============================================================================
// Environment Adapter
// =============================================================================

/// Environment variable names used by [`EnvCredentialSource`].
const DEVICE_ID_VAR: &str = "NIMBUS_DEVICE_ID";
const SAS_TOKEN_VAR: &str = "NIMBUS_SAS_TOKEN";

/// Credential source backed by environment variables.
///
/// Stands in for the hardware module on development machines and in CI.
/// Token rotation is whoever sets the variable's problem; the contract
/// (fresh read per authentication) still holds.
#[derive(Debug, Default)]
pub struct EnvCredentialSource;

impl EnvCredentialSource {
    pub fn new() -> Self {
        EnvCredentialSource
    }
}

#[async_trait]
impl CredentialSource for EnvCredentialSource {
    async fn device_id(&self) -> SyncResult<String> {
        match std::env::var(DEVICE_ID_VAR) {
            Ok(id) if !id.is_empty() => Ok(id),
            _ => Err(SyncError::IdentityUnavailable),
        }
    }

    async fn sas_token(&self) -> SyncResult<String> {
        // Empty is not an error here: the session layer fails fast on it
        // without touching the network, which is the behavior under test.
        Ok(std::env::var(SAS_TOKEN_VAR).unwrap_or_default())
    }
}

// =============================================================================
// Static Adapter
// =============================================================================

/// Fixed credentials, for tests and local demos.
#[derive(Debug, Clone)]
pub struct StaticCredentials {
    pub device_id: String,
    pub token: String,
}

impl StaticCredentials {
    pub fn new(device_id: impl Into<String>, token: impl Into<String>) -> Self {
        StaticCredentials {
            device_id: device_id.into(),
            token: token.into(),
        }
    }
}

#[async_trait]
impl CredentialSource for StaticCredentials {
    async fn device_id(&self) -> SyncResult<String> {
        if self.device_id.is_empty() {
            return Err(SyncError::IdentityUnavailable);
        }
        Ok(self.device_id.clone())
    }

    async fn sas_token(&self) -> SyncResult<String> {
        Ok(self.token.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_credentials() {
        let creds = StaticCredentials::new("station-01", "tok");
        assert_eq!(creds.device_id().await.unwrap(), "station-01");
        assert_eq!(creds.sas_token().await.unwrap(), "tok");
    }

    #[tokio::test]
    async fn test_empty_identity_is_unavailable() {
        let creds = StaticCredentials::new("", "tok");
        assert!(matches!(
            creds.device_id().await,
            Err(SyncError::IdentityUnavailable)
        ));
    }
}
