//! # Cloud Session
//!
//! A [`CloudSession`] wraps exactly one live, authenticated connection to
//! the telemetry endpoint. Sessions are replaced, never mutated: a
//! reauthentication closes the old session (best-effort) and creates a new
//! one, and every authentication failure leaves the caller's session slot
//! empty.
//!
//! ## Authentication Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Session Authentication                              │
//! │                                                                         │
//! │  1. CredentialSource.sas_token()                                       │
//! │     └─ empty token ──► fail fast, network never touched                │
//! │                                                                         │
//! │  2. CloudConnector.connect(identity, token, desired_tx)                │
//! │     └─ registers the desired-update channel on the new connection      │
//! │                                                                         │
//! │  3. connection.get_twin()                                              │
//! │     └─ full snapshot fed through ConfigSync BEFORE the session is      │
//! │        handed back, so local state catches up first                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use nimbus_core::{LocalMessage, PendingMessage, TwinNotification};

use crate::config_sync::ConfigSync;
use crate::credentials::CredentialSource;
use crate::error::{SyncError, SyncResult};

// =============================================================================
// Send Outcome
// =============================================================================

/// Typed failure for send operations on a live connection.
///
/// `AuthExpired` is a signal, not just an error: the coordinator branches
/// on it to run the reauthenticate-and-retry-once policy. Everything else
/// is transient and handled by re-enqueueing the batch.
#[derive(Debug, Error)]
pub enum SendFailure {
    /// The endpoint no longer accepts this session's token.
    #[error("session authorization expired")]
    AuthExpired,

    /// Network, serialization, or endpoint-side trouble; retry next cycle.
    #[error("transient send failure: {0}")]
    Transient(String),
}

impl From<SendFailure> for SyncError {
    fn from(failure: SendFailure) -> Self {
        match failure {
            SendFailure::AuthExpired => SyncError::AuthFailed("authorization expired".into()),
            SendFailure::Transient(reason) => SyncError::SendFailed(reason),
        }
    }
}

// =============================================================================
// Transport Seams
// =============================================================================

/// Opens authenticated connections to the cloud endpoint.
///
/// The production implementation is the WebSocket connector in
/// [`crate::transport`]; tests substitute scripted fakes.
#[async_trait]
pub trait CloudConnector: Send + Sync {
    /// Establishes and authenticates one connection.
    ///
    /// `desired_tx` is the configuration-change callback, modeled as a
    /// channel handoff: the connection pushes every desired-property
    /// notification it receives into it, one at a time.
    async fn connect(
        &self,
        device_id: &str,
        token: &str,
        desired_tx: mpsc::Sender<TwinNotification>,
    ) -> SyncResult<Box<dyn CloudConnection>>;
}

/// One live, authenticated connection.
#[async_trait]
pub trait CloudConnection: Send {
    /// Uploads a batch as a unit. Partial success is not modeled.
    async fn send_batch(&mut self, batch: &[PendingMessage]) -> Result<(), SendFailure>;

    /// Fetches the full current desired-configuration snapshot.
    async fn get_twin(&mut self) -> SyncResult<TwinNotification>;

    /// Pushes locally edited configuration up to the twin.
    async fn report_properties(&mut self, properties: &LocalMessage) -> Result<(), SendFailure>;

    /// Tears the connection down. Best-effort; errors are for logging only.
    async fn close(&mut self) -> SyncResult<()>;
}

// =============================================================================
// Cloud Session
// =============================================================================

/// One authenticated connection plus the identity it was created for.
pub struct CloudSession {
    connection: Box<dyn CloudConnection>,
    device_id: String,
}

impl CloudSession {
    /// Authenticates against the cloud endpoint and returns a ready session.
    ///
    /// Fails fast on an empty token without contacting the network. On
    /// success the full twin snapshot has already been fed through
    /// `config_sync`, so the local side never observes a session that is
    /// ahead of its configuration.
    pub async fn authenticate(
        connector: &dyn CloudConnector,
        credentials: &dyn CredentialSource,
        device_id: &str,
        desired_tx: mpsc::Sender<TwinNotification>,
        config_sync: &Mutex<ConfigSync>,
    ) -> SyncResult<CloudSession> {
        let token = credentials.sas_token().await?;
        if token.is_empty() {
            warn!("credential source returned an empty token, skipping connection attempt");
            return Err(SyncError::EmptyToken);
        }

        let mut connection = connector.connect(device_id, &token, desired_tx).await?;

        // Catch up on configuration before anyone can use the session.
        match connection.get_twin().await {
            Ok(snapshot) => {
                config_sync.lock().await.apply_notification(snapshot).await;
            }
            Err(e) => {
                let _ = connection.close().await;
                return Err(e);
            }
        }

        info!(device_id = %device_id, "authenticated with cloud endpoint");
        Ok(CloudSession {
            connection,
            device_id: device_id.to_string(),
        })
    }

    /// Uploads one drained batch. See [`CloudConnection::send_batch`].
    pub async fn send_batch(&mut self, batch: &[PendingMessage]) -> Result<(), SendFailure> {
        self.connection.send_batch(batch).await
    }

    /// Pushes reported configuration properties up to the twin.
    pub async fn report_properties(
        &mut self,
        properties: &LocalMessage,
    ) -> Result<(), SendFailure> {
        self.connection.report_properties(properties).await
    }

    /// Closes the underlying connection. Failures are logged, not returned.
    pub async fn close(mut self) {
        if let Err(e) = self.connection.close().await {
            debug!(error = %e, device_id = %self.device_id, "error closing old session");
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }
}
