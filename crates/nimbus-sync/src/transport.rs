//! # WebSocket Transport
//!
//! WebSocket implementation of the [`CloudConnector`] / [`CloudConnection`]
//! seams. One connection per authenticated session; reconnection is the
//! coordinator's job (it opens a fresh session on the next cycle), so the
//! transport itself never retries.
//!
//! ## Connection Anatomy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      WsCloudConnection                                  │
//! │                                                                         │
//! │   send_batch / get_twin / report_properties                             │
//! │        │                                                                │
//! │        ▼                                                                │
//! │   ┌─────────┐  install oneshot   ┌──────────┐                          │
//! │   │ request │ ─────────────────► │ inflight │  (at most one waiter)    │
//! │   └────┬────┘                    └────▲─────┘                          │
//! │        │ write frame                  │ Ack / Nack / TwinSnapshot       │
//! │        ▼                              │                                 │
//! │   ┌─────────┐                   ┌─────┴──────┐                         │
//! │   │  write  │                   │ reader task│ ──► DesiredUpdate ──►   │
//! │   │  half   │ ◄── Pong reply ── │ (spawned)  │     desired_tx channel  │
//! │   └─────────┘                   └────────────┘                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The callers already serialize on the session slot, so the single
//! `inflight` response slot is never contended in practice; it exists so a
//! late reply to a timed-out request is dropped instead of answering the
//! wrong call.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use nimbus_core::{LocalMessage, PendingMessage, TwinNotification};

use crate::error::{SyncError, SyncResult};
use crate::protocol::{
    AuthPayload, CloudMessage, RejectCode, ReportedUpdatePayload, TelemetryBatchPayload,
};
use crate::session::{CloudConnection, CloudConnector, SendFailure};

/// Type alias for the WebSocket write half.
type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;

/// Type alias for the WebSocket read half.
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

// =============================================================================
// Transport Configuration
// =============================================================================

/// Configuration for the WebSocket connector.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// WebSocket URL of the cloud endpoint.
    pub url: String,

    /// Connection + handshake timeout.
    pub connect_timeout: Duration,

    /// How long to wait for an Ack/Nack/TwinSnapshot reply.
    pub ack_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            url: String::new(),
            connect_timeout: Duration::from_secs(10),
            ack_timeout: Duration::from_secs(30),
        }
    }
}

// =============================================================================
// Connector
// =============================================================================

/// Opens authenticated WebSocket connections to the cloud endpoint.
pub struct WsCloudConnector {
    config: TransportConfig,
}

impl WsCloudConnector {
    pub fn new(config: TransportConfig) -> Self {
        WsCloudConnector { config }
    }
}

#[async_trait]
impl CloudConnector for WsCloudConnector {
    async fn connect(
        &self,
        device_id: &str,
        token: &str,
        desired_tx: mpsc::Sender<TwinNotification>,
    ) -> SyncResult<Box<dyn CloudConnection>> {
        // Validate the URL up front so a config typo fails as InvalidConfig
        // instead of a confusing handshake error.
        url::Url::parse(&self.config.url)?;

        let connect_future = connect_async(&self.config.url);
        let (ws_stream, response) = match timeout(self.config.connect_timeout, connect_future)
            .await
        {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => return Err(SyncError::from(e)),
            Err(_) => return Err(SyncError::Timeout(self.config.connect_timeout.as_secs())),
        };
        debug!(status = ?response.status(), "WebSocket handshake complete");

        let (mut write, mut read) = ws_stream.split();

        // Credentials go out first; nothing else is valid before AuthAck.
        let auth = CloudMessage::Auth(AuthPayload::new(device_id, token));
        write.send(WsMessage::Text(auth.to_json()?.into())).await?;

        await_auth_ack(&mut write, &mut read, self.config.connect_timeout).await?;
        info!(url = %self.config.url, "cloud endpoint accepted credentials");

        let write = Arc::new(Mutex::new(write));
        let inflight: InflightSlot = Arc::new(Mutex::new(None));
        let reader = tokio::spawn(reader_loop(
            read,
            write.clone(),
            inflight.clone(),
            desired_tx,
        ));

        Ok(Box::new(WsCloudConnection {
            write,
            inflight,
            reader,
            seq: 0,
            ack_timeout: self.config.ack_timeout,
            device_id: device_id.to_string(),
        }))
    }
}

/// Waits for the endpoint's verdict on the Auth frame.
async fn await_auth_ack(
    write: &mut WsSink,
    read: &mut WsSource,
    deadline: Duration,
) -> SyncResult<()> {
    let wait = async {
        while let Some(result) = read.next().await {
            match result? {
                WsMessage::Text(text) => match CloudMessage::from_json(&text) {
                    Ok(CloudMessage::AuthAck) => return Ok(()),
                    Ok(CloudMessage::AuthReject { reason }) => {
                        return Err(SyncError::AuthFailed(reason));
                    }
                    Ok(other) => {
                        warn!(msg_type = %other.type_name(), "unexpected message during handshake");
                    }
                    Err(e) => {
                        warn!(error = %e, "unparseable message during handshake");
                    }
                },
                WsMessage::Ping(data) => {
                    write.send(WsMessage::Pong(data)).await?;
                }
                WsMessage::Close(frame) => {
                    debug!(?frame, "endpoint closed during handshake");
                    return Err(SyncError::Disconnected);
                }
                _ => {}
            }
        }
        Err(SyncError::Disconnected)
    };

    match timeout(deadline, wait).await {
        Ok(result) => result,
        Err(_) => Err(SyncError::Timeout(deadline.as_secs())),
    }
}

// =============================================================================
// Connection
// =============================================================================

/// At most one request waits for a reply at a time.
type InflightSlot = Arc<Mutex<Option<oneshot::Sender<CloudMessage>>>>;

/// One live, authenticated WebSocket connection.
pub struct WsCloudConnection {
    write: Arc<Mutex<WsSink>>,
    inflight: InflightSlot,
    reader: JoinHandle<()>,
    seq: u64,
    ack_timeout: Duration,
    device_id: String,
}

impl WsCloudConnection {
    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    /// Sends one frame and waits for the routed reply.
    async fn request(&mut self, message: CloudMessage) -> SyncResult<CloudMessage> {
        let (reply_tx, reply_rx) = oneshot::channel();
        *self.inflight.lock().await = Some(reply_tx);

        let json = message.to_json()?;
        debug!(msg_type = %message.type_name(), "sending cloud message");
        {
            let mut writer = self.write.lock().await;
            if let Err(e) = writer.send(WsMessage::Text(json.into())).await {
                *self.inflight.lock().await = None;
                return Err(SyncError::from(e));
            }
        }

        match timeout(self.ack_timeout, reply_rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => {
                // Reader task dropped the sender: the connection died.
                *self.inflight.lock().await = None;
                Err(SyncError::Disconnected)
            }
            Err(_) => {
                *self.inflight.lock().await = None;
                Err(SyncError::Timeout(self.ack_timeout.as_secs()))
            }
        }
    }

    /// Maps a protocol reply into the send outcome the coordinator acts on.
    fn interpret_reply(reply: CloudMessage, expected_seq: u64) -> Result<(), SendFailure> {
        match reply {
            CloudMessage::Ack { batch_seq } if batch_seq == expected_seq => Ok(()),
            CloudMessage::Ack { batch_seq } => Err(SendFailure::Transient(format!(
                "ack for unexpected batch {batch_seq}, expected {expected_seq}"
            ))),
            CloudMessage::Nack { code, message, .. } => match code {
                RejectCode::Unauthorized => Err(SendFailure::AuthExpired),
                _ => Err(SendFailure::Transient(message)),
            },
            other => Err(SendFailure::Transient(format!(
                "unexpected reply: {}",
                other.type_name()
            ))),
        }
    }
}

#[async_trait]
impl CloudConnection for WsCloudConnection {
    async fn send_batch(&mut self, batch: &[PendingMessage]) -> Result<(), SendFailure> {
        let seq = self.next_seq();
        let payload = TelemetryBatchPayload {
            device_id: self.device_id.clone(),
            batch_seq: seq,
            messages: batch.iter().map(|m| m.body.clone()).collect(),
        };

        let reply = self
            .request(CloudMessage::TelemetryBatch(payload))
            .await
            .map_err(|e| SendFailure::Transient(e.to_string()))?;
        Self::interpret_reply(reply, seq)
    }

    async fn get_twin(&mut self) -> SyncResult<TwinNotification> {
        match self.request(CloudMessage::TwinRequest).await? {
            CloudMessage::TwinSnapshot(snapshot) => Ok(snapshot),
            other => {
                warn!(msg_type = %other.type_name(), "unexpected reply to twin request");
                Err(SyncError::DeserializationFailed(format!(
                    "expected twin snapshot, got {}",
                    other.type_name()
                )))
            }
        }
    }

    async fn report_properties(&mut self, properties: &LocalMessage) -> Result<(), SendFailure> {
        let seq = self.next_seq();
        let payload = ReportedUpdatePayload {
            batch_seq: seq,
            properties: properties
                .values()
                .map(|(key, value)| (key.to_string(), value.to_json()))
                .collect(),
        };

        let reply = self
            .request(CloudMessage::ReportedUpdate(payload))
            .await
            .map_err(|e| SendFailure::Transient(e.to_string()))?;
        Self::interpret_reply(reply, seq)
    }

    async fn close(&mut self) -> SyncResult<()> {
        {
            let mut writer = self.write.lock().await;
            let _ = writer.send(WsMessage::Close(None)).await;
        }
        self.reader.abort();
        Ok(())
    }
}

impl Drop for WsCloudConnection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

// =============================================================================
// Reader Task
// =============================================================================

/// Routes inbound frames: replies to the inflight slot, pushed configuration
/// to the desired-update channel, pings back out as pongs.
async fn reader_loop(
    mut read: WsSource,
    write: Arc<Mutex<WsSink>>,
    inflight: InflightSlot,
    desired_tx: mpsc::Sender<TwinNotification>,
) {
    while let Some(result) = read.next().await {
        match result {
            Ok(WsMessage::Text(text)) => {
                let message = match CloudMessage::from_json(&text) {
                    Ok(message) => message,
                    Err(e) => {
                        warn!(error = %e, "failed to parse cloud message");
                        continue;
                    }
                };
                match message {
                    CloudMessage::DesiredUpdate(notification) => {
                        if desired_tx.send(notification).await.is_err() {
                            debug!("desired-update receiver dropped, stopping reader");
                            return;
                        }
                    }
                    reply @ (CloudMessage::Ack { .. }
                    | CloudMessage::Nack { .. }
                    | CloudMessage::TwinSnapshot(_)) => {
                        match inflight.lock().await.take() {
                            Some(waiter) => {
                                let _ = waiter.send(reply);
                            }
                            None => {
                                debug!(msg_type = %reply.type_name(), "reply with no waiter, dropping");
                            }
                        }
                    }
                    other => {
                        warn!(msg_type = %other.type_name(), "unexpected inbound message");
                    }
                }
            }
            Ok(WsMessage::Ping(data)) => {
                let mut writer = write.lock().await;
                if writer.send(WsMessage::Pong(data)).await.is_err() {
                    return;
                }
            }
            Ok(WsMessage::Close(frame)) => {
                info!(?frame, "cloud endpoint closed the connection");
                break;
            }
            Ok(WsMessage::Pong(_)) | Ok(WsMessage::Binary(_)) | Ok(WsMessage::Frame(_)) => {}
            Err(e) => {
                warn!(error = %e, "WebSocket read error");
                break;
            }
        }
    }

    // Wake any in-progress request so it fails fast instead of waiting out
    // the ack timeout against a dead socket.
    inflight.lock().await.take();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_config_default() {
        let config = TransportConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.ack_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_nack_unauthorized_maps_to_auth_expired() {
        let reply = CloudMessage::Nack {
            batch_seq: 1,
            code: RejectCode::Unauthorized,
            message: "token expired".into(),
        };
        assert!(matches!(
            WsCloudConnection::interpret_reply(reply, 1),
            Err(SendFailure::AuthExpired)
        ));
    }

    #[test]
    fn test_nack_throttled_is_transient() {
        let reply = CloudMessage::Nack {
            batch_seq: 2,
            code: RejectCode::Throttled,
            message: "slow down".into(),
        };
        assert!(matches!(
            WsCloudConnection::interpret_reply(reply, 2),
            Err(SendFailure::Transient(_))
        ));
    }

    #[test]
    fn test_ack_with_wrong_seq_is_transient() {
        let reply = CloudMessage::Ack { batch_seq: 9 };
        assert!(matches!(
            WsCloudConnection::interpret_reply(reply, 3),
            Err(SendFailure::Transient(_))
        ));
    }
}
