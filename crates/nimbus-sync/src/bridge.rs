//! # Local Bridge
//!
//! Same-device channel to the foreground process, carried over a Unix
//! domain socket with newline-delimited JSON [`LocalMessage`]s.
//!
//! ## Connection Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Bridge Connection States                            │
//! │                                                                         │
//! │  ┌────────────┐    connect()    ┌────────────┐    ok    ┌───────────┐  │
//! │  │Disconnected│ ──────────────► │ Connecting │ ───────► │ Connected │  │
//! │  └────────────┘                 └─────┬──────┘          └─────┬─────┘  │
//! │        ▲                              │ failure               │ EOF /  │
//! │        │                              ▼                       │ error  │
//! │        │                       ┌────────────┐                 │        │
//! │        └────── shutdown ────── │  Backoff   │ ◄───────────────┘        │
//! │                                │ (fixed 10s)│                          │
//! │                                └────────────┘                          │
//! │                                                                         │
//! │  Messages sent while not Connected are DROPPED with a log line,        │
//! │  never queued. Reconnection is transparent to callers.                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use nimbus_core::LocalMessage;

// =============================================================================
// Bridge State
// =============================================================================

/// Connection state of the local bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    /// Not connected.
    Disconnected,
    /// Attempting to connect.
    Connecting,
    /// Connected and ready.
    Connected,
    /// Waiting out the fixed backoff before reconnecting.
    Backoff,
}

impl std::fmt::Display for BridgeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BridgeState::Disconnected => write!(f, "disconnected"),
            BridgeState::Connecting => write!(f, "connecting"),
            BridgeState::Connected => write!(f, "connected"),
            BridgeState::Backoff => write!(f, "backoff"),
        }
    }
}

// =============================================================================
// Bridge Configuration
// =============================================================================

/// Configuration for the local bridge connection.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Path of the Unix domain socket the foreground process listens on.
    pub socket_path: PathBuf,

    /// Fixed delay between reconnection attempts.
    pub reconnect_backoff: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        BridgeConfig {
            socket_path: PathBuf::from("/run/nimbus/bridge.sock"),
            reconnect_backoff: Duration::from_secs(10),
        }
    }
}

// =============================================================================
// Bridge Handle
// =============================================================================

/// Handle for sending messages over the bridge from other components.
#[derive(Clone)]
pub struct BridgeHandle {
    /// Sender for outgoing messages, consumed by the bridge task.
    outgoing_tx: mpsc::Sender<LocalMessage>,

    /// Current connection state, shared with the bridge task.
    state: Arc<RwLock<BridgeState>>,
}

impl BridgeHandle {
    /// Sends a message to the foreground process.
    ///
    /// Connection loss is transparent to callers: while the bridge is down
    /// the message is dropped with a log line rather than queued.
    pub async fn send(&self, message: LocalMessage) {
        if *self.state.read().await != BridgeState::Connected {
            debug!("local bridge not connected, dropping message");
            return;
        }
        if self.outgoing_tx.send(message).await.is_err() {
            debug!("local bridge task stopped, dropping message");
        }
    }

    /// Returns the current connection state.
    pub async fn state(&self) -> BridgeState {
        *self.state.read().await
    }

    /// Creates a handle whose messages land on the returned receiver
    /// instead of a socket, so tests can observe what would have been
    /// forwarded.
    pub(crate) fn detached(capacity: usize) -> (BridgeHandle, mpsc::Receiver<LocalMessage>) {
        let (outgoing_tx, outgoing_rx) = mpsc::channel(capacity);
        let handle = BridgeHandle {
            outgoing_tx,
            state: Arc::new(RwLock::new(BridgeState::Connected)),
        };
        (handle, outgoing_rx)
    }
}

// =============================================================================
// Local Bridge
// =============================================================================

/// Bridge task connecting to the foreground process over a Unix socket.
pub struct LocalBridge {
    config: BridgeConfig,
    state: Arc<RwLock<BridgeState>>,
    outgoing_rx: mpsc::Receiver<LocalMessage>,
    incoming_tx: mpsc::Sender<LocalMessage>,
}

impl LocalBridge {
    /// Spawns the bridge task.
    ///
    /// Returns a handle for sending and a receiver surfacing the messages
    /// the foreground process sends us (value requests and `Config*`
    /// edits).
    pub fn spawn(config: BridgeConfig) -> (BridgeHandle, mpsc::Receiver<LocalMessage>) {
        let (outgoing_tx, outgoing_rx) = mpsc::channel(64);
        let (incoming_tx, incoming_rx) = mpsc::channel(64);
        let state = Arc::new(RwLock::new(BridgeState::Disconnected));

        let bridge = LocalBridge {
            config,
            state: state.clone(),
            outgoing_rx,
            incoming_tx,
        };
        tokio::spawn(bridge.run());

        (BridgeHandle { outgoing_tx, state }, incoming_rx)
    }

    /// Main bridge loop: connect, pump, back off, repeat.
    async fn run(mut self) {
        info!(socket = %self.config.socket_path.display(), "local bridge starting");

        loop {
            *self.state.write().await = BridgeState::Connecting;

            match UnixStream::connect(&self.config.socket_path).await {
                Ok(stream) => {
                    info!("local bridge connected");
                    *self.state.write().await = BridgeState::Connected;
                    self.connection_loop(stream).await;
                    warn!("local bridge connection lost");
                }
                Err(e) => {
                    debug!(error = %e, "local bridge connect failed");
                }
            }

            // Fixed backoff; messages arriving meanwhile are drained and
            // dropped so the channel never backs up against a dead socket.
            *self.state.write().await = BridgeState::Backoff;
            let backoff = tokio::time::sleep(self.config.reconnect_backoff);
            tokio::pin!(backoff);
            loop {
                tokio::select! {
                    _ = &mut backoff => break,
                    Some(_) = self.outgoing_rx.recv() => {
                        debug!("local bridge disconnected, dropping message");
                    }
                }
            }
        }
    }

    /// Pumps one live connection until it drops.
    async fn connection_loop(&mut self, stream: UnixStream) {
        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();

        loop {
            tokio::select! {
                // Outgoing messages from the engine.
                Some(message) = self.outgoing_rx.recv() => {
                    let mut json = match serde_json::to_string(&message) {
                        Ok(json) => json,
                        Err(e) => {
                            warn!(error = %e, "failed to serialize bridge message, dropping");
                            continue;
                        }
                    };
                    json.push('\n');
                    if let Err(e) = write_half.write_all(json.as_bytes()).await {
                        debug!(error = %e, "bridge write failed");
                        return;
                    }
                }

                // Incoming requests/pushes from the foreground process.
                line = lines.next_line() => {
                    match line {
                        Ok(Some(text)) => {
                            match serde_json::from_str::<LocalMessage>(&text) {
                                Ok(message) => {
                                    if self.incoming_tx.send(message).await.is_err() {
                                        warn!("bridge request receiver dropped");
                                        return;
                                    }
                                }
                                Err(e) => {
                                    warn!(error = %e, "malformed bridge message, skipping");
                                }
                            }
                        }
                        Ok(None) => {
                            debug!("bridge peer closed the connection");
                            return;
                        }
                        Err(e) => {
                            debug!(error = %e, "bridge read failed");
                            return;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_detached_handle_delivers_messages() {
        let (handle, mut rx) = BridgeHandle::detached(4);
        handle.send(LocalMessage::new().set("temperature", 21.5)).await;
        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.get("temperature"), Some(&Some(21.5.into())));
    }

    #[tokio::test]
    async fn test_send_dropped_while_disconnected() {
        let (handle, mut rx) = BridgeHandle::detached(4);
        *handle.state.write().await = BridgeState::Disconnected;

        handle.send(LocalMessage::new().set("temperature", 21.5)).await;
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_bridge_state_display() {
        assert_eq!(BridgeState::Connected.to_string(), "connected");
        assert_eq!(BridgeState::Backoff.to_string(), "backoff");
    }
}
