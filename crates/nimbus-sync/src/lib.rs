//! # nimbus-sync: Cloud Sync Engine for Nimbus Station
//!
//! This crate provides the cloud synchronization layer for the station
//! daemon: telemetry upload with a bounded queue, token-based session
//! authentication, and bidirectional twin configuration flow down to the
//! local bridge.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Sync Engine Architecture                            │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                 SendCoordinator (Orchestrator)                   │  │
//! │  │                                                                  │  │
//! │  │  Owns the single Mutex<Option<CloudSession>> slot               │  │
//! │  │  Telemetry path: try_lock, busy ⇒ skip this tick                │  │
//! │  │  Report path: bounded 5s wait, timeout ⇒ error                  │  │
//! │  │  Reauthenticate-and-resend exactly once on AuthExpired          │  │
//! │  └───────┬──────────────────┬──────────────────────┬────────────────┘  │
//! │          ▼                  ▼                      ▼                    │
//! │  ┌──────────────┐   ┌──────────────┐   ┌─────────────────────────┐    │
//! │  │TelemetryQueue│   │ CloudSession │   │      ConfigSync         │    │
//! │  │              │   │              │   │                         │    │
//! │  │ FIFO, cap 10 │   │ One auth'd   │   │ $version gate, scalar   │    │
//! │  │ new msg drops│   │ connection   │   │ filter, forwards to     │    │
//! │  │ batch requeue│   │ per session  │   │ the local bridge        │    │
//! │  └──────────────┘   └──────┬───────┘   └───────────┬─────────────┘    │
//! │                            ▼                       ▼                    │
//! │                    ┌──────────────┐       ┌─────────────────┐          │
//! │                    │ WsConnector  │       │   LocalBridge   │          │
//! │                    │              │       │                 │          │
//! │                    │ tungstenite  │       │ UDS, JSON lines │          │
//! │                    │ JSON frames  │       │ fixed 10s retry │          │
//! │                    └──────────────┘       └─────────────────┘          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`bridge`] - Unix socket channel to the foreground process
//! - [`config`] - Station configuration (TOML file + `NIMBUS_*` env)
//! - [`config_sync`] - Twin notification version gate and relay
//! - [`coordinator`] - Single-flight send coordinator
//! - [`credentials`] - Device identity and SAS token source
//! - [`error`] - Sync error types
//! - [`protocol`] - Cloud message types (tagged JSON)
//! - [`queue`] - Bounded telemetry queue
//! - [`session`] - Authenticated cloud session and transport seams
//! - [`transport`] - WebSocket connector

pub mod bridge;
pub mod config;
pub mod config_sync;
pub mod coordinator;
pub mod credentials;
pub mod error;
pub mod protocol;
pub mod queue;
pub mod session;
pub mod transport;

// Re-export the surface the station daemon wires together.
pub use bridge::{BridgeConfig, BridgeHandle, BridgeState, LocalBridge};
pub use config::StationConfig;
pub use coordinator::SendCoordinator;
pub use credentials::{CredentialSource, EnvCredentialSource, StaticCredentials};
pub use error::{SyncError, SyncResult};
pub use queue::{TelemetryQueue, QUEUE_CAPACITY};
pub use session::{CloudConnection, CloudConnector, CloudSession, SendFailure};
pub use transport::{TransportConfig, WsCloudConnector};
