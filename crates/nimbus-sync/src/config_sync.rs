//! # Twin Configuration Sync
//!
//! Receives desired-configuration notifications (the full snapshot after
//! authentication, incremental pushes afterwards) and forwards the accepted
//! pairs to the local bridge.
//!
//! ## Version Acceptance Rule
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                   Monotonic Acceptance                                   │
//! │                                                                         │
//! │  recorded = last accepted $version for this scope (initially none)     │
//! │                                                                         │
//! │  incoming has $version v:                                              │
//! │      accept iff recorded is none OR v >= recorded                      │
//! │      on acceptance: recorded = v                                       │
//! │                                                                         │
//! │  incoming has NO $version:                                             │
//! │      accept only while recorded is none                                │
//! │      (once versioned, always require a version)                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Equal versions are accepted so that the post-authentication snapshot,
//! which repeats the version of the last push, still lands after a
//! reconnect.
//!
//! Unsupported (non-scalar) values are skipped one by one with a warning;
//! they never invalidate the rest of the batch.

use tracing::{debug, info, warn};

use nimbus_core::{LocalMessage, ScalarValue, TwinNotification};

use crate::bridge::BridgeHandle;

/// Key under which the batch version travels in the forwarded LocalMessage.
const VERSION_KEY: &str = "$version";

/// Gates twin notifications by version and relays them to the bridge.
///
/// Owned exclusively by the coordinator; notifications are applied one at a
/// time (the owning mutex is the single-invocation contract).
pub struct ConfigSync {
    bridge: BridgeHandle,
    last_version: Option<i64>,
}

impl ConfigSync {
    pub fn new(bridge: BridgeHandle) -> Self {
        ConfigSync {
            bridge,
            last_version: None,
        }
    }

    /// Applies one notification: version gate, scalar filter, forward.
    pub async fn apply_notification(&mut self, notification: TwinNotification) {
        match (notification.version, self.last_version) {
            (None, Some(recorded)) => {
                info!(
                    recorded_version = recorded,
                    "ignoring unversioned twin notification after versioned history"
                );
                return;
            }
            (Some(incoming), Some(recorded)) if incoming < recorded => {
                info!(
                    incoming_version = incoming,
                    recorded_version = recorded,
                    "ignoring stale twin notification"
                );
                return;
            }
            _ => {}
        }

        let mut message = LocalMessage::new();
        for (key, value) in &notification.properties {
            match ScalarValue::from_json(value) {
                Some(scalar) => message.insert(key.clone(), Some(scalar)),
                None => warn!(key = %key, "twin property has unsupported type, skipping"),
            }
        }

        if let Some(version) = notification.version {
            message.insert(VERSION_KEY, Some(ScalarValue::Int(version)));
            self.last_version = Some(version);
        }

        if message.is_empty() {
            debug!("twin notification had nothing to forward");
            return;
        }

        debug!(
            keys = message.len(),
            version = ?notification.version,
            "forwarding twin configuration to local bridge"
        );
        self.bridge.send(message).await;
    }

    /// Last accepted batch-scope version, if any notification carried one.
    pub fn last_version(&self) -> Option<i64> {
        self.last_version
    }
}
