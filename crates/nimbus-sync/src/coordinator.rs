//! # Send Coordinator
//!
//! Owns the single cloud session slot and enforces the single-flight rule:
//! at most one send cycle runs at a time across every caller.
//!
//! ## Lock Acquisition Policies
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Session Slot Access                                  │
//! │                                                                         │
//! │  TELEMETRY PATH (every sample tick)                                    │
//! │  ──────────────────────────────────                                    │
//! │  try_lock, zero wait. Busy means another cycle is in flight; this      │
//! │  tick's send is SKIPPED entirely (the sample is already queued and     │
//! │  goes out with the next cycle).                                        │
//! │                                                                         │
//! │  CONFIGURATION-REPORT PATH (local edit pushed upward)                  │
//! │  ─────────────────────────────────────────────────────                 │
//! │  lock with a bounded wait (default 5s). Timeout surfaces an error     │
//! │  to the caller; the report is not retried.                             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Send Cycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  1. no session?  authenticate; failure returns, queue untouched        │
//! │  2. drain the queue into an ordered batch; empty batch is a no-op      │
//! │  3. submit the batch as a unit                                          │
//! │  4. AuthExpired: close, reauthenticate, resubmit ONCE. A second        │
//! │     failure (any kind) re-enqueues the batch and ends the cycle;       │
//! │     there is never a third attempt.                                     │
//! │  5. Transient failure: re-enqueue the batch at the front, discard      │
//! │     the session, retry at the next scheduled cycle                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A missing device identity at startup disables every cloud operation for
//! the process lifetime; each call becomes a logged no-op.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use nimbus_core::{LocalMessage, PendingMessage, TelemetryPayload, TelemetryReading};

use crate::bridge::BridgeHandle;
use crate::config_sync::ConfigSync;
use crate::credentials::CredentialSource;
use crate::error::{SyncError, SyncResult};
use crate::queue::TelemetryQueue;
use crate::session::{CloudConnector, CloudSession, SendFailure};

/// Coordinates queueing, session lifecycle, and uploads.
pub struct SendCoordinator {
    /// Device identity, read once at startup. `None` disables cloud ops.
    device_id: Option<String>,

    connector: Arc<dyn CloudConnector>,
    credentials: Arc<dyn CredentialSource>,

    /// The single mutable session slot. Every path that touches the
    /// session does so through this lock.
    session: Mutex<Option<CloudSession>>,

    queue: TelemetryQueue,
    config_sync: Arc<Mutex<ConfigSync>>,

    /// Handed to every new connection so pushed desired-updates reach the
    /// pump task below.
    desired_tx: mpsc::Sender<nimbus_core::TwinNotification>,

    report_lock_timeout: Duration,
}

impl SendCoordinator {
    /// Creates the coordinator and resolves the device identity once.
    ///
    /// Identity resolution failure is not an error: the coordinator still
    /// works, but every cloud operation becomes a logged no-op.
    pub async fn new(
        connector: Arc<dyn CloudConnector>,
        credentials: Arc<dyn CredentialSource>,
        bridge: BridgeHandle,
        report_lock_timeout: Duration,
    ) -> Self {
        let device_id = match credentials.device_id().await {
            Ok(id) => {
                info!(device_id = %id, "device identity resolved");
                Some(id)
            }
            Err(e) => {
                warn!(error = %e, "no device identity, cloud operations disabled");
                None
            }
        };

        let config_sync = Arc::new(Mutex::new(ConfigSync::new(bridge)));

        // Desired-update pump: notifications pushed by any live connection
        // are applied strictly one at a time.
        let (desired_tx, mut desired_rx) = mpsc::channel(32);
        let pump_sync = config_sync.clone();
        tokio::spawn(async move {
            while let Some(notification) = desired_rx.recv().await {
                pump_sync.lock().await.apply_notification(notification).await;
            }
        });

        SendCoordinator {
            device_id,
            connector,
            credentials,
            session: Mutex::new(None),
            queue: TelemetryQueue::new(),
            config_sync,
            desired_tx,
            report_lock_timeout,
        }
    }

    /// True when a device identity was available at startup.
    pub fn has_identity(&self) -> bool {
        self.device_id.is_some()
    }

    // =========================================================================
    // Telemetry Path
    // =========================================================================

    /// Queues one sensor reading and, if no cycle is in flight, runs a send
    /// cycle for everything pending.
    ///
    /// Never fails the caller for cloud trouble: cycle failures are logged
    /// and retried at the next tick. Only an invalid reading is an error.
    pub async fn log_telemetry(&self, reading: TelemetryReading) -> SyncResult<()> {
        let Some(device_id) = self.device_id.as_deref() else {
            debug!("no device identity, skipping telemetry");
            return Ok(());
        };

        let payload = TelemetryPayload::new(reading, device_id, Utc::now())?;
        let message = PendingMessage::from_payload(&payload)?;
        if let Err(SyncError::QueueFull) = self.queue.enqueue(message).await {
            warn!("telemetry queue full, sample dropped");
        }

        // Zero-wait acquisition: a busy slot means another cycle is already
        // draining the queue, and this sample rides along with it.
        match self.session.try_lock() {
            Ok(mut slot) => {
                if let Err(e) = self.run_send_cycle(device_id, &mut slot).await {
                    warn!(error = %e, "send cycle failed, retrying at next tick");
                }
            }
            Err(_) => {
                debug!("already communicating with cloud, skipping send");
            }
        }
        Ok(())
    }

    // =========================================================================
    // Configuration-Report Path
    // =========================================================================

    /// Pushes locally edited configuration values up to the device twin.
    ///
    /// Waits for the session slot up to the configured bound; a timeout is
    /// surfaced to the caller and the report is not retried.
    pub async fn report_config(&self, properties: &LocalMessage) -> SyncResult<()> {
        let Some(device_id) = self.device_id.as_deref() else {
            debug!("no device identity, skipping configuration report");
            return Ok(());
        };
        if properties.values().next().is_none() {
            debug!("no reportable values, skipping configuration report");
            return Ok(());
        }

        let mut slot = timeout(self.report_lock_timeout, self.session.lock())
            .await
            .map_err(|_| SyncError::LockTimeout(self.report_lock_timeout.as_secs()))?;

        let mut session = match slot.take() {
            Some(session) => session,
            None => self.open_session(device_id).await?,
        };

        match session.report_properties(properties).await {
            Ok(()) => {
                debug!(keys = properties.len(), "reported configuration accepted");
                *slot = Some(session);
                Ok(())
            }
            Err(SendFailure::AuthExpired) => {
                info!("session authorization expired during report, reauthenticating");
                session.close().await;
                let mut fresh = self.open_session(device_id).await?;
                match fresh.report_properties(properties).await {
                    Ok(()) => {
                        *slot = Some(fresh);
                        Ok(())
                    }
                    Err(second) => {
                        // One retry only.
                        fresh.close().await;
                        Err(second.into())
                    }
                }
            }
            Err(SendFailure::Transient(reason)) => {
                session.close().await;
                Err(SyncError::SendFailed(reason))
            }
        }
    }

    // =========================================================================
    // Send Cycle
    // =========================================================================

    /// Runs one send cycle. The caller holds the session slot.
    async fn run_send_cycle(
        &self,
        device_id: &str,
        slot: &mut Option<CloudSession>,
    ) -> SyncResult<()> {
        // Step 1: a session must exist before the queue is touched, so an
        // authentication failure leaves every message in place.
        let mut session = match slot.take() {
            Some(session) => session,
            None => self.open_session(device_id).await?,
        };

        // Step 2: drain everything pending, oldest first.
        let batch = self.queue.drain_all().await;
        if batch.is_empty() {
            *slot = Some(session);
            return Ok(());
        }

        // Step 3: the batch goes out as a unit.
        match session.send_batch(&batch).await {
            Ok(()) => {
                debug!(count = batch.len(), "telemetry batch accepted");
                *slot = Some(session);
                Ok(())
            }

            // Step 4: reauthenticate and resubmit exactly once.
            Err(SendFailure::AuthExpired) => {
                info!("session authorization expired, reauthenticating");
                session.close().await;

                let mut fresh = match self.open_session(device_id).await {
                    Ok(fresh) => fresh,
                    Err(e) => {
                        self.queue.requeue_front(batch).await;
                        return Err(e);
                    }
                };

                match fresh.send_batch(&batch).await {
                    Ok(()) => {
                        debug!(count = batch.len(), "telemetry batch accepted after reauth");
                        *slot = Some(fresh);
                        Ok(())
                    }
                    Err(second) => {
                        // A second failure of any kind ends the cycle; there
                        // is never a third attempt.
                        fresh.close().await;
                        self.queue.requeue_front(batch).await;
                        Err(second.into())
                    }
                }
            }

            // Step 5: re-enqueue and retry at the next scheduled cycle. The
            // session is discarded; a fresh one is opened next cycle.
            Err(SendFailure::Transient(reason)) => {
                session.close().await;
                self.queue.requeue_front(batch).await;
                Err(SyncError::SendFailed(reason))
            }
        }
    }

    /// Opens and authenticates a new session.
    async fn open_session(&self, device_id: &str) -> SyncResult<CloudSession> {
        CloudSession::authenticate(
            self.connector.as_ref(),
            self.credentials.as_ref(),
            device_id,
            self.desired_tx.clone(),
            &self.config_sync,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use nimbus_core::TwinNotification;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;
    use tokio::sync::Notify;

    use crate::credentials::StaticCredentials;
    use crate::session::CloudConnection;

    // =========================================================================
    // Scripted Mock Transport
    // =========================================================================

    #[derive(Clone, Copy)]
    enum Outcome {
        Accept,
        AuthExpired,
        Transient,
    }

    #[derive(Default)]
    struct MockState {
        /// Scripted outcomes, popped per send attempt. Empty means accept.
        outcomes: StdMutex<VecDeque<Outcome>>,

        /// Message bodies recorded per send attempt.
        batches: StdMutex<Vec<Vec<String>>>,

        connects: AtomicUsize,
        send_attempts: AtomicUsize,

        /// When set, every send blocks until the gate is notified.
        gate: StdMutex<Option<Arc<Notify>>>,

        /// Twin snapshot returned on authentication.
        twin: StdMutex<Option<TwinNotification>>,
    }

    impl MockState {
        fn script(outcomes: impl IntoIterator<Item = Outcome>) -> Arc<Self> {
            let state = MockState::default();
            *state.outcomes.lock().unwrap() = outcomes.into_iter().collect();
            Arc::new(state)
        }

        fn next_outcome(&self) -> Outcome {
            self.outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Outcome::Accept)
        }

        async fn wait_at_gate(&self) {
            let gate = self.gate.lock().unwrap().clone();
            if let Some(gate) = gate {
                gate.notified().await;
            }
        }
    }

    struct MockConnector {
        state: Arc<MockState>,
    }

    #[async_trait]
    impl CloudConnector for MockConnector {
        async fn connect(
            &self,
            _device_id: &str,
            _token: &str,
            _desired_tx: mpsc::Sender<TwinNotification>,
        ) -> SyncResult<Box<dyn CloudConnection>> {
            self.state.connects.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(MockConnection {
                state: self.state.clone(),
            }))
        }
    }

    struct MockConnection {
        state: Arc<MockState>,
    }

    #[async_trait]
    impl CloudConnection for MockConnection {
        async fn send_batch(&mut self, batch: &[PendingMessage]) -> Result<(), SendFailure> {
            self.state.send_attempts.fetch_add(1, Ordering::SeqCst);
            self.state
                .batches
                .lock()
                .unwrap()
                .push(batch.iter().map(|m| m.body.clone()).collect());
            self.state.wait_at_gate().await;
            match self.state.next_outcome() {
                Outcome::Accept => Ok(()),
                Outcome::AuthExpired => Err(SendFailure::AuthExpired),
                Outcome::Transient => Err(SendFailure::Transient("connection reset".into())),
            }
        }

        async fn get_twin(&mut self) -> SyncResult<TwinNotification> {
            Ok(self
                .state
                .twin
                .lock()
                .unwrap()
                .clone()
                .unwrap_or_default())
        }

        async fn report_properties(
            &mut self,
            _properties: &LocalMessage,
        ) -> Result<(), SendFailure> {
            self.state.send_attempts.fetch_add(1, Ordering::SeqCst);
            match self.state.next_outcome() {
                Outcome::Accept => Ok(()),
                Outcome::AuthExpired => Err(SendFailure::AuthExpired),
                Outcome::Transient => Err(SendFailure::Transient("connection reset".into())),
            }
        }

        async fn close(&mut self) -> SyncResult<()> {
            Ok(())
        }
    }

    // =========================================================================
    // Harness
    // =========================================================================

    fn reading(temperature_c: f64) -> TelemetryReading {
        TelemetryReading {
            temperature_c,
            humidity_pct: 48.0,
            pressure_pa: 101_325.0,
        }
    }

    /// Extracts the temperature of each message for order assertions.
    fn temperatures(batch: &[PendingMessage]) -> Vec<f64> {
        batch
            .iter()
            .map(|m| {
                let value: serde_json::Value = serde_json::from_str(&m.body).unwrap();
                value["currentTemperature"].as_f64().unwrap()
            })
            .collect()
    }

    async fn coordinator(state: Arc<MockState>) -> SendCoordinator {
        let (bridge, _bridge_rx) = BridgeHandle::detached(16);
        SendCoordinator::new(
            Arc::new(MockConnector { state }),
            Arc::new(StaticCredentials::new("station-01", "token")),
            bridge,
            Duration::from_secs(5),
        )
        .await
    }

    // =========================================================================
    // Properties
    // =========================================================================

    #[tokio::test(flavor = "multi_thread")]
    async fn test_at_most_one_send_cycle_in_flight() {
        let state = MockState::script([]);
        let gate = Arc::new(Notify::new());
        *state.gate.lock().unwrap() = Some(gate.clone());

        let coord = Arc::new(coordinator(state.clone()).await);

        let first = {
            let coord = coord.clone();
            tokio::spawn(async move { coord.log_telemetry(reading(20.0)).await })
        };

        // Wait until the first cycle is inside send_batch, parked at the gate.
        while state.send_attempts.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        // The concurrent attempt must skip, not wait: its sample stays queued
        // and no second send starts.
        coord.log_telemetry(reading(21.0)).await.unwrap();
        assert_eq!(state.send_attempts.load(Ordering::SeqCst), 1);
        assert_eq!(coord.queue.len().await, 1);

        gate.notify_one();
        first.await.unwrap().unwrap();
        assert_eq!(state.send_attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_once_never_a_third_attempt() {
        let state = MockState::script([Outcome::AuthExpired, Outcome::AuthExpired]);
        let coord = coordinator(state.clone()).await;

        // The cycle fails internally and is logged; the call itself succeeds.
        coord.log_telemetry(reading(20.0)).await.unwrap();

        // First attempt + exactly one resend, then the cycle gives up.
        assert_eq!(state.send_attempts.load(Ordering::SeqCst), 2);
        // Initial session + one reauthentication.
        assert_eq!(state.connects.load(Ordering::SeqCst), 2);
        // The batch went back into the queue.
        assert_eq!(coord.queue.len().await, 1);
        // The slot was cleared; no stale session survives the failed cycle.
        assert!(coord.session.try_lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reauth_then_successful_resend() {
        let state = MockState::script([Outcome::AuthExpired, Outcome::Accept]);
        let coord = coordinator(state.clone()).await;

        coord.log_telemetry(reading(20.0)).await.unwrap();

        assert_eq!(state.send_attempts.load(Ordering::SeqCst), 2);
        assert_eq!(state.connects.load(Ordering::SeqCst), 2);
        assert!(coord.queue.is_empty().await);
        // Both attempts carried the same batch.
        let batches = state.batches.lock().unwrap();
        assert_eq!(batches[0], batches[1]);
    }

    #[tokio::test]
    async fn test_batch_atomicity_preserves_order_on_failure() {
        let state = MockState::script([Outcome::Transient]);
        let coord = coordinator(state.clone()).await;

        // Three samples queue up while the first cycles are skipped.
        for t in [20.0, 21.0, 22.0] {
            let payload =
                TelemetryPayload::new(reading(t), "station-01", Utc::now()).unwrap();
            coord
                .queue
                .enqueue(PendingMessage::from_payload(&payload).unwrap())
                .await
                .unwrap();
        }

        let mut slot = coord.session.try_lock().unwrap();
        let result = coord.run_send_cycle("station-01", &mut slot).await;
        assert!(matches!(result, Err(SyncError::SendFailed(_))));
        drop(slot);

        // Everything that was drained is back, in its original order.
        let requeued = coord.queue.drain_all().await;
        assert_eq!(temperatures(&requeued), vec![20.0, 21.0, 22.0]);
    }

    #[tokio::test]
    async fn test_end_to_end_send_fail_requeue_then_succeed() {
        // A, B, C accepted; D fails with a non-auth error; next cycle sends D.
        let state = MockState::script([Outcome::Accept, Outcome::Transient, Outcome::Accept]);
        let coord = coordinator(state.clone()).await;

        for t in [20.0, 21.0, 22.0] {
            let payload =
                TelemetryPayload::new(reading(t), "station-01", Utc::now()).unwrap();
            coord
                .queue
                .enqueue(PendingMessage::from_payload(&payload).unwrap())
                .await
                .unwrap();
        }
        {
            let mut slot = coord.session.try_lock().unwrap();
            coord.run_send_cycle("station-01", &mut slot).await.unwrap();
        }
        assert!(coord.queue.is_empty().await);

        // D fails and is re-enqueued as the only pending message.
        coord.log_telemetry(reading(23.0)).await.unwrap();
        assert_eq!(coord.queue.len().await, 1);

        // The next cycle drains exactly [D] and delivers it.
        {
            let mut slot = coord.session.try_lock().unwrap();
            coord.run_send_cycle("station-01", &mut slot).await.unwrap();
        }
        assert!(coord.queue.is_empty().await);
        let batches = state.batches.lock().unwrap();
        let last: Vec<PendingMessage> = batches
            .last()
            .unwrap()
            .iter()
            .map(|body| PendingMessage {
                id: uuid::Uuid::nil(),
                body: body.clone(),
            })
            .collect();
        assert_eq!(temperatures(&last), vec![23.0]);
    }

    #[tokio::test]
    async fn test_empty_token_fails_fast_without_connecting() {
        let state = MockState::script([]);
        let (bridge, _bridge_rx) = BridgeHandle::detached(16);
        let coord = SendCoordinator::new(
            Arc::new(MockConnector {
                state: state.clone(),
            }),
            Arc::new(StaticCredentials::new("station-01", "")),
            bridge,
            Duration::from_secs(5),
        )
        .await;

        coord.log_telemetry(reading(20.0)).await.unwrap();

        // The connector was never consulted, and the queue was not consumed.
        assert_eq!(state.connects.load(Ordering::SeqCst), 0);
        assert_eq!(coord.queue.len().await, 1);
    }

    #[tokio::test]
    async fn test_missing_identity_makes_cloud_ops_no_ops() {
        struct NoIdentity;

        #[async_trait]
        impl CredentialSource for NoIdentity {
            async fn device_id(&self) -> SyncResult<String> {
                Err(SyncError::IdentityUnavailable)
            }
            async fn sas_token(&self) -> SyncResult<String> {
                Ok("token".into())
            }
        }

        let state = MockState::script([]);
        let (bridge, _bridge_rx) = BridgeHandle::detached(16);
        let coord = SendCoordinator::new(
            Arc::new(MockConnector {
                state: state.clone(),
            }),
            Arc::new(NoIdentity),
            bridge,
            Duration::from_secs(5),
        )
        .await;

        assert!(!coord.has_identity());
        coord.log_telemetry(reading(20.0)).await.unwrap();
        coord
            .report_config(&LocalMessage::new().set("ConfigUnit", "C"))
            .await
            .unwrap();

        assert_eq!(state.connects.load(Ordering::SeqCst), 0);
        assert_eq!(state.send_attempts.load(Ordering::SeqCst), 0);
        assert!(coord.queue.is_empty().await);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_report_path_lock_timeout() {
        let state = MockState::script([]);
        let (bridge, _bridge_rx) = BridgeHandle::detached(16);
        let coord = SendCoordinator::new(
            Arc::new(MockConnector { state }),
            Arc::new(StaticCredentials::new("station-01", "token")),
            bridge,
            Duration::from_millis(50),
        )
        .await;

        // Hold the session slot so the report path has to wait it out.
        let slot = coord.session.lock().await;
        let result = coord
            .report_config(&LocalMessage::new().set("ConfigUnit", "C"))
            .await;
        drop(slot);

        assert!(matches!(result, Err(SyncError::LockTimeout(_))));
    }

    #[tokio::test]
    async fn test_twin_snapshot_forwarded_after_authentication() {
        let state = MockState::script([]);
        *state.twin.lock().unwrap() = Some(
            TwinNotification::from_pairs([("ConfigUnit", serde_json::json!("C"))])
                .with_version(1),
        );

        let (bridge, mut bridge_rx) = BridgeHandle::detached(16);
        let coord = SendCoordinator::new(
            Arc::new(MockConnector {
                state: state.clone(),
            }),
            Arc::new(StaticCredentials::new("station-01", "token")),
            bridge,
            Duration::from_secs(5),
        )
        .await;

        coord.log_telemetry(reading(20.0)).await.unwrap();

        // Authentication pushed the full snapshot to the local bridge.
        let forwarded = bridge_rx.recv().await.unwrap();
        assert_eq!(forwarded.get("ConfigUnit"), Some(&Some("C".into())));
    }
}
