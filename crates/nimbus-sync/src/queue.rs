//! # Telemetry Queue
//!
//! A bounded, FIFO, thread-safe buffer of not-yet-sent telemetry messages.
//!
//! ## Policy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Queue Behavior                                    │
//! │                                                                         │
//! │  ENQUEUE (capacity 10)                                                 │
//! │  ─────────────────────                                                 │
//! │  • Queue below capacity: message accepted at the back                  │
//! │  • Queue at capacity: the NEW message is dropped and reported          │
//! │    (oldest-first: already-accepted data is never evicted)              │
//! │                                                                         │
//! │  DRAIN                                                                 │
//! │  ─────                                                                 │
//! │  • Atomically removes and returns everything, in order                 │
//! │  • Producers may keep enqueueing while a drained batch is in flight;   │
//! │    those messages belong to the NEXT cycle                             │
//! │                                                                         │
//! │  RE-ENQUEUE (failed batch)                                             │
//! │  ─────────────────────────                                             │
//! │  • The whole batch goes back at the FRONT in its original order,       │
//! │    even past capacity: a message the queue accepted once is not        │
//! │    dropped because a send failed                                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::VecDeque;
use tokio::sync::Mutex;
use tracing::debug;

use nimbus_core::PendingMessage;

use crate::error::{SyncError, SyncResult};

/// Maximum number of pending telemetry messages.
pub const QUEUE_CAPACITY: usize = 10;

/// Bounded FIFO buffer shared between the sampling tick and the send cycle.
#[derive(Default)]
pub struct TelemetryQueue {
    inner: Mutex<VecDeque<PendingMessage>>,
}

impl TelemetryQueue {
    pub fn new() -> Self {
        TelemetryQueue {
            inner: Mutex::new(VecDeque::with_capacity(QUEUE_CAPACITY)),
        }
    }

    /// Appends a message, or reports [`SyncError::QueueFull`] and drops the
    /// new message when the capacity is already reached.
    pub async fn enqueue(&self, message: PendingMessage) -> SyncResult<()> {
        let mut queue = self.inner.lock().await;
        if queue.len() >= QUEUE_CAPACITY {
            debug!(id = %message.id, pending = queue.len(), "queue full, dropping new message");
            return Err(SyncError::QueueFull);
        }
        queue.push_back(message);
        Ok(())
    }

    /// Atomically removes and returns all queued messages in FIFO order.
    pub async fn drain_all(&self) -> Vec<PendingMessage> {
        let mut queue = self.inner.lock().await;
        queue.drain(..).collect()
    }

    /// Puts a failed batch back at the front, preserving its original order.
    ///
    /// May transiently push the queue past capacity; re-accepted data takes
    /// precedence over the bound.
    pub async fn requeue_front(&self, batch: Vec<PendingMessage>) {
        if batch.is_empty() {
            return;
        }
        let mut queue = self.inner.lock().await;
        debug!(count = batch.len(), "re-enqueueing failed batch");
        for message in batch.into_iter().rev() {
            queue.push_front(message);
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn msg(label: &str) -> PendingMessage {
        PendingMessage {
            id: Uuid::new_v4(),
            body: format!(r#"{{"label":"{label}"}}"#),
        }
    }

    #[tokio::test]
    async fn test_bounded_at_capacity() {
        let queue = TelemetryQueue::new();
        for i in 0..QUEUE_CAPACITY {
            queue.enqueue(msg(&i.to_string())).await.unwrap();
        }
        assert_eq!(queue.len().await, 10);

        // The 11th message is dropped and reported; the queue stays at 10.
        let result = queue.enqueue(msg("overflow")).await;
        assert!(matches!(result, Err(SyncError::QueueFull)));
        assert_eq!(queue.len().await, 10);
    }

    #[tokio::test]
    async fn test_drain_preserves_fifo_order() {
        let queue = TelemetryQueue::new();
        for label in ["a", "b", "c"] {
            queue.enqueue(msg(label)).await.unwrap();
        }

        let batch = queue.drain_all().await;
        let labels: Vec<_> = batch.iter().map(|m| m.body.clone()).collect();
        assert!(labels[0].contains("a"));
        assert!(labels[1].contains("b"));
        assert!(labels[2].contains("c"));
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_requeue_front_restores_original_order() {
        let queue = TelemetryQueue::new();
        for label in ["a", "b", "c"] {
            queue.enqueue(msg(label)).await.unwrap();
        }
        let batch = queue.drain_all().await;

        // A producer slipped a new message in while the batch was in flight.
        queue.enqueue(msg("d")).await.unwrap();

        queue.requeue_front(batch).await;
        let drained = queue.drain_all().await;
        let order: Vec<_> = drained.iter().map(|m| m.body.clone()).collect();
        assert!(order[0].contains("a"));
        assert!(order[1].contains("b"));
        assert!(order[2].contains("c"));
        assert!(order[3].contains("d"));
    }

    #[tokio::test]
    async fn test_requeue_may_exceed_capacity() {
        let queue = TelemetryQueue::new();
        for i in 0..QUEUE_CAPACITY {
            queue.enqueue(msg(&i.to_string())).await.unwrap();
        }
        let batch = queue.drain_all().await;
        queue.enqueue(msg("new")).await.unwrap();
        queue.requeue_front(batch).await;

        // 10 re-accepted + 1 new; nothing was evicted.
        assert_eq!(queue.len().await, 11);
    }
}
