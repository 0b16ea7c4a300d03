//! Bounded stream of service table changes.
//!
//! Publishing never waits: when the queue is full the oldest event is
//! displaced and counted, so a slow consumer cannot stall the loop thread.
//! Each event goes to exactly one receiver.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use cziti_core::{ChangeOperation, ServiceRecord};

use crate::context::IdentityContext;

#[derive(Debug, Clone)]
pub struct ServiceChangeEvent {
    pub operation: ChangeOperation,
    pub service: ServiceRecord,
    pub context: Arc<IdentityContext>,
}

#[derive(Debug)]
pub struct EventChannel {
    tx: async_channel::Sender<ServiceChangeEvent>,
    // Held so the queue stays open while no subscriber is attached.
    rx: async_channel::Receiver<ServiceChangeEvent>,
    dropped: AtomicU64,
}

impl EventChannel {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = async_channel::bounded(capacity.max(1));
        Self {
            tx,
            rx,
            dropped: AtomicU64::new(0),
        }
    }

    pub fn publish(&self, event: ServiceChangeEvent) {
        match self.tx.force_send(event) {
            Ok(None) => {}
            Ok(Some(displaced)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::warn!(
                    operation = %displaced.operation,
                    service_id = %displaced.service.id,
                    dropped,
                    "service event queue full; dropped oldest event",
                );
            }
            Err(err) => {
                tracing::debug!(
                    service_id = %err.into_inner().service.id,
                    "service event queue closed; event discarded",
                );
            }
        }
    }

    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            rx: self.rx.clone(),
        }
    }

    /// Number of events displaced by overflow since creation.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }

    /// Stop accepting events. Receivers drain what is queued, then see `None`.
    pub fn close(&self) {
        self.tx.close();
    }
}

/// Consumer side of the [`EventChannel`].
#[derive(Debug, Clone)]
pub struct EventReceiver {
    rx: async_channel::Receiver<ServiceChangeEvent>,
}

impl EventReceiver {
    pub async fn recv(&self) -> Option<ServiceChangeEvent> {
        self.rx.recv().await.ok()
    }

    /// Block the current thread until an event arrives or the channel closes.
    pub fn recv_blocking(&self) -> Option<ServiceChangeEvent> {
        self.rx.recv_blocking().ok()
    }

    pub fn try_recv(&self) -> Option<ServiceChangeEvent> {
        self.rx.try_recv().ok()
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
