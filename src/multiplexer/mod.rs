//! Inbound multiplexer: many connection tasks feed one bounded channel that a
//! single application consumer drains.

mod events;

pub use events::{InboundEvent, OutboundCommand};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::error::BridgeError;
use crate::metrics::InboundMetrics;

#[derive(Debug, Default)]
struct MultiplexerCounters {
    connected: AtomicU64,
    disconnected: AtomicU64,
    messages: AtomicU64,
}

/// Snapshot of inbound event counters
#[derive(Debug, Clone, Serialize)]
pub struct MultiplexerStats {
    pub connected: u64,
    pub disconnected: u64,
    pub messages: u64,
    /// Events currently buffered, waiting for the application
    pub buffered: usize,
    pub capacity: usize,
}

/// Producer side, cloned into every connection task
#[derive(Clone)]
pub struct InboundSender {
    tx: mpsc::Sender<InboundEvent>,
    counters: Arc<MultiplexerCounters>,
    capacity: usize,
}

/// Consumer side, owned by the application
pub struct InboundReceiver {
    rx: mpsc::Receiver<InboundEvent>,
}

/// Create the inbound channel with room for `bound` undelivered events.
pub fn channel(bound: usize) -> (InboundSender, InboundReceiver) {
    let capacity = bound.max(1);
    let (tx, rx) = mpsc::channel(capacity);
    (
        InboundSender {
            tx,
            counters: Arc::new(MultiplexerCounters::default()),
            capacity,
        },
        InboundReceiver { rx },
    )
}

impl InboundSender {
    /// Push an event, waiting while the buffer is full.
    ///
    /// Fails only when the consumer has gone away.
    pub async fn emit(&self, event: InboundEvent) -> Result<(), BridgeError> {
        let counter = self.counter_for(&event);
        let kind = event.kind();
        self.tx
            .send(event)
            .await
            .map_err(|_| BridgeError::MultiplexerClosed)?;

        counter.fetch_add(1, Ordering::Relaxed);
        InboundMetrics::record(kind);
        Ok(())
    }

    /// Push without waiting; used on forced teardown where blocking is not allowed.
    /// Returns false if the event could not be buffered.
    pub fn try_emit(&self, event: InboundEvent) -> bool {
        let counter = self.counter_for(&event);
        let kind = event.kind();
        match self.tx.try_send(event) {
            Ok(()) => {
                counter.fetch_add(1, Ordering::Relaxed);
                InboundMetrics::record(kind);
                true
            }
            Err(mpsc::error::TrySendError::Full(ev)) => {
                tracing::warn!(event = ?ev, "Inbound buffer full, event not delivered");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    fn counter_for(&self, event: &InboundEvent) -> &AtomicU64 {
        match event {
            InboundEvent::Connected { .. } => &self.counters.connected,
            InboundEvent::Disconnected { .. } => &self.counters.disconnected,
            InboundEvent::Message { .. } => &self.counters.messages,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Resolves once the consumer has been dropped
    pub async fn closed(&self) {
        self.tx.closed().await
    }

    pub fn stats(&self) -> MultiplexerStats {
        MultiplexerStats {
            connected: self.counters.connected.load(Ordering::Relaxed),
            disconnected: self.counters.disconnected.load(Ordering::Relaxed),
            messages: self.counters.messages.load(Ordering::Relaxed),
            buffered: self.capacity - self.tx.capacity(),
            capacity: self.capacity,
        }
    }
}

impl InboundReceiver {
    /// Next event, `None` once every producer is gone
    pub async fn recv(&mut self) -> Option<InboundEvent> {
        self.rx.recv().await
    }

    /// Adapt into a `Stream` of events
    pub fn into_stream(self) -> ReceiverStream<InboundEvent> {
        ReceiverStream::new(self.rx)
    }
}
