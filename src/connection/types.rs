//! Connection handle and related types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::OnceLock;
use tokio::sync::{mpsc, watch};
use tokio::task::AbortHandle;

use crate::error::BridgeError;
use crate::transport::Payload;

/// Process-unique connection identifier. Never reused once issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a registered connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Registered = 0,
    Reading = 1,
    Closing = 2,
    Removed = 3,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Registered,
            1 => Self::Reading,
            2 => Self::Closing,
            _ => Self::Removed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Registered => "registered",
            Self::Reading => "reading",
            Self::Closing => "closing",
            Self::Removed => "removed",
        }
    }
}

/// Item queued for a connection's writer
#[derive(Debug)]
pub enum Outgoing {
    Payload(Payload),
    /// Flush what is queued ahead of this, then close the sink
    Close,
}

/// Handle for a single live connection
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub connected_at: DateTime<Utc>,
    sender: mpsc::Sender<Outgoing>,
    state: AtomicU8,
    /// Inbound messages read so far
    sequence: AtomicU64,
    close_tx: watch::Sender<bool>,
    task: OnceLock<AbortHandle>,
}

impl ConnectionHandle {
    pub fn new(id: ConnectionId, sender: mpsc::Sender<Outgoing>) -> Self {
        let (close_tx, _) = watch::channel(false);
        Self {
            id,
            connected_at: Utc::now(),
            sender,
            state: AtomicU8::new(ConnectionState::Registered as u8),
            sequence: AtomicU64::new(0),
            close_tx,
            task: OnceLock::new(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// True until teardown has begun
    pub fn is_open(&self) -> bool {
        matches!(
            self.state(),
            ConnectionState::Registered | ConnectionState::Reading
        )
    }

    /// Move `from` -> `to` atomically. Returns false if another actor got there first.
    pub(crate) fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Enter `Closing` from any open state. Only the first caller wins.
    pub(crate) fn begin_closing(&self) -> bool {
        self.transition(ConnectionState::Reading, ConnectionState::Closing)
            || self.transition(ConnectionState::Registered, ConnectionState::Closing)
    }

    /// Record one inbound message and return its sequence number (starting at 1)
    pub(crate) fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn messages_received(&self) -> u64 {
        self.sequence.load(Ordering::Relaxed)
    }

    /// Queue a payload for this connection's writer without waiting.
    ///
    /// Sends are serialized through a single queue, so payloads reach the peer
    /// in the order they were submitted. A full queue means the peer is not
    /// keeping up: the connection is asked to close and the payload is refused,
    /// so one stalled peer never holds up the caller.
    pub fn send(&self, payload: Payload) -> Result<(), BridgeError> {
        if !self.is_open() {
            return Err(BridgeError::TransportClosed);
        }

        match self.sender.try_send(Outgoing::Payload(payload)) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(
                    connection_id = %self.id,
                    queued = self.sender.max_capacity(),
                    "Outbound queue full, closing slow connection"
                );
                self.request_close();
                Err(BridgeError::SlowConsumer(self.id))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(BridgeError::TransportClosed),
        }
    }

    /// Ask the connection task to tear this connection down.
    ///
    /// Teardown itself (registry removal, `Disconnected`) happens on the
    /// connection task, exactly as for a peer-initiated close.
    pub fn request_close(&self) {
        self.close_tx.send_replace(true);
    }

    pub(crate) fn close_requested(&self) -> watch::Receiver<bool> {
        self.close_tx.subscribe()
    }

    /// Remember the task that owns this connection, for forced shutdown
    pub(crate) fn attach_task(&self, task: AbortHandle) {
        let _ = self.task.set(task);
    }

    pub(crate) fn abort_task(&self) {
        if let Some(task) = self.task.get() {
            task.abort();
        }
    }

    pub(crate) fn writer(&self) -> mpsc::Sender<Outgoing> {
        self.sender.clone()
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("connected_at", &self.connected_at)
            .finish()
    }
}
