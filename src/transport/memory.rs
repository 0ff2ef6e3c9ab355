//! In-process transport backed by tokio channels.
//!
//! [`memory_pair`] returns the bridge-side [`MemoryTransport`] and a
//! [`MemoryPeer`] that plays the remote client.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::TransportError;

use super::{Payload, Transport, TransportSink, TransportSource};

/// Frames travelling from the peer to the bridge
#[derive(Debug)]
enum PeerFrame {
    Data(Payload),
    Fault(TransportError),
}

/// Bridge side of an in-memory connection
pub struct MemoryTransport {
    to_peer: mpsc::Sender<Payload>,
    from_peer: mpsc::Receiver<PeerFrame>,
}

/// Remote side of an in-memory connection
pub struct MemoryPeer {
    to_bridge: Option<mpsc::Sender<PeerFrame>>,
    from_bridge: mpsc::Receiver<Payload>,
}

/// Create a connected pair. `capacity` bounds each direction.
pub fn memory_pair(capacity: usize) -> (MemoryTransport, MemoryPeer) {
    let (to_peer, from_bridge) = mpsc::channel(capacity);
    let (to_bridge, from_peer) = mpsc::channel(capacity);
    (
        MemoryTransport { to_peer, from_peer },
        MemoryPeer {
            to_bridge: Some(to_bridge),
            from_bridge,
        },
    )
}

impl MemoryPeer {
    /// Send a payload to the bridge. Fails once this side has hung up.
    pub async fn send(&self, payload: impl Into<Payload>) -> Result<(), TransportError> {
        match &self.to_bridge {
            Some(tx) => tx
                .send(PeerFrame::Data(payload.into()))
                .await
                .map_err(|_| TransportError::Closed),
            None => Err(TransportError::Closed),
        }
    }

    /// Deliver a transport fault to the bridge's reader
    pub async fn inject_error(&self, error: TransportError) -> Result<(), TransportError> {
        match &self.to_bridge {
            Some(tx) => tx
                .send(PeerFrame::Fault(error))
                .await
                .map_err(|_| TransportError::Closed),
            None => Err(TransportError::Closed),
        }
    }

    /// Next payload the bridge sent, `None` once the bridge closed its side
    pub async fn recv(&mut self) -> Option<Payload> {
        self.from_bridge.recv().await
    }

    /// Refuse further payloads from the bridge; its sends start failing
    pub fn stop_reading(&mut self) {
        self.from_bridge.close();
    }

    /// Hang up. The bridge observes a clean close.
    pub fn disconnect(&mut self) {
        self.to_bridge = None;
    }
}

pub struct MemorySink {
    to_peer: Option<mpsc::Sender<Payload>>,
}

pub struct MemorySource {
    from_peer: mpsc::Receiver<PeerFrame>,
}

#[async_trait]
impl TransportSink for MemorySink {
    async fn send(&mut self, payload: Payload) -> Result<(), TransportError> {
        match &self.to_peer {
            Some(tx) => tx.send(payload).await.map_err(|_| TransportError::Closed),
            None => Err(TransportError::Closed),
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.to_peer = None;
        Ok(())
    }
}

#[async_trait]
impl TransportSource for MemorySource {
    async fn recv(&mut self) -> Option<Result<Payload, TransportError>> {
        match self.from_peer.recv().await? {
            PeerFrame::Data(payload) => Some(Ok(payload)),
            PeerFrame::Fault(error) => Some(Err(error)),
        }
    }
}

impl Transport for MemoryTransport {
    type Sink = MemorySink;
    type Source = MemorySource;

    fn split(self) -> (Self::Sink, Self::Source) {
        (
            MemorySink {
                to_peer: Some(self.to_peer),
            },
            MemorySource {
                from_peer: self.from_peer,
            },
        )
    }
}
