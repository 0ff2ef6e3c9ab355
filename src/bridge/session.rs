//! Per-connection task: emits `Connected`, pumps inbound payloads, drives the
//! writer, and performs teardown exactly once.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::connection::{ConnectionHandle, ConnectionRegistry, ConnectionState, Outgoing};
use crate::error::{BridgeError, TransportError};
use crate::metrics::ConnectionMetrics;
use crate::multiplexer::{InboundEvent, InboundSender};
use crate::transport::{TransportSink, TransportSource};

/// Why a connection left the `Reading` state
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum CloseReason {
    PeerClosed,
    TransportFault(TransportError),
    WriterFailed,
    Requested,
    InboundClosed,
    Shutdown,
}

impl CloseReason {
    fn as_str(&self) -> &'static str {
        match self {
            Self::PeerClosed => "peer_closed",
            Self::TransportFault(_) => "transport_error",
            Self::WriterFailed => "writer_failed",
            Self::Requested => "close_requested",
            Self::InboundClosed => "inbound_closed",
            Self::Shutdown => "shutdown",
        }
    }
}

/// Writer task that is aborted when dropped, so an aborted session never
/// leaves its writer behind
struct WriterTask(JoinHandle<Result<(), BridgeError>>);

impl Drop for WriterTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

pub(crate) struct Session {
    pub handle: Arc<ConnectionHandle>,
    pub registry: Arc<ConnectionRegistry>,
    pub inbound: InboundSender,
    pub shutdown: broadcast::Receiver<()>,
    pub grace: Duration,
    /// Bound on a single transport write
    pub send_timeout: Option<Duration>,
}

impl Session {
    #[tracing::instrument(
        name = "bridge.connection",
        skip_all,
        fields(connection_id = %self.handle.id)
    )]
    pub async fn run<K, S>(mut self, sink: K, mut source: S, outgoing: mpsc::Receiver<Outgoing>)
    where
        K: TransportSink,
        S: TransportSource,
    {
        let id = self.handle.id;
        let started = Instant::now();
        let mut writer = WriterTask(tokio::spawn(write_loop(sink, outgoing, self.send_timeout)));

        let reason = if self.inbound.emit(InboundEvent::Connected { id }).await.is_err() {
            CloseReason::InboundClosed
        } else if !self
            .handle
            .transition(ConnectionState::Registered, ConnectionState::Reading)
        {
            // Forced teardown got here first
            CloseReason::Shutdown
        } else {
            tracing::info!(connection_id = %id, "Connection established");
            self.read_loop(&mut source, &mut writer.0).await
        };

        match &reason {
            CloseReason::TransportFault(e) => {
                ConnectionMetrics::record_transport_error();
                tracing::warn!(connection_id = %id, error = %e, "Transport error");
            }
            other => {
                tracing::debug!(connection_id = %id, reason = other.as_str(), "Leaving read loop");
            }
        }

        self.teardown(reason, writer, started).await;
    }

    async fn read_loop<S: TransportSource>(
        &mut self,
        source: &mut S,
        writer: &mut JoinHandle<Result<(), BridgeError>>,
    ) -> CloseReason {
        let id = self.handle.id;
        let mut close_requested = self.handle.close_requested();

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => return CloseReason::Shutdown,
                _ = async { let _ = close_requested.wait_for(|requested| *requested).await; } => {
                    return CloseReason::Requested;
                }
                finished = &mut *writer => {
                    match finished {
                        Ok(Err(BridgeError::TransportClosed)) => {
                            tracing::debug!(connection_id = %id, "Peer stopped accepting writes");
                        }
                        Ok(Err(e)) => {
                            ConnectionMetrics::record_transport_error();
                            tracing::warn!(connection_id = %id, error = %e, "Writer failed");
                        }
                        _ => {}
                    }
                    return CloseReason::WriterFailed;
                }
                _ = self.inbound.closed() => return CloseReason::InboundClosed,
                frame = source.recv() => match frame {
                    None => return CloseReason::PeerClosed,
                    Some(Err(e)) if e.is_closed() => return CloseReason::PeerClosed,
                    Some(Err(e)) => return CloseReason::TransportFault(e),
                    Some(Ok(payload)) => {
                        let seq = self.handle.next_sequence();
                        tracing::trace!(connection_id = %id, seq, bytes = payload.len(), "Inbound message");

                        // Blocks while the application is behind
                        let event = InboundEvent::Message { id, payload };
                        tokio::select! {
                            sent = self.inbound.emit(event) => {
                                if sent.is_err() {
                                    return CloseReason::InboundClosed;
                                }
                            }
                            _ = self.shutdown.recv() => return CloseReason::Shutdown,
                        }
                    }
                },
            }
        }
    }

    async fn teardown(mut self, reason: CloseReason, mut writer: WriterTask, started: Instant) {
        let id = self.handle.id;

        if !self.handle.begin_closing() {
            // Forced removal already handled this connection
            return;
        }

        // Queued sends get a bounded chance to reach the peer before the sink closes
        if !writer.0.is_finished() {
            let tx = self.handle.writer();
            let drain = async {
                let _ = tx.send(Outgoing::Close).await;
                let _ = (&mut writer.0).await;
            };
            if tokio::time::timeout(self.grace, drain).await.is_err() {
                tracing::debug!(connection_id = %id, "Writer did not drain in time, aborting");
            }
        }
        drop(writer);

        if !self
            .handle
            .transition(ConnectionState::Closing, ConnectionState::Removed)
        {
            return;
        }
        self.registry.remove(id);

        let duration = started.elapsed().as_secs_f64();
        ConnectionMetrics::record_closed(duration);

        if reason != CloseReason::InboundClosed {
            let event = InboundEvent::Disconnected { id };
            let delivered = if reason == CloseReason::Shutdown {
                matches!(
                    tokio::time::timeout(self.grace, self.inbound.emit(event)).await,
                    Ok(Ok(()))
                )
            } else {
                tokio::select! {
                    sent = self.inbound.emit(event.clone()) => sent.is_ok(),
                    _ = self.shutdown.recv() => self.inbound.try_emit(event),
                }
            };
            if !delivered {
                tracing::debug!(connection_id = %id, "Disconnected event not delivered");
            }
        }

        tracing::info!(
            connection_id = %id,
            reason = reason.as_str(),
            duration_secs = duration,
            messages = self.handle.messages_received(),
            "Connection closed"
        );
    }
}

/// Single writer per connection: sends never interleave
async fn write_loop<K: TransportSink>(
    mut sink: K,
    mut outgoing: mpsc::Receiver<Outgoing>,
    send_timeout: Option<Duration>,
) -> Result<(), BridgeError> {
    while let Some(item) = outgoing.recv().await {
        let payload = match item {
            Outgoing::Payload(payload) => payload,
            Outgoing::Close => break,
        };
        match send_timeout {
            Some(limit) => tokio::time::timeout(limit, sink.send(payload))
                .await
                .map_err(|_| BridgeError::SendTimeout(limit))??,
            None => sink.send(payload).await?,
        }
    }
    let _ = sink.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::multiplexer;
    use crate::transport::memory::memory_pair;
    use crate::transport::{Payload, Transport};

    fn assert_send<T: Send>(_: &T) {}

    struct Fixture {
        registry: Arc<ConnectionRegistry>,
        handle: Arc<ConnectionHandle>,
        outgoing: mpsc::Receiver<Outgoing>,
        inbound_rx: multiplexer::InboundReceiver,
        session: Session,
        _shutdown_tx: broadcast::Sender<()>,
    }

    fn fixture(send_timeout: Option<Duration>) -> Fixture {
        let registry = Arc::new(ConnectionRegistry::new());
        let (tx, outgoing) = mpsc::channel(4);
        let handle = registry.register(tx).unwrap();
        let (inbound, inbound_rx) = multiplexer::channel(8);
        let (shutdown_tx, shutdown) = broadcast::channel(1);
        let session = Session {
            handle: handle.clone(),
            registry: registry.clone(),
            inbound,
            shutdown,
            grace: Duration::from_millis(100),
            send_timeout,
        };
        Fixture {
            registry,
            handle,
            outgoing,
            inbound_rx,
            session,
            _shutdown_tx: shutdown_tx,
        }
    }

    #[tokio::test]
    async fn test_close_requested_before_reading_tears_down() {
        let mut f = fixture(None);
        let id = f.handle.id;
        let (transport, mut peer) = memory_pair(4);
        let (sink, source) = transport.split();
        f.handle.request_close();

        let run = f.session.run(sink, source, f.outgoing);
        assert_send(&run);
        tokio::spawn(run).await.unwrap();

        assert_eq!(f.inbound_rx.recv().await, Some(InboundEvent::Connected { id }));
        assert_eq!(f.inbound_rx.recv().await, Some(InboundEvent::Disconnected { id }));
        assert!(f.registry.is_empty());
        assert_eq!(peer.recv().await, None);
    }

    #[tokio::test]
    async fn test_write_timeout_ends_connection() {
        let mut f = fixture(Some(Duration::from_millis(20)));
        let id = f.handle.id;
        // Room for one payload; the peer never reads
        let (transport, _peer) = memory_pair(1);
        let (sink, source) = transport.split();

        let task = tokio::spawn(f.session.run(sink, source, f.outgoing));
        assert_eq!(f.inbound_rx.recv().await, Some(InboundEvent::Connected { id }));

        f.handle.send(Payload::text("fits")).unwrap();
        f.handle.send(Payload::text("times out")).unwrap();

        assert_eq!(f.inbound_rx.recv().await, Some(InboundEvent::Disconnected { id }));
        task.await.unwrap();
        assert!(f.registry.lookup(id).is_none());
    }
}
