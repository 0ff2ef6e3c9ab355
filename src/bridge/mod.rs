//! The bridge: composition root tying transports, the registry, the inbound
//! multiplexer and the outbound router together.
//!
//! ```text
//! transport ──accept──▶ registry ──▶ session task ──▶ InboundEvent ──▶ application
//! application ──▶ OutboundCommand ──▶ router ──▶ connection writer ──▶ transport
//! ```

mod session;
mod shutdown;

pub use shutdown::ShutdownResult;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{broadcast, mpsc};

use crate::config::BridgeConfig;
use crate::connection::{ConnectionId, ConnectionRegistry, RegistryStats};
use crate::error::BridgeError;
use crate::metrics::ConnectionMetrics;
use crate::multiplexer::{self, InboundReceiver, InboundSender, MultiplexerStats, OutboundCommand};
use crate::router::{OutboundRouter, RouterStatsSnapshot};
use crate::transport::{Transport, TransportSink};

use session::Session;

/// The application's two ports
pub struct ApplicationPorts {
    /// Ordered stream of connection events
    pub inbound: InboundReceiver,
    /// Commands for the router
    pub outbound: mpsc::Sender<OutboundCommand>,
}

/// Combined bridge statistics
#[derive(Debug, Clone, Serialize)]
pub struct BridgeStats {
    pub connections: RegistryStats,
    pub inbound: MultiplexerStats,
    pub outbound: RouterStatsSnapshot,
}

/// Connects many transports to one sequential application
#[derive(Clone)]
pub struct Bridge {
    config: BridgeConfig,
    registry: Arc<ConnectionRegistry>,
    router: Arc<OutboundRouter>,
    inbound: InboundSender,
    shutdown_tx: broadcast::Sender<()>,
    shutting_down: Arc<AtomicBool>,
}

impl Bridge {
    /// Build a bridge and the ports the application uses to talk to it.
    ///
    /// Spawns the router task, so it must be called inside a tokio runtime.
    pub fn new(config: BridgeConfig) -> (Self, ApplicationPorts) {
        let registry = Arc::new(ConnectionRegistry::with_limits(config.max_connections));
        let router = Arc::new(OutboundRouter::new(registry.clone()));
        let (inbound, inbound_rx) = multiplexer::channel(config.inbound_buffer_bound);
        let (outbound_tx, outbound_rx) = mpsc::channel(config.inbound_buffer_bound.max(1));
        let (shutdown_tx, _) = broadcast::channel(1);
        let shutting_down = Arc::new(AtomicBool::new(false));

        tokio::spawn(router.clone().run(outbound_rx, shutdown_tx.subscribe()));
        tokio::spawn(watch_consumer(
            inbound.clone(),
            shutdown_tx.clone(),
            shutting_down.clone(),
        ));

        tracing::info!(
            max_connections = ?config.max_connections,
            inbound_buffer_bound = config.inbound_buffer_bound,
            send_timeout_ms = ?config.send_timeout_ms,
            "Bridge started"
        );

        let bridge = Self {
            config,
            registry,
            router,
            inbound,
            shutdown_tx,
            shutting_down,
        };
        let ports = ApplicationPorts {
            inbound: inbound_rx,
            outbound: outbound_tx,
        };
        (bridge, ports)
    }

    /// Whether a new connection would be accepted right now.
    ///
    /// Lets the HTTP layer refuse an upgrade before any handshake work.
    pub fn admit(&self) -> Result<(), BridgeError> {
        if self.is_shutting_down() {
            return Err(BridgeError::MultiplexerClosed);
        }
        self.registry.check_capacity()
    }

    /// Register a freshly accepted transport and start its connection task.
    ///
    /// On rejection the transport is closed and existing connections are unaffected.
    pub async fn accept<T: Transport>(&self, transport: T) -> Result<ConnectionId, BridgeError> {
        let (mut sink, source) = transport.split();

        if self.is_shutting_down() {
            let _ = sink.close().await;
            return Err(BridgeError::MultiplexerClosed);
        }

        let (tx, rx) = mpsc::channel(self.config.outbound_buffer.max(1));
        let handle = match self.registry.register(tx) {
            Ok(handle) => handle,
            Err(e) => {
                ConnectionMetrics::record_rejected();
                tracing::warn!(error = %e, "Connection rejected");
                let _ = sink.close().await;
                return Err(e);
            }
        };
        ConnectionMetrics::record_opened();

        let id = handle.id;
        let session = Session {
            handle: handle.clone(),
            registry: self.registry.clone(),
            inbound: self.inbound.clone(),
            shutdown: self.shutdown_tx.subscribe(),
            grace: self.config.shutdown_grace(),
            send_timeout: self.config.send_timeout(),
        };
        let task = tokio::spawn(session.run(sink, source, rx));
        handle.attach_task(task.abort_handle());

        Ok(id)
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn router(&self) -> &Arc<OutboundRouter> {
        &self.router
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    /// Receiver that fires when the bridge begins shutting down
    pub fn shutdown_signal(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    pub fn stats(&self) -> BridgeStats {
        BridgeStats {
            connections: self.registry.stats(),
            inbound: self.inbound.stats(),
            outbound: self.router.stats(),
        }
    }
}

/// Treat a vanished application consumer as fatal for the whole bridge
async fn watch_consumer(
    inbound: InboundSender,
    shutdown_tx: broadcast::Sender<()>,
    shutting_down: Arc<AtomicBool>,
) {
    let mut shutdown = shutdown_tx.subscribe();
    tokio::select! {
        _ = inbound.closed() => {
            tracing::error!("Application stopped consuming inbound events, shutting the bridge down");
            shutting_down.store(true, Ordering::Release);
            let _ = shutdown_tx.send(());
        }
        _ = shutdown.recv() => {}
    }
}
