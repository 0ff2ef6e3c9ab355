//! Outbound router: resolves application commands against the registry and
//! hands payloads to the right connection writers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{broadcast, mpsc};

use crate::connection::{ConnectionHandle, ConnectionId, ConnectionRegistry};
use crate::metrics::RouterMetrics;
use crate::multiplexer::OutboundCommand;
use crate::transport::Payload;

/// Result of routing a single command
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RouteOutcome {
    /// Connections the payload was queued on (or closes requested)
    pub delivered: usize,
    /// Live connections whose send failed
    pub failed: usize,
    /// Targets that no longer existed
    pub dropped: usize,
}

impl RouteOutcome {
    fn delivered() -> Self {
        Self {
            delivered: 1,
            ..Self::default()
        }
    }

    fn failed() -> Self {
        Self {
            failed: 1,
            ..Self::default()
        }
    }

    fn dropped() -> Self {
        Self {
            dropped: 1,
            ..Self::default()
        }
    }
}

/// Statistics for the router
#[derive(Debug, Default)]
pub struct RouterStats {
    pub commands: AtomicU64,
    pub send_to: AtomicU64,
    pub broadcasts: AtomicU64,
    pub closes: AtomicU64,
    pub delivered: AtomicU64,
    pub failed: AtomicU64,
    /// Commands aimed at connections that were already gone
    pub dropped: AtomicU64,
}

impl RouterStats {
    pub fn snapshot(&self) -> RouterStatsSnapshot {
        RouterStatsSnapshot {
            commands: self.commands.load(Ordering::Relaxed),
            send_to: self.send_to.load(Ordering::Relaxed),
            broadcasts: self.broadcasts.load(Ordering::Relaxed),
            closes: self.closes.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }

    fn record(&self, outcome: RouteOutcome) {
        self.delivered
            .fetch_add(outcome.delivered as u64, Ordering::Relaxed);
        self.failed.fetch_add(outcome.failed as u64, Ordering::Relaxed);
        self.dropped.fetch_add(outcome.dropped as u64, Ordering::Relaxed);

        RouterMetrics::record_delivered(outcome.delivered as u64);
        if outcome.failed > 0 {
            RouterMetrics::record_failed(outcome.failed as u64);
        }
        if outcome.dropped > 0 {
            RouterMetrics::record_dropped(outcome.dropped as u64);
        }
    }
}

/// Snapshot of router statistics
#[derive(Debug, Clone, Serialize)]
pub struct RouterStatsSnapshot {
    pub commands: u64,
    pub send_to: u64,
    pub broadcasts: u64,
    pub closes: u64,
    pub delivered: u64,
    pub failed: u64,
    pub dropped: u64,
}

/// Dispatches outbound commands to connections
pub struct OutboundRouter {
    registry: Arc<ConnectionRegistry>,
    stats: RouterStats,
}

impl OutboundRouter {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            registry,
            stats: RouterStats::default(),
        }
    }

    pub fn stats(&self) -> RouterStatsSnapshot {
        self.stats.snapshot()
    }

    /// Route one command. Never fails: misses and send errors are counted, not raised.
    ///
    /// Never waits on a connection: payloads are queued on each writer, and a
    /// peer whose queue is full is closed instead of holding up the rest.
    #[tracing::instrument(name = "router.route", skip(self, command), fields(kind = command.kind()))]
    pub fn route(&self, command: OutboundCommand) -> RouteOutcome {
        self.stats.commands.fetch_add(1, Ordering::Relaxed);
        RouterMetrics::record_command(command.kind());

        let outcome = match command {
            OutboundCommand::SendTo { id, payload } => {
                self.stats.send_to.fetch_add(1, Ordering::Relaxed);
                self.send_to(id, payload)
            }
            OutboundCommand::Broadcast { payload } => {
                self.stats.broadcasts.fetch_add(1, Ordering::Relaxed);
                self.broadcast(payload)
            }
            OutboundCommand::Close { id } => {
                self.stats.closes.fetch_add(1, Ordering::Relaxed);
                self.close(id)
            }
        };

        self.stats.record(outcome);
        outcome
    }

    fn send_to(&self, id: ConnectionId, payload: Payload) -> RouteOutcome {
        let handle = match self.registry.get(id) {
            Ok(handle) => handle,
            Err(e) => {
                tracing::debug!(error = %e, "Target gone, dropping send");
                return RouteOutcome::dropped();
            }
        };
        deliver(&handle, payload)
    }

    /// Fan a payload out to every live connection. One failing peer does not
    /// affect delivery to the others.
    fn broadcast(&self, payload: Payload) -> RouteOutcome {
        let mut outcome = RouteOutcome::default();
        for handle in self.registry.snapshot_handles() {
            let result = deliver(&handle, payload.clone());
            outcome.delivered += result.delivered;
            outcome.failed += result.failed;
            outcome.dropped += result.dropped;
        }

        tracing::debug!(
            delivered = outcome.delivered,
            failed = outcome.failed,
            dropped = outcome.dropped,
            "Broadcast completed"
        );
        outcome
    }

    fn close(&self, id: ConnectionId) -> RouteOutcome {
        match self.registry.lookup(id) {
            Some(handle) => {
                tracing::debug!(connection_id = %id, "Close requested by application");
                handle.request_close();
                RouteOutcome::delivered()
            }
            None => RouteOutcome::dropped(),
        }
    }

    /// Consume the application's outbound port until it closes or shutdown fires.
    ///
    /// Commands are routed one at a time, so per-connection order follows
    /// submission order.
    pub async fn run(
        self: Arc<Self>,
        mut commands: mpsc::Receiver<OutboundCommand>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        tracing::debug!("Outbound router started");
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::debug!("Outbound router received shutdown signal");
                    break;
                }
                command = commands.recv() => match command {
                    Some(command) => {
                        self.route(command);
                    }
                    None => {
                        tracing::info!("Application outbound port closed");
                        break;
                    }
                },
            }
        }
        tracing::debug!("Outbound router stopped");
    }
}

/// Queue `payload` on one connection and classify the result
fn deliver(handle: &ConnectionHandle, payload: Payload) -> RouteOutcome {
    match handle.send(payload) {
        Ok(()) => RouteOutcome::delivered(),
        Err(e) if !handle.is_open() => {
            tracing::debug!(connection_id = %handle.id, error = %e, "Target closing, dropping send");
            RouteOutcome::dropped()
        }
        Err(e) => {
            tracing::warn!(connection_id = %handle.id, error = %e, "Send failed");
            RouteOutcome::failed()
        }
    }
}
