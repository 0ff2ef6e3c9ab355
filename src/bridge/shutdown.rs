//! Graceful shutdown of the bridge.
//!
//! 1. Stop accepting and signal every connection task and the router
//! 2. Wait up to the grace period for connections to tear themselves down
//! 3. Abort whatever is left and remove it from the registry

use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::time::timeout;

use crate::connection::ConnectionState;
use crate::metrics::ConnectionMetrics;
use crate::multiplexer::InboundEvent;

use super::Bridge;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Result of a shutdown
#[derive(Debug, Default)]
pub struct ShutdownResult {
    /// Connections live when shutdown started
    pub initial_connections: usize,
    /// Connections that closed on their own within the grace period
    pub connections_closed: usize,
    /// Connections that had to be aborted
    pub connections_forced: usize,
    pub duration: Duration,
}

impl Bridge {
    /// Shut the bridge down. In-flight sends get the configured grace period;
    /// after that remaining connections are closed forcibly.
    #[tracing::instrument(
        name = "bridge.shutdown",
        skip(self),
        fields(live_connections = self.registry.len())
    )]
    pub async fn shutdown(&self) -> ShutdownResult {
        let start = std::time::Instant::now();
        let mut result = ShutdownResult {
            initial_connections: self.registry.len(),
            ..ShutdownResult::default()
        };

        tracing::info!("Phase 1: Signaling connection tasks and router to stop");
        self.shutting_down.store(true, Ordering::Release);
        let _ = self.shutdown_tx.send(());

        tracing::info!("Phase 2: Waiting for connections to close");
        let grace = self.config.shutdown_grace();
        let registry = self.registry.clone();
        let drained = timeout(grace, async {
            while !registry.is_empty() {
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        })
        .await
        .is_ok();

        if !drained {
            tracing::warn!(
                remaining_connections = self.registry.len(),
                "Phase 3: Grace period elapsed, forcing remaining connections closed"
            );
            result.connections_forced = self.force_close_remaining();
        }

        result.connections_closed = result
            .initial_connections
            .saturating_sub(result.connections_forced);
        result.duration = start.elapsed();

        tracing::info!(
            connections_closed = result.connections_closed,
            connections_forced = result.connections_forced,
            duration_ms = result.duration.as_millis() as u64,
            "Bridge shutdown completed"
        );

        result
    }

    fn force_close_remaining(&self) -> usize {
        let mut forced = 0;

        for handle in self.registry.snapshot_handles() {
            handle.abort_task();
            handle.begin_closing();

            // The session may have reached `Removed` on its own meanwhile
            if !handle.transition(ConnectionState::Closing, ConnectionState::Removed) {
                continue;
            }

            self.registry.remove(handle.id);
            ConnectionMetrics::record_closed(
                (chrono::Utc::now() - handle.connected_at)
                    .to_std()
                    .unwrap_or_default()
                    .as_secs_f64(),
            );
            if !self.inbound.try_emit(InboundEvent::Disconnected { id: handle.id }) {
                tracing::debug!(connection_id = %handle.id, "Disconnected event not delivered");
            }
            tracing::info!(connection_id = %handle.id, "Connection closed forcibly");
            forced += 1;
        }

        forced
    }
}
