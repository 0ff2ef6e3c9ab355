//! Running an application against the bridge ports.
//!
//! The application is a plain sequential state machine: it sees one event at
//! a time and answers with zero or more commands.

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::Serialize;

use crate::bridge::ApplicationPorts;
use crate::connection::ConnectionId;
use crate::multiplexer::{InboundEvent, OutboundCommand};

#[async_trait]
pub trait Application: Send {
    async fn handle(&mut self, event: InboundEvent) -> Vec<OutboundCommand>;
}

/// Counters for one `drive` run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DriveSummary {
    pub events: u64,
    pub commands: u64,
}

/// Feed inbound events to `app` one at a time and forward its commands.
///
/// Returns when the inbound port ends or the router stops accepting commands.
pub async fn drive<A: Application>(mut app: A, ports: ApplicationPorts) -> DriveSummary {
    let ApplicationPorts {
        mut inbound,
        outbound,
    } = ports;
    let mut summary = DriveSummary::default();

    while let Some(event) = inbound.recv().await {
        summary.events += 1;
        for command in app.handle(event).await {
            if outbound.send(command).await.is_err() {
                tracing::info!("Outbound port closed, stopping application");
                return summary;
            }
            summary.commands += 1;
        }
    }

    tracing::info!(
        events = summary.events,
        commands = summary.commands,
        "Inbound port ended, application stopped"
    );
    summary
}

/// Relays every message to every connected peer, sender included
#[derive(Debug, Default)]
pub struct RelayApp {
    peers: BTreeSet<ConnectionId>,
}

impl RelayApp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn peers(&self) -> impl Iterator<Item = &ConnectionId> {
        self.peers.iter()
    }
}

#[async_trait]
impl Application for RelayApp {
    async fn handle(&mut self, event: InboundEvent) -> Vec<OutboundCommand> {
        match event {
            InboundEvent::Connected { id } => {
                self.peers.insert(id);
                tracing::debug!(connection_id = %id, peers = self.peers.len(), "Peer joined");
                Vec::new()
            }
            InboundEvent::Disconnected { id } => {
                self.peers.remove(&id);
                tracing::debug!(connection_id = %id, peers = self.peers.len(), "Peer left");
                Vec::new()
            }
            InboundEvent::Message { payload, .. } => vec![OutboundCommand::Broadcast { payload }],
        }
    }
}
