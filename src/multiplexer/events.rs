use serde::{Deserialize, Serialize};

use crate::connection::ConnectionId;
use crate::transport::Payload;

/// Events delivered to the application, in per-connection order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundEvent {
    Connected { id: ConnectionId },
    Disconnected { id: ConnectionId },
    Message { id: ConnectionId, payload: Payload },
}

impl InboundEvent {
    pub fn id(&self) -> ConnectionId {
        match self {
            Self::Connected { id } | Self::Disconnected { id } | Self::Message { id, .. } => *id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::Disconnected { .. } => "disconnected",
            Self::Message { .. } => "message",
        }
    }
}

/// Commands issued by the application
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundCommand {
    SendTo { id: ConnectionId, payload: Payload },
    Broadcast { payload: Payload },
    Close { id: ConnectionId },
}

impl OutboundCommand {
    pub fn send_to(id: ConnectionId, payload: impl Into<Payload>) -> Self {
        Self::SendTo {
            id,
            payload: payload.into(),
        }
    }

    pub fn broadcast(payload: impl Into<Payload>) -> Self {
        Self::Broadcast {
            payload: payload.into(),
        }
    }

    pub fn close(id: ConnectionId) -> Self {
        Self::Close { id }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::SendTo { .. } => "send_to",
            Self::Broadcast { .. } => "broadcast",
            Self::Close { .. } => "close",
        }
    }
}
