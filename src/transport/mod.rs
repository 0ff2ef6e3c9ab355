//! Transport abstraction: a bidirectional, message-oriented, ordered connection.
//!
//! A transport is split into a sink (used only by the connection's writer) and
//! a source (used only by the connection's reader), so sending and receiving
//! proceed independently.

pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::TransportError;

/// Opaque message body. The bridge never looks inside.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Payload {
    Text(String),
    Binary(Vec<u8>),
}

impl Payload {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    pub fn binary(bytes: impl Into<Vec<u8>>) -> Self {
        Self::Binary(bytes.into())
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Text(t) => t.len(),
            Self::Binary(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<String> for Payload {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for Payload {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<Vec<u8>> for Payload {
    fn from(value: Vec<u8>) -> Self {
        Self::Binary(value)
    }
}

/// Outbound half of a transport
#[async_trait]
pub trait TransportSink: Send + 'static {
    async fn send(&mut self, payload: Payload) -> Result<(), TransportError>;

    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Inbound half of a transport
#[async_trait]
pub trait TransportSource: Send + 'static {
    /// Next payload from the peer. `None` once the transport has closed cleanly.
    async fn recv(&mut self) -> Option<Result<Payload, TransportError>>;
}

/// A connection that can be handed to the bridge
pub trait Transport: Send + 'static {
    type Sink: TransportSink;
    type Source: TransportSource;

    fn split(self) -> (Self::Sink, Self::Source);
}
