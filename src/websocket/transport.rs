//! axum WebSocket as a bridge transport.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};

use crate::error::TransportError;
use crate::transport::{Payload, Transport, TransportSink, TransportSource};

/// An upgraded WebSocket ready to be handed to the bridge
pub struct WebSocketTransport {
    socket: WebSocket,
}

impl WebSocketTransport {
    pub fn new(socket: WebSocket) -> Self {
        Self { socket }
    }
}

pub struct WebSocketSink {
    inner: SplitSink<WebSocket, Message>,
}

pub struct WebSocketSource {
    inner: SplitStream<WebSocket>,
}

impl Transport for WebSocketTransport {
    type Sink = WebSocketSink;
    type Source = WebSocketSource;

    fn split(self) -> (Self::Sink, Self::Source) {
        let (sink, stream) = self.socket.split();
        (WebSocketSink { inner: sink }, WebSocketSource { inner: stream })
    }
}

fn to_message(payload: Payload) -> Message {
    match payload {
        Payload::Text(text) => Message::Text(text.into()),
        Payload::Binary(bytes) => Message::Binary(bytes.into()),
    }
}

#[async_trait]
impl TransportSink for WebSocketSink {
    async fn send(&mut self, payload: Payload) -> Result<(), TransportError> {
        self.inner
            .send(to_message(payload))
            .await
            .map_err(|e| TransportError::Io(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.inner
            .close()
            .await
            .map_err(|e| TransportError::Io(e.to_string()))
    }
}

#[async_trait]
impl TransportSource for WebSocketSource {
    async fn recv(&mut self) -> Option<Result<Payload, TransportError>> {
        loop {
            let message = match self.inner.next().await? {
                Ok(message) => message,
                Err(e) => return Some(Err(TransportError::Io(e.to_string()))),
            };

            match message {
                Message::Text(text) => return Some(Ok(Payload::Text(text.as_str().to_owned()))),
                Message::Binary(bytes) => return Some(Ok(Payload::Binary(bytes.to_vec()))),
                // axum answers pings itself
                Message::Ping(_) | Message::Pong(_) => continue,
                Message::Close(frame) => {
                    tracing::debug!(close_frame = ?frame, "Received close frame");
                    return None;
                }
            }
        }
    }
}
