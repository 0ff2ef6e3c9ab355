use std::time::Duration;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::connection::ConnectionId;

/// Failure reported by a transport implementation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Peer-initiated or network-level closure
    #[error("Transport closed")]
    Closed,

    #[error("Transport I/O error: {0}")]
    Io(String),

    #[error("Protocol violation: {0}")]
    Protocol(String),
}

impl TransportError {
    /// Whether this is an ordinary closure rather than a fault worth a warning
    pub fn is_closed(&self) -> bool {
        matches!(self, TransportError::Closed)
    }
}

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Transport closed")]
    TransportClosed,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("No live connection with id {0}")]
    RegistryMiss(ConnectionId),

    #[error("Connection limit exceeded ({current}/{max})")]
    CapacityExceeded { current: usize, max: usize },

    #[error("Send timed out after {0:?}")]
    SendTimeout(Duration),

    /// Outbound queue full; the peer is not reading
    #[error("Connection {0} is not keeping up with outbound traffic")]
    SlowConsumer(ConnectionId),

    #[error("Inbound multiplexer closed")]
    MultiplexerClosed,
}

impl From<TransportError> for BridgeError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Closed => BridgeError::TransportClosed,
            other => BridgeError::Transport(other.to_string()),
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Serialize)]
struct ErrorBody {
    code: String,
    message: String,
}

impl BridgeError {
    fn code(&self) -> (StatusCode, &'static str) {
        match self {
            BridgeError::TransportClosed => (StatusCode::GONE, "TRANSPORT_CLOSED"),
            BridgeError::Transport(_) => (StatusCode::BAD_GATEWAY, "TRANSPORT_ERROR"),
            BridgeError::RegistryMiss(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            BridgeError::CapacityExceeded { .. } => {
                (StatusCode::SERVICE_UNAVAILABLE, "CONNECTION_LIMIT")
            }
            BridgeError::SendTimeout(_) => (StatusCode::GATEWAY_TIMEOUT, "SEND_TIMEOUT"),
            BridgeError::SlowConsumer(_) => (StatusCode::TOO_MANY_REQUESTS, "SLOW_CONSUMER"),
            BridgeError::MultiplexerClosed => {
                (StatusCode::SERVICE_UNAVAILABLE, "BRIDGE_SHUTTING_DOWN")
            }
        }
    }
}

impl IntoResponse for BridgeError {
    fn into_response(self) -> Response {
        let (status, code) = self.code();
        let message = self.to_string();

        tracing::warn!(
            code = %code,
            status = %status.as_u16(),
            message = %message,
            "Request rejected"
        );

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message,
            },
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_conversion() {
        assert!(matches!(
            BridgeError::from(TransportError::Closed),
            BridgeError::TransportClosed
        ));
        assert!(matches!(
            BridgeError::from(TransportError::Io("reset".into())),
            BridgeError::Transport(_)
        ));
    }

    #[test]
    fn test_capacity_status() {
        let err = BridgeError::CapacityExceeded { current: 2, max: 2 };
        assert_eq!(err.to_string(), "Connection limit exceeded (2/2)");
        assert_eq!(err.into_response().status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
