//! WebSocket surface: the `/ws` upgrade route and the transport adapter.

mod handler;
mod transport;

pub use handler::ws_handler;
pub use transport::{WebSocketSink, WebSocketSource, WebSocketTransport};
