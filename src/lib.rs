// Core bridge
pub mod bridge;
pub mod connection;
pub mod multiplexer;
pub mod router;
pub mod transport;

// Application layer
pub mod api;
pub mod app;
pub mod server;
pub mod websocket;

// Supporting modules
pub mod config;
pub mod error;
pub mod metrics;
pub mod telemetry;
