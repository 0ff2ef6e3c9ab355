mod settings;

pub use settings::{BridgeConfig, LoggingConfig, ServerConfig, Settings};
