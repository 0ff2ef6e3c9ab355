use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Path clients upgrade on
    #[serde(default = "default_ws_path")]
    pub ws_path: String,
    /// Allowed browser origins (empty = any)
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    /// Maximum concurrent connections (unset = unbounded)
    #[serde(default)]
    pub max_connections: Option<usize>,
    /// Capacity of the inbound event channel before producers block
    #[serde(default = "default_inbound_buffer_bound")]
    pub inbound_buffer_bound: usize,
    /// Capacity of each connection's outbound queue
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,
    /// Per-send timeout in milliseconds (unset = wait for the transport)
    #[serde(default)]
    pub send_timeout_ms: Option<u64>,
    /// Grace period for connections to close on shutdown, in milliseconds
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// "pretty" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_inbound_buffer_bound() -> usize {
    1024
}

fn default_outbound_buffer() -> usize {
    64
}

fn default_shutdown_grace_ms() -> u64 {
    5000
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let mut builder = Config::builder()
            .set_default("server.host", default_host())?
            .set_default("server.port", default_port() as i64)?
            .set_default("server.ws_path", default_ws_path())?
            .set_default("bridge.inbound_buffer_bound", default_inbound_buffer_bound() as i64)?
            .set_default("bridge.outbound_buffer", default_outbound_buffer() as i64)?
            .set_default("bridge.shutdown_grace_ms", default_shutdown_grace_ms() as i64)?
            .set_default("logging.format", default_log_format())?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // SERVER__PORT, BRIDGE__MAX_CONNECTIONS, LOGGING__FORMAT, etc.
            .add_source(
                Environment::default()
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("server.cors_origins"),
            );

        // Plain PORT wins, as in typical PaaS deployments
        if let Ok(port) = env::var("PORT") {
            builder = builder.set_override("server.port", port)?;
        }

        builder.build()?.try_deserialize()
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl BridgeConfig {
    pub fn send_timeout(&self) -> Option<Duration> {
        self.send_timeout_ms.map(Duration::from_millis)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            ws_path: default_ws_path(),
            cors_origins: Vec::new(),
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            max_connections: None,
            inbound_buffer_bound: default_inbound_buffer_bound(),
            outbound_buffer: default_outbound_buffer(),
            send_timeout_ms: None,
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: default_log_format(),
        }
    }
}
