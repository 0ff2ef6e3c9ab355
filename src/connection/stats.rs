//! Registry statistics

use serde::Serialize;

/// Point-in-time registry counters
#[derive(Debug, Clone, Serialize)]
pub struct RegistryStats {
    pub live_connections: usize,
    pub total_registered: u64,
    pub total_rejected: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_connections: Option<usize>,
}
