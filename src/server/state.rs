use std::sync::Arc;
use std::time::Instant;

use crate::bridge::Bridge;
use crate::config::Settings;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub bridge: Bridge,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(settings: Settings, bridge: Bridge) -> Self {
        Self {
            settings: Arc::new(settings),
            bridge,
            start_time: Instant::now(),
        }
    }
}
