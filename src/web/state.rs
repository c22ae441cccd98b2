//! # Web API Application State

use std::sync::Arc;
use std::time::Instant;

use crate::config::WebConfig;
use crate::orchestration::FormationEngine;

/// Shared application state for the web API
#[derive(Debug, Clone)]
pub struct AppState {
    pub engine: Arc<FormationEngine>,
    pub config: Arc<WebConfig>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(engine: Arc<FormationEngine>, config: WebConfig) -> Self {
        Self {
            engine,
            config: Arc::new(config),
            started_at: Instant::now(),
        }
    }

    pub fn auth_enabled(&self) -> bool {
        self.config.auth.enabled
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
