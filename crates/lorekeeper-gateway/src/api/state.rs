//! Application state for API handlers

use lorekeeper::SharedLorekeeper;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Conflict core
    pub lorekeeper: SharedLorekeeper,

    /// Gateway version
    pub version: String,

    /// Gateway start time
    pub started_at: chrono::DateTime<chrono::Utc>,
}

impl AppState {
    /// Create new application state
    pub fn new(lorekeeper: SharedLorekeeper) -> Self {
        Self {
            lorekeeper,
            version: env!("CARGO_PKG_VERSION").to_string(),
            started_at: chrono::Utc::now(),
        }
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        (chrono::Utc::now() - self.started_at).num_seconds().max(0) as u64
    }
}
