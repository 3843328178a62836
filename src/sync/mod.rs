mod engine;
mod service;
mod state;

pub use engine::{Resolution, SyncEngine};
pub use service::{chapter_number_for_index, SyncCommand, SyncHandle, SyncService};
pub use state::{SyncPhase, SyncSnapshot};

use std::time::Duration;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Sync service configuration
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// How often the position is re-read while a chapter is active
    pub poll_interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}
