//! Sync scheduling configuration.

use std::time::Duration;

/// Tunables for the sync orchestrator.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Interval between sync runs while the app is in the foreground.
    pub foreground_interval: Duration,
    /// Interval between sync runs while the app is backgrounded.
    pub background_interval: Duration,
    /// Initial backoff delay after a retryable failure.
    pub retry_base_delay: Duration,
    /// Ceiling for the exponential backoff delay.
    pub retry_max_delay: Duration,
    /// Retry attempts per sync run before giving up until the next tick.
    pub retry_max_attempts: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            foreground_interval: Duration::from_secs(60),
            background_interval: Duration::from_secs(60 * 60),
            retry_base_delay: Duration::from_secs(2),
            retry_max_delay: Duration::from_secs(60),
            retry_max_attempts: 3,
        }
    }
}
