//! Image configuration.

use std::time::Duration;

/// Configuration for a [`crate::DbImage`].
#[derive(Debug, Clone)]
pub struct ImageConfig {
    /// Name of the update thread.
    pub update_thread_name: String,
    /// Whether update cycles slower than `slow_update_threshold` are logged.
    pub log_slow_updates: bool,
    /// Duration above which an update cycle counts as slow.
    pub slow_update_threshold: Duration,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            update_thread_name: "itemsync-image".to_string(),
            log_slow_updates: true,
            slow_update_threshold: Duration::from_millis(200),
        }
    }
}

impl ImageConfig {
    /// Sets the update thread name.
    #[must_use]
    pub fn with_update_thread_name(mut self, name: impl Into<String>) -> Self {
        self.update_thread_name = name.into();
        self
    }

    /// Logs update cycles slower than `threshold`.
    #[must_use]
    pub const fn with_slow_update_threshold(mut self, threshold: Duration) -> Self {
        self.log_slow_updates = true;
        self.slow_update_threshold = threshold;
        self
    }

    /// Disables slow update logging.
    #[must_use]
    pub const fn without_slow_update_log(mut self) -> Self {
        self.log_slow_updates = false;
        self
    }
}
