//! Sync manager configuration.

/// Configuration for a [`crate::SyncManager`].
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// How many times a merge re-checks edit locks that vanish while the
    /// merge is being deferred.
    pub merge_lock_attempts: u32,
    /// Whether editors are told about unsafe changes to their items.
    pub notify_concurrent_edits: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            merge_lock_attempts: 10,
            notify_concurrent_edits: true,
        }
    }
}

impl SyncConfig {
    /// Sets the merge lock attempts.
    #[must_use]
    pub const fn with_merge_lock_attempts(mut self, attempts: u32) -> Self {
        self.merge_lock_attempts = attempts;
        self
    }

    /// Sets whether concurrent editors are notified.
    #[must_use]
    pub const fn with_concurrent_edit_notifications(mut self, notify: bool) -> Self {
        self.notify_concurrent_edits = notify;
        self
    }
}
