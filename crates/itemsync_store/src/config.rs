//! Store configuration.

/// Configuration for an in-memory [`crate::Store`].
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Name of the writer thread.
    pub writer_thread_name: String,
    /// Prefix for reader thread names.
    pub reader_thread_prefix: String,
    /// Whether a panic in a background transaction body is caught and
    /// reported as an error result instead of killing the store thread.
    pub catch_panics: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            writer_thread_name: "itemsync-writer".to_string(),
            reader_thread_prefix: "itemsync-reader".to_string(),
            catch_panics: true,
        }
    }
}

impl StoreConfig {
    /// Sets the writer thread name.
    #[must_use]
    pub fn writer_thread_name(mut self, name: impl Into<String>) -> Self {
        self.writer_thread_name = name.into();
        self
    }

    /// Sets the reader thread name prefix.
    #[must_use]
    pub fn reader_thread_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.reader_thread_prefix = prefix.into();
        self
    }

    /// Sets whether background panics are caught.
    #[must_use]
    pub const fn catch_panics(mut self, catch: bool) -> Self {
        self.catch_panics = catch;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = StoreConfig::default();
        assert_eq!(config.writer_thread_name, "itemsync-writer");
        assert!(config.catch_panics);
    }

    #[test]
    fn builder_pattern() {
        let config = StoreConfig::default()
            .writer_thread_name("w")
            .reader_thread_prefix("r")
            .catch_panics(false);
        assert_eq!(config.writer_thread_name, "w");
        assert_eq!(config.reader_thread_prefix, "r");
        assert!(!config.catch_panics);
    }
}
