//! Error types for the cache layer.

use itemsync_store::StoreError;
use thiserror::Error;

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors that can occur in the cache layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// The read transaction of an update failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The image was stopped.
    #[error("image is stopped")]
    Stopped,

    /// A loader returned a different number of values than items asked for.
    #[error("loader {loader} returned {actual} values for {expected} items")]
    LoaderMismatch {
        /// Loader name.
        loader: String,
        /// Number of items asked for.
        expected: usize,
        /// Number of values returned.
        actual: usize,
    },

    /// The update thread could not be started.
    #[error("cannot start update thread: {0}")]
    Thread(String),
}

impl CacheError {
    /// Returns true if a later update cycle may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Store(err) => err.is_retryable(),
            Self::Stopped | Self::LoaderMismatch { .. } | Self::Thread(_) => false,
        }
    }
}
