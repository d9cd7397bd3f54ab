//! Error types for the sync core.

use itemsync_codec::CodecError;
use itemsync_store::{Aborted, ItemId, StoreError};
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur in the sync core.
///
/// Lock contention and conflicts are not errors: they are reported as
/// `None`/`false` results and as sync states.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Store transaction failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// History payload could not be decoded.
    #[error("corrupt history of {item}: {source}")]
    CorruptHistory {
        /// Item owning the history.
        item: ItemId,
        /// Decoder error.
        source: CodecError,
    },

    /// The editor refused to open.
    #[error("editor cancelled: {0}")]
    EditorCancelled(String),

    /// Item cannot be uploaded.
    #[error("{item} cannot be uploaded: {reason}")]
    UploadRefused {
        /// Refused item.
        item: ItemId,
        /// Why it was refused.
        reason: String,
    },
}

impl SyncError {
    /// Creates an editor-cancelled error.
    pub fn editor_cancelled(message: impl Into<String>) -> Self {
        Self::EditorCancelled(message.into())
    }

    /// Returns true if retrying the operation may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Store(err) => err.is_retryable(),
            Self::UploadRefused { .. } => true,
            Self::CorruptHistory { .. } | Self::EditorCancelled(_) => false,
        }
    }
}

impl From<Aborted> for SyncError {
    fn from(aborted: Aborted) -> Self {
        Self::Store(StoreError::Aborted(aborted))
    }
}
