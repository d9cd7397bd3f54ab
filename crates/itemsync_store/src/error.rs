//! Error types for the attribute store.

use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Signal returned by a transaction body to abort the transaction.
///
/// Nothing written by an aborted body becomes visible.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("transaction aborted: {reason}")]
pub struct Aborted {
    reason: String,
}

impl Aborted {
    /// Creates an abort signal.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    /// Returns why the transaction was aborted.
    pub fn reason(&self) -> &str {
        &self.reason
    }
}

/// Errors that can occur while running store transactions.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The transaction body aborted.
    #[error(transparent)]
    Aborted(#[from] Aborted),

    /// The store was closed before the transaction ran.
    #[error("store is closed")]
    Closed,

    /// The transaction body panicked on a store thread.
    #[error("transaction panicked: {message}")]
    TransactionPanicked {
        /// Panic payload, if it was a string.
        message: String,
    },

    /// Invalid operation.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of the error.
        message: String,
    },

    /// Waiting for a transaction result timed out.
    #[error("timed out waiting for transaction result")]
    Timeout,
}

impl StoreError {
    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Returns true if the transaction body itself requested the abort.
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted(_))
    }

    /// Returns true if running the same transaction again may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Aborted(_) | Self::Timeout)
    }

    pub(crate) fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        Self::TransactionPanicked { message }
    }
}
