//! Error types for the codec crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur while decoding history records.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Input ended inside a record.
    #[error("unexpected end of input at offset {offset}: need {needed} bytes, {remaining} left")]
    UnexpectedEof {
        /// Offset of the truncated field.
        offset: usize,
        /// Bytes the field needs.
        needed: usize,
        /// Bytes left in the input.
        remaining: usize,
    },

    /// A record declared a negative payload length.
    #[error("negative payload length {length} at offset {offset}")]
    NegativeLength {
        /// Offset of the length field.
        offset: usize,
        /// Declared length.
        length: i32,
    },

    /// A payload is too large to be encoded.
    #[error("payload of {length} bytes exceeds the format limit")]
    PayloadTooLarge {
        /// Payload length.
        length: usize,
    },
}

impl CodecError {
    /// Creates an end-of-input error.
    pub fn unexpected_eof(offset: usize, needed: usize, remaining: usize) -> Self {
        Self::UnexpectedEof {
            offset,
            needed,
            remaining,
        }
    }
}
