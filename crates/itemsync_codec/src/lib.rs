//! # ItemSync Codec
//!
//! The persisted byte format of item history.
//!
//! A history is a flat append log of records. Each record is
//! `int64 kind || int32 record_id || int32 length || bytes[length]`, with
//! big-endian integers and no header or version. An absent or empty buffer
//! is an empty history.
//!
//! ## Usage
//!
//! ```
//! use bytes::Bytes;
//! use itemsync_codec::{decode_history, encode_history, HistoryRecord};
//!
//! let records = vec![HistoryRecord::new(42, 0, Bytes::from_static(b"comment edit"))];
//! let bytes = encode_history(&records).unwrap();
//! assert_eq!(decode_history(&bytes).unwrap(), records);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod decoder;
mod encoder;
mod error;
mod record;

pub use decoder::{decode_history, HistoryDecoder};
pub use encoder::{encode_history, HistoryEncoder};
pub use error::{CodecError, CodecResult};
pub use record::{next_record_id, HistoryRecord, RECORD_HEADER_LEN};
