//! # ItemSync Store
//!
//! The transactional attribute store the sync core runs on.
//!
//! This crate provides:
//! - Item ids, ICNs, typed attributes and values
//! - Read and write transactions with read-your-writes
//! - An in-memory [`Store`] with a single writer thread and commit
//!   notifications in ICN order
//! - [`DbResult`] handles for transactions running in the background
//! - Thread gates, lifespans and modifiables used for callback delivery
//!
//! ## Transactions
//!
//! Transaction bodies are closures returning `Result<T, Aborted>`. Returning
//! `Err(Aborted)` discards every write of the body:
//!
//! ```
//! use itemsync_store::{Aborted, Attribute, Store, Value, ValueKind};
//!
//! let store = Store::new();
//! let text = Attribute::shadowable("doc.text", ValueKind::Text);
//! let t = text.clone();
//! let item = store
//!     .write(move |w| {
//!         let item = w.create_item();
//!         w.set(item, &t, Some(Value::from("hello")));
//!         Ok(item)
//!     })
//!     .wait()
//!     .unwrap();
//!
//! let result = store.write_now(|w| {
//!     w.set(item, &text, None);
//!     Err::<(), _>(Aborted::new("changed my mind"))
//! });
//! assert!(result.is_err());
//! assert_eq!(
//!     store.read_now(|r| Ok(r.get(item, &text))).unwrap(),
//!     Some(Value::from("hello"))
//! );
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod attribute;
mod config;
mod error;
mod gate;
mod lifespan;
mod listener;
mod modifiable;
mod query;
mod result;
mod store;
mod transaction;
mod types;
mod value;

pub use attribute::{Attribute, AttributeMap, ValueKind};
pub use config::StoreConfig;
pub use error::{Aborted, StoreError, StoreResult};
pub use gate::{ConfinedGate, Gate};
pub use lifespan::Lifespan;
pub use listener::{DbEvent, DbListener};
pub use modifiable::Modifiable;
pub use query::Query;
pub use result::DbResult;
pub use store::Store;
pub use transaction::{Reader, Writer};
pub use types::{Icn, ItemId};
pub use value::{values_equal, Value};
