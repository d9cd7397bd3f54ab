//! # ItemSync Cache
//!
//! A live image of store data for presentation code.
//!
//! This crate provides:
//! - [`DbImage`]: follows store commits on a background update thread
//! - Slices: item sets kept current, defined by hand
//!   ([`ManualImageSlice`]) or by a query ([`QueryImageSlice`])
//! - [`DataLoader`]s computing the values kept per item, with dependency
//!   tracking for values read from other items
//! - [`ImageSliceEvent`]s delivered on a gate in ICN order
//!
//! ## Example
//!
//! ```
//! use itemsync_cache::{AttributeLoader, DbImage};
//! use itemsync_store::{Attribute, Gate, Query, Store, Value, ValueKind};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let store = Store::new();
//! let title = Attribute::shadowable("doc.title", ValueKind::Text);
//! let image = DbImage::new(store.clone(), Gate::Straight);
//! let titles = image.register_loader(Arc::new(AttributeLoader::new(&title)));
//! image.start().unwrap();
//!
//! let slice = image.query_slice(Query::has(&title), &[titles]).unwrap();
//! let t = title.clone();
//! let item = store
//!     .write(move |w| {
//!         let item = w.create_item();
//!         w.set(item, &t, Some(Value::from("hello")));
//!         Ok(item)
//!     })
//!     .wait()
//!     .unwrap();
//!
//! assert!(image.wait_idle(Duration::from_secs(5)));
//! assert_eq!(slice.items(), vec![item]);
//! assert_eq!(slice.get_value(item, titles), Some(Value::from("hello")));
//! image.stop();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod event;
mod image;
mod loader;
mod slice;
mod update;

pub use config::ImageConfig;
pub use error::{CacheError, CacheResult};
pub use event::ImageSliceEvent;
pub use image::DbImage;
pub use loader::{AttributeLoader, DataLoader, FnLoader, LoadContext, LoaderKey, ReferenceLoader};
pub use slice::{
    ImageSlice, ManualImageSlice, QueryImageSlice, SliceId, SliceListener, SliceState,
};
