//! # ItemSync Testkit
//!
//! Test utilities for ItemSync.
//!
//! This crate provides:
//! - [`SyncFixture`]: a store and sync manager with blocking helpers
//! - Test attributes shaped like issues and their comments
//! - A scripted editor factory, uploader and merge selector
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use itemsync_testkit::prelude::*;
//!
//! #[test]
//! fn edit_marks_item_edited() {
//!     let fixture = SyncFixture::new();
//!     let issue = fixture.create_synced(&[(&*SUMMARY, "first".into())]);
//!     assert!(fixture.edit(issue, &SUMMARY, "second"));
//!     assert_eq!(fixture.state(issue), SyncState::Edited);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod attrs;
pub mod editor;
pub mod fixtures;
pub mod generators;
pub mod merge;
pub mod uploader;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::attrs::*;
    pub use crate::editor::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::merge::*;
    pub use crate::uploader::*;
    pub use itemsync_core::SyncState;
}

pub use editor::{EditorEvent, TestEditor, TestEditorFactory};
pub use fixtures::{SyncFixture, WAIT};
pub use merge::{FnMerge, TestMergeSelector};
pub use uploader::{ScriptedUploader, UploadScript};
