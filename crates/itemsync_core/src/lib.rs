//! # ItemSync Core
//!
//! Local-first sync core of an offline issue-tracker client.
//!
//! This crate provides:
//! - The branch model: TRUNK plus the BASE, CONFLICT and DOWNLOAD server
//!   shadows, with branch-aware item views and creators
//! - [`SyncState`], derived on demand from the shadows
//! - All-or-nothing per-item edit locks with polled editor liveness
//! - Edit, download and upload drains
//! - The auto-merge engine with all-or-nothing resolutions
//! - [`SyncManager`], which ties these together
//!
//! ## Architecture
//!
//! Every item keeps its user-facing values in TRUNK. The server state a
//! local edit started from is kept in BASE; downloaded state lands in
//! DOWNLOAD when the item has local state, and is merged into TRUNK right
//! after the download. A merge that cannot be resolved parks the server
//! state in CONFLICT and keeps TRUNK as it is.
//!
//! Uploads are two-phase. Prepare locks items and records what is sent;
//! the write-back records what the server confirmed, attribute by
//! attribute, so a partial upload leaves exactly the unconfirmed changes
//! pending.
//!
//! ## Key Invariants
//!
//! - The server version of an item is the first of DOWNLOAD, CONFLICT and
//!   BASE that exists, else TRUNK
//! - An edit lock is all-or-nothing and is held until released
//! - A merge resolution applies only if it covers every unresolved attribute
//! - An item is never left locked for upload once its process is done

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod branch;
mod config;
mod diff;
mod download;
mod drain;
mod edit;
mod error;
pub mod history;
mod locks;
mod manager;
mod merge;
pub mod schema;
mod state;
mod upload;
mod version;

pub use branch::{Branch, BranchSelector};
pub use config::SyncConfig;
pub use diff::{changed_attributes, ItemDiff};
pub use download::{DownloadDrain, DownloadProcedure};
pub use drain::EditDrain;
pub use edit::{EditCommit, EditControl, EditPhase, EditPrepare, EditorFactory, ItemEditor};
pub use error::{SyncError, SyncResult};
pub use manager::SyncManager;
pub use merge::{
    AutoMergeData, ItemAutoMerge, MergeEvent, MergeListener, MergePolicy, MergeSelector,
    NoAutoMerge, PolicyAutoMerge, UniformMergeSelector,
};
pub use state::SyncState;
pub use upload::{
    ItemUploader, UploadDrain, UploadOutcome, UploadPrepare, UploadProblem, UploadProblemKind,
    UploadProcess, UploadRefusal,
};
pub use version::{
    slave_subtree, BranchSource, Drain, ItemVersion, ItemVersionCreator, Readable, VersionSource,
    Writable,
};
