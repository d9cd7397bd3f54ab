//! Attributes the sync core keeps on every item.
//!
//! Shadow branches are stored as map-valued direct attributes on the item
//! itself; each map holds the shadowable values of that branch.

use itemsync_store::{Attribute, AttributeMap, ValueKind};
use std::sync::LazyLock;

/// Last known server state the local edit is based on.
pub static BASE: LazyLock<Attribute> =
    LazyLock::new(|| Attribute::direct("sync.base", ValueKind::Map));

/// Server state that collides with a pending local edit.
pub static CONFLICT: LazyLock<Attribute> =
    LazyLock::new(|| Attribute::direct("sync.conflict", ValueKind::Map));

/// Most recently downloaded server state, not yet merged.
pub static DOWNLOAD: LazyLock<Attribute> =
    LazyLock::new(|| Attribute::direct("sync.download", ValueKind::Map));

/// TRUNK snapshot taken when the item was prepared for upload.
pub static UPLOAD_TASK: LazyLock<Attribute> =
    LazyLock::new(|| Attribute::direct("sync.uploadTask", ValueKind::Map));

/// Server state confirmed by a finished upload, not yet merged.
pub static DONE_UPLOAD: LazyLock<Attribute> =
    LazyLock::new(|| Attribute::direct("sync.doneUpload", ValueKind::Map));

/// Number of history records confirmed by a finished upload.
pub static DONE_UPLOAD_HISTORY: LazyLock<Attribute> =
    LazyLock::new(|| Attribute::direct("sync.doneUploadHistory", ValueKind::Int));

/// Uploader-defined retry metadata.
pub static UPLOAD_ATTEMPT: LazyLock<Attribute> =
    LazyLock::new(|| Attribute::direct("sync.uploadAttempt", ValueKind::Bytes));

/// Deletion flag. Shadowable, so a deletion is a change like any other.
pub static INVISIBLE: LazyLock<Attribute> =
    LazyLock::new(|| Attribute::shadowable("sync.invisible", ValueKind::Bool));

/// Local existence flag.
pub static EXISTING: LazyLock<Attribute> =
    LazyLock::new(|| Attribute::direct("sync.existing", ValueKind::Bool));

/// Pending local history records.
pub static HISTORY: LazyLock<Attribute> =
    LazyLock::new(|| Attribute::direct("sync.history", ValueKind::Bytes));

/// Shadow values of an item that does not exist on the server yet.
pub fn invisible_map() -> AttributeMap {
    AttributeMap::new().with(&INVISIBLE, true)
}

/// Returns true if the shadow values mark the item deleted.
pub fn is_invisible(values: &AttributeMap) -> bool {
    values
        .get(&INVISIBLE)
        .and_then(|value| value.as_bool())
        .unwrap_or(false)
}
