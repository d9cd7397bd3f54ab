//! Attributes of the test data model: issues with comments slaved to them.

use itemsync_store::{Attribute, ValueKind};
use std::sync::LazyLock;

/// Issue summary.
pub static SUMMARY: LazyLock<Attribute> =
    LazyLock::new(|| Attribute::shadowable("issue.summary", ValueKind::Text));

/// Issue priority.
pub static PRIORITY: LazyLock<Attribute> =
    LazyLock::new(|| Attribute::shadowable("issue.priority", ValueKind::Int));

/// Assigned user item.
pub static ASSIGNEE: LazyLock<Attribute> =
    LazyLock::new(|| Attribute::shadowable("issue.assignee", ValueKind::Ref));

/// Label items.
pub static LABELS: LazyLock<Attribute> =
    LazyLock::new(|| Attribute::shadowable("issue.labels", ValueKind::RefSet));

/// Comment text.
pub static BODY: LazyLock<Attribute> =
    LazyLock::new(|| Attribute::shadowable("comment.body", ValueKind::Text));

/// Issue a comment belongs to.
pub static PARENT: LazyLock<Attribute> = LazyLock::new(|| Attribute::master_ref("comment.parent"));

/// User display name.
pub static USER_NAME: LazyLock<Attribute> =
    LazyLock::new(|| Attribute::shadowable("user.name", ValueKind::Text));

/// Local-only flag, never uploaded.
pub static VIEWED: LazyLock<Attribute> =
    LazyLock::new(|| Attribute::direct("issue.viewed", ValueKind::Bool));

/// Server id assigned on upload.
pub static SERVER_ID: LazyLock<Attribute> =
    LazyLock::new(|| Attribute::direct("issue.serverId", ValueKind::Int));
