//! Value branches and branch selection.

use crate::schema::{self, BASE, CONFLICT, DONE_UPLOAD, DOWNLOAD};
use itemsync_store::{Attribute, AttributeMap, ItemId, Reader, Value};
use std::fmt;

/// One of the value branches of an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Branch {
    /// The primary, user-visible state.
    Trunk,
    /// Last known synced server state.
    Base,
    /// Server state colliding with a pending local edit.
    Conflict,
    /// Most recently fetched server state, not yet promoted.
    Download,
}

impl Branch {
    /// Server branches in the order "server" reads prefer them.
    pub const SERVER_ORDER: [Branch; 3] = [Branch::Download, Branch::Conflict, Branch::Base];

    /// The attribute holding this branch's shadow map, `None` for TRUNK.
    pub fn shadow_attribute(self) -> Option<&'static Attribute> {
        match self {
            Branch::Trunk => None,
            Branch::Base => Some(&*BASE),
            Branch::Conflict => Some(&*CONFLICT),
            Branch::Download => Some(&*DOWNLOAD),
        }
    }

    /// Returns true for TRUNK.
    pub fn is_trunk(self) -> bool {
        self == Branch::Trunk
    }
}

impl fmt::Display for Branch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Branch::Trunk => "TRUNK",
            Branch::Base => "BASE",
            Branch::Conflict => "CONFLICT",
            Branch::Download => "DOWNLOAD",
        };
        f.write_str(name)
    }
}

/// How a version picks the branch it reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BranchSelector {
    /// Always read this branch.
    Pinned(Branch),
    /// Read the latest server state: DOWNLOAD, else CONFLICT, else BASE,
    /// else TRUNK.
    FollowServer,
}

impl BranchSelector {
    /// Selector for TRUNK.
    pub const TRUNK: BranchSelector = BranchSelector::Pinned(Branch::Trunk);

    /// Resolves the selector for one item.
    pub fn resolve(self, reader: &dyn Reader, item: ItemId) -> Branch {
        match self {
            BranchSelector::Pinned(branch) => branch,
            BranchSelector::FollowServer => server_branch(reader, item),
        }
    }
}

/// Returns the branch a server read of `item` uses.
pub fn server_branch(reader: &dyn Reader, item: ItemId) -> Branch {
    Branch::SERVER_ORDER
        .into_iter()
        .find(|branch| {
            branch
                .shadow_attribute()
                .is_some_and(|attribute| reader.get(item, attribute).is_some())
        })
        .unwrap_or(Branch::Trunk)
}

/// Reads one attribute on a branch.
///
/// Direct attributes have a single value shared by all branches. A pinned
/// shadow branch that does not exist has no shadowable values.
pub fn read_value(
    reader: &dyn Reader,
    item: ItemId,
    branch: Branch,
    attribute: &Attribute,
) -> Option<Value> {
    match branch.shadow_attribute() {
        Some(shadow) if attribute.is_shadowable() => reader
            .get_map(item, shadow)
            .and_then(|map| map.get(attribute).cloned()),
        _ => reader.get(item, attribute),
    }
}

/// Returns the shadowable values of a branch, `None` if the shadow does not
/// exist.
pub fn branch_values(reader: &dyn Reader, item: ItemId, branch: Branch) -> Option<AttributeMap> {
    match branch.shadow_attribute() {
        None => Some(trunk_shadowables(reader, item)),
        Some(shadow) => reader.get_map(item, shadow),
    }
}

/// Shadowable TRUNK values.
pub fn trunk_shadowables(reader: &dyn Reader, item: ItemId) -> AttributeMap {
    reader.values(item).shadowable_only()
}

/// The last server state known locally: DOWNLOAD, else CONFLICT, else the
/// confirmed upload result, else BASE.
pub fn last_server(reader: &dyn Reader, item: ItemId) -> Option<AttributeMap> {
    reader
        .get_map(item, &DOWNLOAD)
        .or_else(|| reader.get_map(item, &CONFLICT))
        .or_else(|| reader.get_map(item, &DONE_UPLOAD))
        .or_else(|| reader.get_map(item, &BASE))
}

/// Base an edit starting now would record: BASE if present, TRUNK otherwise.
pub fn collect_base(reader: &dyn Reader, item: ItemId) -> AttributeMap {
    reader
        .get_map(item, &BASE)
        .unwrap_or_else(|| trunk_shadowables(reader, item))
}

/// The item was created locally and never reached the server.
pub fn is_new(reader: &dyn Reader, item: ItemId) -> bool {
    reader
        .get_map(item, &BASE)
        .is_some_and(|base| schema::is_invisible(&base))
        && reader.get(item, &DOWNLOAD).is_none()
        && reader.get(item, &CONFLICT).is_none()
}

/// The item has no local values at all.
pub fn is_removed(reader: &dyn Reader, item: ItemId) -> bool {
    reader.values(item).is_empty()
}
