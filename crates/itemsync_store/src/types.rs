//! Core type definitions for the attribute store.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of an item.
///
/// Items are opaque positive integers. They carry no type of their own;
/// attributes give them meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ItemId(u64);

impl ItemId {
    /// Creates an item id.
    ///
    /// # Panics
    ///
    /// Panics if `id` is zero.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        assert!(id != 0, "item ids are positive");
        Self(id)
    }

    /// Returns the raw id value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "item:{}", self.0)
    }
}

/// Internal change number.
///
/// Every committed write transaction gets the next ICN. ICNs give a total
/// order of commits and are used to order cache events.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Icn(pub u64);

impl Icn {
    /// The ICN of an empty store.
    pub const ZERO: Icn = Icn(0);

    /// Creates an ICN.
    #[must_use]
    pub const fn new(icn: u64) -> Self {
        Self(icn)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the next ICN.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Icn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "icn:{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn item_id_display() {
        assert_eq!(format!("{}", ItemId::new(42)), "item:42");
    }

    #[test]
    #[should_panic(expected = "item ids are positive")]
    fn zero_item_id_is_rejected() {
        let _ = ItemId::new(0);
    }

    #[test]
    fn icn_next() {
        let icn = Icn::new(5);
        assert_eq!(icn.next().as_u64(), 6);
        assert!(icn < icn.next());
        assert_eq!(Icn::default(), Icn::ZERO);
    }
}
