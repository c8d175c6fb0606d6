//! Identifier types for queue entities.
//!
//! These wrap raw integers and arena indices with type safety: ranks,
//! subtable ids, cache block handles, and checked-out record handles.

use crate::util::ArenaIndex;
use core::fmt;
use serde::{Deserialize, Serialize};

/// The rank of a process in the cluster.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Rank(pub u32);

impl fmt::Debug for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Rank({})", self.0)
    }
}

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}", self.0)
    }
}

/// Identifies a subtree node in some rank's tree: the node owned by
/// `rank` covering point indices `[begin, begin + count)`.
///
/// The triple is unique within a tree, so it names both query and
/// reference subtables on the wire.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SubTableId {
    /// Rank owning the tree the node belongs to.
    pub rank: Rank,
    /// First point index covered by the node.
    pub begin: u64,
    /// Number of points covered by the node.
    pub count: u64,
}

impl SubTableId {
    /// Creates a subtable id.
    #[must_use]
    pub const fn new(rank: Rank, begin: u64, count: u64) -> Self {
        Self { rank, begin, count }
    }

    /// One past the last covered point index.
    #[must_use]
    pub const fn end(&self) -> u64 {
        self.begin + self.count
    }

    /// Returns true if `other` names a node within this node's range on
    /// the same rank. Every id includes itself.
    #[must_use]
    pub const fn includes(&self, other: &Self) -> bool {
        self.rank.0 == other.rank.0 && self.begin <= other.begin && other.end() <= self.end()
    }
}

impl fmt::Debug for SubTableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SubTableId({}:{}+{})", self.rank.0, self.begin, self.count)
    }
}

impl fmt::Display for SubTableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}+{}", self.rank, self.begin, self.count)
    }
}

/// Index of a reference block in the exchange layer's cache.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CacheBlockId(pub u32);

impl fmt::Debug for CacheBlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CacheBlockId({})", self.0)
    }
}

impl fmt::Display for CacheBlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{}", self.0)
    }
}

/// Handle naming a checked-out query subtable record.
///
/// Wraps a generational arena index, so a stale handle (for a record that
/// was already returned) is detected rather than resolving to a reused slot.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LockId(pub(crate) ArenaIndex);

impl LockId {
    /// Creates a lock id from an arena index (internal use).
    #[must_use]
    pub(crate) const fn from_arena(index: ArenaIndex) -> Self {
        Self(index)
    }

    /// Returns the underlying arena index (internal use).
    #[must_use]
    pub(crate) const fn arena_index(self) -> ArenaIndex {
        self.0
    }

    /// Creates a lock id for testing purposes.
    #[doc(hidden)]
    #[must_use]
    pub const fn new_for_test(index: u32, generation: u32) -> Self {
        Self(ArenaIndex::new(index, generation))
    }
}

impl fmt::Debug for LockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LockId({}:{})", self.0.index(), self.0.generation())
    }
}

impl fmt::Display for LockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0.index())
    }
}
