//! The task item: one scheduled (query subtable, reference subtable) pair.

use crate::table::SubTable;
use crate::types::{CacheBlockId, RefRange};

/// An immutable record of one scheduled dual-tree pair.
///
/// The priority is fixed at creation from the bounds of the two subtables;
/// the work estimate is the product of their point counts and feeds the
/// remaining-work accounting.
#[derive(Debug, Clone)]
pub struct Task {
    query_subtable: SubTable,
    reference_subtable: SubTable,
    priority: f64,
    work: u64,
}

impl Task {
    /// Creates a task over the given pair with a precomputed priority.
    #[must_use]
    pub fn new(query_subtable: SubTable, reference_subtable: SubTable, priority: f64) -> Self {
        let work = query_subtable.count() * reference_subtable.count();
        Self {
            query_subtable,
            reference_subtable,
            priority,
            work,
        }
    }

    /// The query side of the pair.
    #[must_use]
    pub fn query_subtable(&self) -> &SubTable {
        &self.query_subtable
    }

    /// The reference side of the pair.
    #[must_use]
    pub fn reference_subtable(&self) -> &SubTable {
        &self.reference_subtable
    }

    /// The cache block backing the reference subtable, or `None` when it
    /// is rooted in the local reference tree.
    #[must_use]
    pub fn reference_cache_block_id(&self) -> Option<CacheBlockId> {
        self.reference_subtable.cache_block_id()
    }

    /// The reference grid key of the pair.
    #[must_use]
    pub fn reference_range(&self) -> RefRange {
        RefRange::from_id(self.reference_subtable.subtable_id())
    }

    /// Scheduling priority; larger runs earlier.
    #[must_use]
    pub const fn priority(&self) -> f64 {
        self.priority
    }

    /// Estimated work: query points times reference points.
    #[must_use]
    pub const fn work(&self) -> u64 {
        self.work
    }
}
