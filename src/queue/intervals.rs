//! Disjoint-interval bookkeeping of assigned reference ranges.
//!
//! Each query subtable records which reference `[begin, end)` ranges have
//! already been scheduled against it, partitioned by the rank owning the
//! reference points. Insertion succeeds only when the new range is
//! strictly disjoint from every recorded range under the same rank, which
//! is what makes duplicate task generation a silent no-op.

use crate::types::{Rank, RefRange};
use std::collections::{BTreeMap, HashMap};

/// A set of pairwise-disjoint half-open integer intervals, keyed by rank.
///
/// Cloning is cheap relative to the tree sizes involved and is required:
/// when a query subtree splits, both children inherit the parent's full
/// assignment history.
#[derive(Debug, Clone, Default)]
pub struct DisjointIntervals {
    by_rank: HashMap<Rank, BTreeMap<u64, u64>>,
}

impl DisjointIntervals {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `range` iff it is disjoint from every recorded interval
    /// under the same rank. Returns whether the insertion happened; a
    /// rejected insert leaves the set unchanged.
    pub fn insert(&mut self, range: RefRange) -> bool {
        if range.is_empty() {
            return false;
        }
        let intervals = self.by_rank.entry(range.rank).or_default();

        // The only candidates for overlap are the nearest interval
        // starting at or before `begin` and the first one starting after.
        if let Some((_, &prev_end)) = intervals.range(..=range.begin).next_back() {
            if prev_end > range.begin {
                return false;
            }
        }
        if let Some((&next_begin, _)) = intervals.range(range.begin..).next() {
            if next_begin < range.end {
                return false;
            }
        }
        intervals.insert(range.begin, range.end);
        true
    }

    /// Returns true if `range` was recorded exactly as given.
    #[must_use]
    pub fn contains(&self, range: RefRange) -> bool {
        self.by_rank
            .get(&range.rank)
            .and_then(|intervals| intervals.get(&range.begin))
            .is_some_and(|&end| end == range.end)
    }

    /// Total number of recorded intervals across all ranks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_rank.values().map(BTreeMap::len).sum()
    }

    /// Returns true if nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_rank.values().all(BTreeMap::is_empty)
    }

    /// Iterates over all recorded intervals.
    pub fn iter(&self) -> impl Iterator<Item = RefRange> + '_ {
        self.by_rank.iter().flat_map(|(&rank, intervals)| {
            intervals.iter().map(move |(&begin, &end)| RefRange {
                rank,
                begin,
                end,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(rank: u32, begin: u64, end: u64) -> RefRange {
        RefRange {
            rank: Rank(rank),
            begin,
            end,
        }
    }

    #[test]
    fn disjoint_inserts_succeed() {
        let mut set = DisjointIntervals::new();
        assert!(set.insert(range(0, 0, 4)));
        assert!(set.insert(range(0, 8, 12)));
        assert!(set.insert(range(0, 4, 8)), "touching intervals are disjoint");
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn overlapping_insert_is_rejected_without_mutation() {
        let mut set = DisjointIntervals::new();
        assert!(set.insert(range(0, 0, 8)));
        assert!(!set.insert(range(0, 4, 12)));
        assert!(!set.insert(range(0, 0, 8)), "exact duplicate is rejected");
        assert!(!set.insert(range(0, 2, 3)), "contained range is rejected");
        assert_eq!(set.len(), 1);
        assert!(set.contains(range(0, 0, 8)));
    }

    #[test]
    fn ranks_partition_the_key_space() {
        let mut set = DisjointIntervals::new();
        assert!(set.insert(range(0, 0, 8)));
        assert!(set.insert(range(1, 0, 8)), "same span, different rank");
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn empty_range_is_rejected() {
        let mut set = DisjointIntervals::new();
        assert!(!set.insert(range(0, 4, 4)));
        assert!(set.is_empty());
    }

    #[test]
    fn clones_are_independent() {
        let mut set = DisjointIntervals::new();
        assert!(set.insert(range(0, 0, 4)));
        let mut copy = set.clone();

        assert!(copy.insert(range(0, 4, 8)));
        assert!(set.insert(range(0, 4, 8)), "original unaffected by clone");
        assert!(!copy.insert(range(0, 0, 4)), "history travels with clone");
    }
}
