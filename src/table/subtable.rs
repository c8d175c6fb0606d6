//! Subtable aliases and query-result accumulators.
//!
//! A subtable is a view onto a subtree of some rank's tree: the local
//! query tree, the local reference tree, or a foreign subtree received
//! through the exchange layer. Aliasing is cheap (the tree is shared), so
//! the queue freely re-roots and duplicates subtables as it splits and
//! exports work.

use crate::table::tree::{Bound, NodeId, Tree};
use crate::types::{CacheBlockId, Rank, SubTableId};
use core::fmt;
use parking_lot::Mutex;
use std::sync::Arc;

/// Per-point accumulator the kernel writes into.
///
/// The queue never interprets the values; it only moves them around when a
/// checked-out query subtable is flushed home or synchronized back.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    values: Vec<f64>,
}

impl QueryResult {
    /// Creates a zeroed accumulator for `n` points.
    #[must_use]
    pub fn new(n: usize) -> Self {
        Self {
            values: vec![0.0; n],
        }
    }

    /// Number of points covered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if the accumulator covers no points.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The accumulated value for one point.
    #[must_use]
    pub fn get(&self, index: usize) -> f64 {
        self.values[index]
    }

    /// Adds into one point's accumulator.
    pub fn accumulate(&mut self, index: usize, value: f64) {
        self.values[index] += value;
    }

    /// Overwrites the `[begin, end)` range with values from `other`.
    ///
    /// Ranges outside either accumulator are ignored; a remote writeback
    /// may cover only part of the local table.
    pub fn copy_range_from(&mut self, other: &Self, begin: u64, end: u64) {
        let begin = begin as usize;
        let end = (end as usize).min(self.values.len()).min(other.values.len());
        if begin < end {
            self.values[begin..end].copy_from_slice(&other.values[begin..end]);
        }
    }
}

/// An alias onto a subtree, together with its routing metadata.
#[derive(Clone)]
pub struct SubTable {
    tree: Arc<Tree>,
    start_node: NodeId,
    origin_rank: Rank,
    cache_block_id: Option<CacheBlockId>,
    query_result: Option<Arc<Mutex<QueryResult>>>,
}

impl SubTable {
    /// Creates a subtable rooted at `start_node` of `tree`.
    ///
    /// The origin rank starts as the tree's own rank; imports overwrite it
    /// with the sender's rank.
    #[must_use]
    pub fn new(tree: Arc<Tree>, start_node: NodeId) -> Self {
        let origin_rank = tree.rank();
        Self {
            tree,
            start_node,
            origin_rank,
            cache_block_id: None,
            query_result: None,
        }
    }

    /// The tree this subtable aliases.
    #[must_use]
    pub fn tree(&self) -> &Arc<Tree> {
        &self.tree
    }

    /// Rank owning the aliased tree.
    #[must_use]
    pub fn rank(&self) -> Rank {
        self.tree.rank()
    }

    /// Rank the subtable was received from (equals [`rank`](Self::rank)
    /// for locally rooted subtables).
    #[must_use]
    pub const fn origin_rank(&self) -> Rank {
        self.origin_rank
    }

    /// Sets the rank the subtable was received from.
    pub fn set_origin_rank(&mut self, rank: Rank) {
        self.origin_rank = rank;
    }

    /// The subtree root this alias starts at.
    #[must_use]
    pub const fn start_node(&self) -> NodeId {
        self.start_node
    }

    /// Re-roots the alias at another node of the same tree.
    pub fn set_start_node(&mut self, node: NodeId) {
        self.start_node = node;
    }

    /// The exchange-cache block backing this subtable, or `None` when the
    /// subtable is rooted in a local tree.
    #[must_use]
    pub const fn cache_block_id(&self) -> Option<CacheBlockId> {
        self.cache_block_id
    }

    /// Sets the exchange-cache block backing this subtable.
    pub fn set_cache_block_id(&mut self, id: Option<CacheBlockId>) {
        self.cache_block_id = id;
    }

    /// The shared query-result accumulator, if one is attached.
    #[must_use]
    pub fn query_result(&self) -> Option<&Arc<Mutex<QueryResult>>> {
        self.query_result.as_ref()
    }

    /// Attaches a shared query-result accumulator.
    pub fn set_query_result(&mut self, result: Arc<Mutex<QueryResult>>) {
        self.query_result = Some(result);
    }

    /// The `(rank, begin, count)` triple naming this subtable.
    #[must_use]
    pub fn subtable_id(&self) -> SubTableId {
        let node = self.tree.node(self.start_node);
        SubTableId::new(self.tree.rank(), node.begin, node.count)
    }

    /// Number of points covered by the subtable.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.tree.node(self.start_node).count
    }

    /// Bounding volume of the subtable's root.
    #[must_use]
    pub fn bound(&self) -> &Bound {
        &self.tree.node(self.start_node).bound
    }

    /// Returns true if the subtable's root has no children.
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        self.tree.node(self.start_node).is_leaf()
    }

    /// Returns true if `other` names a node within this subtable's range
    /// on the same rank.
    #[must_use]
    pub fn includes(&self, other: &Self) -> bool {
        self.subtable_id().includes(&other.subtable_id())
    }

    /// Copies `other`'s accumulated results for its covered range into
    /// this subtable's accumulator.
    ///
    /// A no-op when either side has no accumulator attached.
    pub fn copy_results_from(&self, other: &Self) {
        let (Some(own), Some(theirs)) = (&self.query_result, &other.query_result) else {
            return;
        };
        let id = other.subtable_id();
        if Arc::ptr_eq(own, theirs) {
            return;
        }
        own.lock().copy_range_from(&theirs.lock(), id.begin, id.end());
    }
}

impl fmt::Debug for SubTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubTable")
            .field("id", &self.subtable_id())
            .field("origin_rank", &self.origin_rank)
            .field("cache_block_id", &self.cache_block_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::tree::Tree;

    fn test_tree(rank: Rank, n: usize) -> Arc<Tree> {
        let points: Vec<Vec<f64>> = (0..n).map(|i| vec![i as f64]).collect();
        Arc::new(Tree::build(rank, &points, 2))
    }

    #[test]
    fn subtable_id_follows_start_node() {
        let tree = test_tree(Rank(1), 8);
        let mut sub = SubTable::new(Arc::clone(&tree), tree.root());
        assert_eq!(sub.subtable_id(), SubTableId::new(Rank(1), 0, 8));

        let left = tree.node(tree.root()).left.unwrap();
        sub.set_start_node(left);
        let id = sub.subtable_id();
        assert_eq!(id.rank, Rank(1));
        assert_eq!(id.begin, 0);
        assert!(id.count < 8);
    }

    #[test]
    fn includes_matches_id_containment() {
        let tree = test_tree(Rank(0), 8);
        let whole = SubTable::new(Arc::clone(&tree), tree.root());
        let mut half = whole.clone();
        half.set_start_node(tree.node(tree.root()).left.unwrap());

        assert!(whole.includes(&half));
        assert!(whole.includes(&whole));
        assert!(!half.includes(&whole));
    }

    #[test]
    fn copy_results_covers_received_range_only() {
        let tree = test_tree(Rank(0), 8);
        let mut local = SubTable::new(Arc::clone(&tree), tree.root());
        local.set_query_result(Arc::new(Mutex::new(QueryResult::new(8))));

        let mut received = SubTable::new(Arc::clone(&tree), tree.root());
        received.set_start_node(tree.node(tree.root()).left.unwrap());
        let mut values = QueryResult::new(8);
        for i in 0..8 {
            values.accumulate(i, 1.0 + i as f64);
        }
        received.set_query_result(Arc::new(Mutex::new(values)));

        local.copy_results_from(&received);
        let merged = local.query_result().unwrap().lock();
        let half = received.count() as usize;
        for i in 0..half {
            assert_eq!(merged.get(i), 1.0 + i as f64);
        }
        for i in half..8 {
            assert_eq!(merged.get(i), 0.0);
        }
    }
}
