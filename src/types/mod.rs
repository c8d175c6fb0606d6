//! Core types for the dual-tree task queue.
//!
//! - [`id`]: identifier types (`Rank`, `SubTableId`, `CacheBlockId`, `LockId`)
//! - [`RefRange`]: a reference grid key used for assigned-work bookkeeping
//! - [`World`]: the cluster snapshot a queue is created against

pub mod id;

pub use id::{CacheBlockId, LockId, Rank, SubTableId};

use serde::{Deserialize, Serialize};

/// A half-open range of reference points owned by one rank.
///
/// This is the key under which scheduled work is recorded in the
/// disjoint-interval set: a `(query subtable, RefRange)` pair is scheduled
/// at most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RefRange {
    /// Rank owning the reference points.
    pub rank: Rank,
    /// First reference point index (inclusive).
    pub begin: u64,
    /// One past the last reference point index.
    pub end: u64,
}

impl RefRange {
    /// Creates a reference range from an id's `(rank, begin, count)` triple.
    #[must_use]
    pub const fn from_id(id: SubTableId) -> Self {
        Self {
            rank: id.rank,
            begin: id.begin,
            end: id.begin + id.count,
        }
    }

    /// Number of points covered by the range.
    #[must_use]
    pub const fn len(&self) -> u64 {
        self.end - self.begin
    }

    /// Returns true if the range covers no points.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.end <= self.begin
    }
}

/// Snapshot of the cluster a queue instance participates in.
///
/// The totals seed the global remaining-work budget: the computation is
/// finished when every (query point, reference point) pair across the
/// cluster has been accounted for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct World {
    /// Rank of the local process.
    pub rank: Rank,
    /// Number of processes in the cluster.
    pub n_processes: u32,
    /// Total number of query points across all ranks.
    pub total_query_points: u64,
    /// Total number of reference points across all ranks.
    pub total_reference_points: u64,
}

impl World {
    /// A single-process world over the given point counts.
    #[must_use]
    pub const fn single(query_points: u64, reference_points: u64) -> Self {
        Self {
            rank: Rank(0),
            n_processes: 1,
            total_query_points: query_points,
            total_reference_points: reference_points,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ref_range_from_id() {
        let id = SubTableId::new(Rank(2), 8, 4);
        let range = RefRange::from_id(id);
        assert_eq!(range.rank, Rank(2));
        assert_eq!(range.begin, 8);
        assert_eq!(range.end, 12);
        assert_eq!(range.len(), 4);
        assert!(!range.is_empty());
    }

    #[test]
    fn single_process_world() {
        let world = World::single(100, 200);
        assert_eq!(world.rank, Rank(0));
        assert_eq!(world.n_processes, 1);
        assert_eq!(world.total_query_points, 100);
        assert_eq!(world.total_reference_points, 200);
    }
}
