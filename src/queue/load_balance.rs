//! Load-balance request messages.
//!
//! An underloaded process summarizes itself to a peer: which query
//! subtables it already holds (active or on loan), how much local work it
//! has left, and how many extra points its cache can still take. The peer
//! uses the ownership set to avoid exporting a subtable back to a process
//! that already holds it.

use crate::types::{Rank, SubTableId};
use serde::{Deserialize, Serialize};

/// Summary of one process's load, sent to a peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadBalanceRequest {
    origin: Rank,
    owned_query_subtables: Vec<SubTableId>,
    remaining_local_computation: u64,
    remaining_extra_points_to_hold: u64,
}

impl LoadBalanceRequest {
    /// Creates a request. The ownership set is deduplicated and sorted so
    /// membership tests are a binary search.
    #[must_use]
    pub fn new(
        origin: Rank,
        mut owned_query_subtables: Vec<SubTableId>,
        remaining_local_computation: u64,
        remaining_extra_points_to_hold: u64,
    ) -> Self {
        owned_query_subtables.sort_unstable();
        owned_query_subtables.dedup();
        Self {
            origin,
            owned_query_subtables,
            remaining_local_computation,
            remaining_extra_points_to_hold,
        }
    }

    /// The rank that sent the request.
    #[must_use]
    pub const fn origin(&self) -> Rank {
        self.origin
    }

    /// Returns true if the sender already holds the given query subtable.
    #[must_use]
    pub fn query_subtable_is_owned(&self, id: &SubTableId) -> bool {
        self.owned_query_subtables.binary_search(id).is_ok()
    }

    /// Query subtables the sender holds.
    #[must_use]
    pub fn owned_query_subtables(&self) -> &[SubTableId] {
        &self.owned_query_subtables
    }

    /// Work remaining on the sender.
    #[must_use]
    pub const fn remaining_local_computation(&self) -> u64 {
        self.remaining_local_computation
    }

    /// Extra points the sender's cache can still hold.
    #[must_use]
    pub const fn remaining_extra_points_to_hold(&self) -> u64 {
        self.remaining_extra_points_to_hold
    }
}
