//! The table-exchange collaborator contract.
//!
//! The exchange layer owns everything that crosses process boundaries:
//! the reference-block cache and its reference counts, routing of
//! subtables toward the ranks that need them, write-home flushes of
//! foreign query subtables, and cluster-wide propagation of completed
//! work. The queue drives it through this trait and consumes what it
//! returns; the exchange never calls back into the queue.

pub mod local;

pub use local::LocalExchange;

use crate::error::Result;
use crate::table::tree::NodeId;
use crate::table::{SubTable, Tree};
use crate::types::{CacheBlockId, Rank, SubTableId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A request to route one reference subtable toward a set of ranks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteRequest {
    /// The subtable to route.
    pub subtable_id: SubTableId,
    /// Ranks that still need the subtable.
    pub destinations: Vec<Rank>,
}

/// A reference subtable that arrived during an exchange round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceivedSubTable {
    /// Identity of the received subtable.
    pub id: SubTableId,
    /// Cache block the payload was stored under.
    pub cache_block_id: CacheBlockId,
}

/// Contract between the task queue and the transport layer.
pub trait TableExchange {
    /// Increments the reference count of a cache block `n` times.
    fn lock_cache(&mut self, id: CacheBlockId, n: u64);

    /// Decrements the reference count of a cache block `n` times. A block
    /// whose count reaches zero becomes evictable. Underflow is an
    /// invariant violation.
    fn release_cache(&mut self, id: CacheBlockId, n: u64) -> Result<()>;

    /// Looks up a cached subtable. Returns `None` for blocks that alias
    /// the local reference tree rather than cached foreign payloads.
    fn find_subtable(&self, id: CacheBlockId) -> Option<&SubTable>;

    /// Stores a subtable in the cache with an initial reference count.
    fn push_subtable(&mut self, subtable: SubTable, n_references: u64) -> CacheBlockId;

    /// Enqueues a foreign query subtable to be written back to its origin.
    fn queue_flush_request(&mut self, subtable: SubTable);

    /// Transmits any pending flush requests.
    fn send_receive_flush_requests(&mut self) -> Result<()>;

    /// Returns true if an exchange round may be issued now.
    fn ready_to_send_receive(&self) -> bool;

    /// Drives one exchange round: drains `outbound` route requests and
    /// returns the reference subtables that arrived.
    fn send_receive(&mut self, outbound: &mut Vec<RouteRequest>) -> Result<Vec<ReceivedSubTable>>;

    /// Propagates a completed-work delta to the rest of the cluster.
    fn push_completed_computation(&mut self, work: u64);

    /// Returns true when no inbound message can still be in flight. Only
    /// meaningful once the local remaining-work budget has reached zero.
    fn can_terminate(&self) -> bool;

    /// Extra points the local cache can still hold.
    fn remaining_extra_points_to_hold(&self) -> u64;

    /// Topology distance from the local process to `rank`, used by the
    /// priority bias.
    fn process_rank(&self, rank: Rank) -> u32;

    /// Whether inter-node load balancing is enabled.
    fn do_load_balancing(&self) -> bool;

    /// The local reference tree.
    fn local_table(&self) -> &Arc<Tree>;

    /// Finds the local reference tree node covering exactly
    /// `[begin, begin + count)`.
    fn find_by_begin_count(&self, begin: u64, count: u64) -> Option<NodeId> {
        self.local_table().find_by_begin_count(begin, count)
    }
}
