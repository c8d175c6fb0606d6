//! Single-process exchange implementation.
//!
//! Implements the [`TableExchange`] contract without any transport: the
//! cache and its reference counts are real, flush requests are delivered
//! to an inspectable log, and quiescence holds once nothing is pending.
//! This is the production path for single-node runs and the reference
//! double for queue tests; a cluster deployment substitutes an MPI-backed
//! implementation of the same trait.

use crate::error::{Error, ErrorKind, Result};
use crate::exchange::{ReceivedSubTable, RouteRequest, TableExchange};
use crate::table::{SubTable, Tree};
use crate::types::{CacheBlockId, Rank, World};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace};

/// In-process table exchange with a reference-counted cache.
#[derive(Debug)]
pub struct LocalExchange {
    rank: Rank,
    n_processes: u32,
    local_table: Arc<Tree>,
    do_load_balancing: bool,
    capacity_points: u64,
    cached_points: u64,
    refcounts: HashMap<CacheBlockId, u64>,
    blocks: HashMap<CacheBlockId, SubTable>,
    next_cache_id: u32,
    pending_flushes: Vec<SubTable>,
    delivered_flushes: Vec<SubTable>,
    inbox: Vec<ReceivedSubTable>,
    completed_work: u64,
}

impl LocalExchange {
    /// Creates an exchange for `world` over the local reference tree, with
    /// a cache budget of `capacity_points` extra points.
    #[must_use]
    pub fn new(
        world: World,
        local_table: Arc<Tree>,
        do_load_balancing: bool,
        capacity_points: u64,
    ) -> Self {
        Self {
            rank: world.rank,
            n_processes: world.n_processes,
            local_table,
            do_load_balancing,
            capacity_points,
            cached_points: 0,
            refcounts: HashMap::new(),
            blocks: HashMap::new(),
            next_cache_id: 0,
            pending_flushes: Vec::new(),
            delivered_flushes: Vec::new(),
            inbox: Vec::new(),
            completed_work: 0,
        }
    }

    /// Seeds the inbox with a subtable, as if a peer had routed it here.
    /// The payload is cached with a zero reference count; task generation
    /// locks it once per task created.
    pub fn inject_received(&mut self, subtable: SubTable) -> ReceivedSubTable {
        let id = subtable.subtable_id();
        let cache_block_id = self.push_subtable(subtable, 0);
        let received = ReceivedSubTable { id, cache_block_id };
        self.inbox.push(received);
        received
    }

    /// The current reference count of a cache block.
    #[must_use]
    pub fn cache_refcount(&self, id: CacheBlockId) -> u64 {
        self.refcounts.get(&id).copied().unwrap_or(0)
    }

    /// Number of flush requests queued but not yet transmitted.
    #[must_use]
    pub fn pending_flush_requests(&self) -> usize {
        self.pending_flushes.len()
    }

    /// Flushed query subtables, in delivery order.
    #[must_use]
    pub fn delivered_flushes(&self) -> &[SubTable] {
        &self.delivered_flushes
    }

    /// Total completed work propagated through this exchange.
    #[must_use]
    pub const fn completed_work(&self) -> u64 {
        self.completed_work
    }

    fn evict_if_unreferenced(&mut self, id: CacheBlockId) {
        if self.refcounts.get(&id).copied() == Some(0) {
            self.refcounts.remove(&id);
            if let Some(block) = self.blocks.remove(&id) {
                self.cached_points = self.cached_points.saturating_sub(block.count());
                trace!(cache_id = %id, points = block.count(), "evicted unreferenced cache block");
            }
        }
    }
}

impl TableExchange for LocalExchange {
    fn lock_cache(&mut self, id: CacheBlockId, n: u64) {
        *self.refcounts.entry(id).or_insert(0) += n;
    }

    fn release_cache(&mut self, id: CacheBlockId, n: u64) -> Result<()> {
        let Some(count) = self.refcounts.get_mut(&id) else {
            debug_assert!(false, "release of unknown cache block {id}");
            return Err(Error::new(ErrorKind::UnknownCacheBlock).with_context(id.to_string()));
        };
        if *count < n {
            debug_assert!(false, "cache refcount underflow on {id}");
            *count = 0;
            self.evict_if_unreferenced(id);
            return Err(Error::new(ErrorKind::CacheUnderflow).with_context(id.to_string()));
        }
        *count -= n;
        self.evict_if_unreferenced(id);
        Ok(())
    }

    fn find_subtable(&self, id: CacheBlockId) -> Option<&SubTable> {
        self.blocks.get(&id)
    }

    fn push_subtable(&mut self, mut subtable: SubTable, n_references: u64) -> CacheBlockId {
        let id = CacheBlockId(self.next_cache_id);
        self.next_cache_id += 1;
        subtable.set_cache_block_id(Some(id));
        self.cached_points += subtable.count();
        self.refcounts.insert(id, n_references);
        self.blocks.insert(id, subtable);
        id
    }

    fn queue_flush_request(&mut self, subtable: SubTable) {
        debug!(id = %subtable.subtable_id(), origin = %subtable.origin_rank(), "queued flush request");
        self.pending_flushes.push(subtable);
    }

    fn send_receive_flush_requests(&mut self) -> Result<()> {
        self.delivered_flushes.append(&mut self.pending_flushes);
        Ok(())
    }

    fn ready_to_send_receive(&self) -> bool {
        true
    }

    fn send_receive(&mut self, outbound: &mut Vec<RouteRequest>) -> Result<Vec<ReceivedSubTable>> {
        // With one process there is nowhere to route to; outbound requests
        // are consumed so the caller does not retry them forever.
        if !outbound.is_empty() {
            trace!(count = outbound.len(), "dropping outbound routes (single process)");
            outbound.clear();
        }
        Ok(std::mem::take(&mut self.inbox))
    }

    fn push_completed_computation(&mut self, work: u64) {
        self.completed_work += work;
    }

    fn can_terminate(&self) -> bool {
        self.pending_flushes.is_empty() && self.inbox.is_empty()
    }

    fn remaining_extra_points_to_hold(&self) -> u64 {
        self.capacity_points.saturating_sub(self.cached_points)
    }

    fn process_rank(&self, rank: Rank) -> u32 {
        // Ring distance: peers nearby in rank order are considered cheap.
        let n = self.n_processes.max(1);
        let forward = rank.0.wrapping_sub(self.rank.0) % n;
        let backward = self.rank.0.wrapping_sub(rank.0) % n;
        forward.min(backward)
    }

    fn do_load_balancing(&self) -> bool {
        self.do_load_balancing
    }

    fn local_table(&self) -> &Arc<Tree> {
        &self.local_table
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exchange(n_points: usize) -> LocalExchange {
        let points: Vec<Vec<f64>> = (0..n_points).map(|i| vec![i as f64]).collect();
        let tree = Arc::new(Tree::build(Rank(0), &points, 2));
        LocalExchange::new(
            World::single(n_points as u64, n_points as u64),
            tree,
            true,
            64,
        )
    }

    fn foreign_subtable(rank: u32, n: usize) -> SubTable {
        let points: Vec<Vec<f64>> = (0..n).map(|i| vec![i as f64]).collect();
        let tree = Arc::new(Tree::build(Rank(rank), &points, n));
        SubTable::new(Arc::clone(&tree), tree.root())
    }

    #[test]
    fn cache_lock_release_ledger() {
        let mut exchange = exchange(8);
        let id = exchange.push_subtable(foreign_subtable(1, 4), 1);
        assert_eq!(exchange.cache_refcount(id), 1);

        exchange.lock_cache(id, 2);
        assert_eq!(exchange.cache_refcount(id), 3);

        exchange.release_cache(id, 3).unwrap();
        assert_eq!(exchange.cache_refcount(id), 0);
        assert!(exchange.find_subtable(id).is_none(), "evicted at zero");
    }

    #[test]
    #[cfg(not(debug_assertions))]
    fn release_underflow_is_reported() {
        let mut exchange = exchange(8);
        let id = exchange.push_subtable(foreign_subtable(1, 4), 1);
        let err = exchange.release_cache(id, 2).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::CacheUnderflow);
    }

    #[test]
    fn capacity_tracks_cached_points() {
        let mut exchange = exchange(8);
        assert_eq!(exchange.remaining_extra_points_to_hold(), 64);
        let id = exchange.push_subtable(foreign_subtable(1, 4), 1);
        assert_eq!(exchange.remaining_extra_points_to_hold(), 60);
        exchange.release_cache(id, 1).unwrap();
        assert_eq!(exchange.remaining_extra_points_to_hold(), 64);
    }

    #[test]
    fn flush_requests_deliver_in_order() {
        let mut exchange = exchange(8);
        exchange.queue_flush_request(foreign_subtable(1, 4));
        assert_eq!(exchange.pending_flush_requests(), 1);
        assert!(!exchange.can_terminate());

        exchange.send_receive_flush_requests().unwrap();
        assert_eq!(exchange.pending_flush_requests(), 0);
        assert_eq!(exchange.delivered_flushes().len(), 1);
        assert!(exchange.can_terminate());
    }

    #[test]
    fn inject_received_feeds_one_round() {
        let mut exchange = exchange(8);
        let received = exchange.inject_received(foreign_subtable(1, 4));
        assert!(!exchange.can_terminate());

        let mut outbound = Vec::new();
        let arrived = exchange.send_receive(&mut outbound).unwrap();
        assert_eq!(arrived, vec![received]);
        assert!(exchange.send_receive(&mut outbound).unwrap().is_empty());
    }

    #[test]
    fn ring_distance() {
        let points: Vec<Vec<f64>> = (0..4).map(|i| vec![f64::from(i)]).collect();
        let tree = Arc::new(Tree::build(Rank(1), &points, 2));
        let world = World {
            rank: Rank(1),
            n_processes: 4,
            total_query_points: 4,
            total_reference_points: 4,
        };
        let exchange = LocalExchange::new(world, tree, false, 0);
        assert_eq!(exchange.process_rank(Rank(1)), 0);
        assert_eq!(exchange.process_rank(Rank(2)), 1);
        assert_eq!(exchange.process_rank(Rank(3)), 2);
        assert_eq!(exchange.process_rank(Rank(0)), 1);
    }
}
