//! The distributed dual-tree task queue.
//!
//! The queue coordinates one process's worker threads over a population
//! of query subtables, each with its own priority queue of
//! (query subtable, reference subtable) tasks:
//!
//! - [`intervals`]: disjoint-interval record of scheduled reference ranges
//! - [`task`]: the immutable task item
//! - [`task_heap`]: per-slot max-heap of tasks
//! - [`lock`]: checked-out query subtable records
//! - [`load_balance`]: peer load summaries
//! - [`task_list`]: budget-bounded work export
//!
//! All state lives behind one mutex: public methods lock once and
//! delegate to `QueueCore`, whose operations call each other freely
//! (the inner/outer split replaces the recursive lock of OpenMP-style
//! designs). Workers hold the lock only for queue bookkeeping, never
//! while evaluating a task's numeric work.

pub mod intervals;
pub mod load_balance;
pub mod lock;
pub(crate) mod slot;
pub mod task;
pub mod task_heap;
pub mod task_list;

pub use intervals::DisjointIntervals;
pub use load_balance::LoadBalanceRequest;
pub use lock::CheckedOutSubTable;
pub use task::Task;
pub use task_heap::TaskHeap;
pub use task_list::{ExportEntry, ExtraTaskList, ExtraTaskListManifest};

use crate::config::QueueConfig;
use crate::error::Result;
use crate::exchange::{ReceivedSubTable, RouteRequest, TableExchange};
use crate::metric::Metric;
use crate::queue::slot::Slot;
use crate::table::{QueryResult, SubTable, Tree};
use crate::types::{CacheBlockId, LockId, Rank, RefRange, SubTableId, World};
use crate::util::Arena;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// A task handed to a worker, with the lock taken on its query subtable
/// when check-out was requested.
#[derive(Debug)]
pub struct DequeuedTask {
    /// The task to evaluate.
    pub task: Task,
    /// Lock on the task's query subtable, present iff check-out was
    /// requested. The worker must return it when done.
    pub lock: Option<LockId>,
}

/// Point-in-time view of one active slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotSnapshot {
    /// Id of the slot's query subtable.
    pub id: SubTableId,
    /// Rank the subtable was received from.
    pub origin_rank: Rank,
    /// Pending task count.
    pub num_tasks: usize,
    /// Sum of the pending tasks' work estimates.
    pub pending_work: u64,
    /// Reference points not yet completed against the subtable.
    pub remaining_work: u64,
    /// Number of recorded assignment intervals.
    pub num_assigned: usize,
}

/// Point-in-time view of one checked-out record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckedOutSnapshot {
    /// Id of the query subtable on loan.
    pub id: SubTableId,
    /// Rank holding the loan.
    pub locked_to: Rank,
    /// Tasks parked on the record.
    pub num_tasks: usize,
    /// Sum of the parked tasks' work estimates.
    pub pending_work: u64,
    /// Reference points not yet completed against the subtable.
    pub remaining_work: u64,
}

/// Structured status dump of the whole queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSnapshot {
    /// Active slots, ordered by subtable id.
    pub active: Vec<SlotSnapshot>,
    /// Checked-out records, ordered by subtable id.
    pub checked_out: Vec<CheckedOutSnapshot>,
    /// Tasks pending across slots and records.
    pub num_remaining_tasks: usize,
    /// Sum of work estimates of all pending tasks.
    pub remaining_local_computation: u64,
    /// Global remaining-work budget as seen by this process.
    pub remaining_global_computation: u64,
}

struct QueueCore<E> {
    my_rank: Rank,
    num_threads: usize,
    rank_favor_factor: f64,
    slots: Vec<Slot>,
    checked_out: Arena<CheckedOutSubTable>,
    exchange: E,
    num_remaining_tasks: usize,
    num_imported_query_subtables: usize,
    num_exported_query_subtables: usize,
    remaining_local_computation: u64,
    remaining_global_computation: u64,
}

/// The scheduler: slot vector, checked-out list, counters, and the
/// exchange handle, all serialized by one lock.
pub struct DistributedDualtreeTaskQueue<E> {
    inner: Mutex<QueueCore<E>>,
}

fn priority_for<E: TableExchange, M: Metric>(
    exchange: &E,
    rank_favor_factor: f64,
    metric: &M,
    query: &SubTable,
    reference: &SubTable,
) -> f64 {
    let distance = metric.range_distance_sq(query.bound(), reference.bound());
    -distance.mid() - rank_favor_factor * f64::from(exchange.process_rank(reference.rank()))
}

impl<E: TableExchange> DistributedDualtreeTaskQueue<E> {
    /// Creates a queue over the local query tree.
    ///
    /// The tree is partitioned into a frontier of disjoint subtrees: the
    /// largest node exceeding `config.max_subtree_size` points is split
    /// until none remains or the frontier reaches
    /// `config.slots_per_thread * config.num_threads` entries. Every
    /// frontier node becomes a slot sharing `query_result`, with its
    /// remaining work seeded to the cluster-wide reference point total.
    #[must_use]
    pub fn new(
        world: World,
        mut config: QueueConfig,
        exchange: E,
        query_tree: &Arc<Tree>,
        query_result: &Arc<Mutex<QueryResult>>,
    ) -> Self {
        config.normalize();

        let frontier = query_tree.frontier_bounded_by(
            config.slots_per_thread * config.num_threads,
            config.max_subtree_size,
        );
        let slots: Vec<Slot> = frontier
            .into_iter()
            .map(|node| {
                let mut subtable = SubTable::new(Arc::clone(query_tree), node);
                subtable.set_query_result(Arc::clone(query_result));
                Slot::new(subtable, world.total_reference_points)
            })
            .collect();

        let remaining_global_computation = world
            .total_query_points
            .checked_mul(world.total_reference_points)
            .unwrap_or_else(|| {
                debug_assert!(false, "global work budget overflows u64");
                u64::MAX
            });

        debug!(
            rank = %world.rank,
            slots = slots.len(),
            remaining_global = remaining_global_computation,
            "task queue initialized"
        );

        Self {
            inner: Mutex::new(QueueCore {
                my_rank: world.rank,
                num_threads: config.num_threads,
                rank_favor_factor: config.rank_favor_factor,
                slots,
                checked_out: Arena::new(),
                exchange,
                num_remaining_tasks: 0,
                num_imported_query_subtables: 0,
                num_exported_query_subtables: 0,
                remaining_local_computation: 0,
                remaining_global_computation,
            }),
        }
    }

    // === Slot lifecycle ===

    /// Appends a slot for a foreign query subtable received from
    /// `origin_rank`. Foreign work is tracked by its origin, so the new
    /// slot's remaining work is zero. Returns the new slot index.
    pub fn push_new_queue(&self, origin_rank: Rank, mut query_subtable: SubTable) -> usize {
        let mut core = self.inner.lock();
        query_subtable.set_origin_rank(origin_rank);
        debug!(
            id = %query_subtable.subtable_id(),
            from = %origin_rank,
            "imported query subtable"
        );
        core.slots.push(Slot::new(query_subtable, 0));
        core.num_imported_query_subtables += 1;
        core.slots.len() - 1
    }

    /// Creates a task pairing slot `slot_index`'s query subtable with
    /// `reference`, at the priority given by the metric and rank bias.
    /// Returns false if the slot index is out of range.
    pub fn push_task<M: Metric>(&self, metric: &M, slot_index: usize, reference: SubTable) -> bool {
        let mut core = self.inner.lock();
        if slot_index >= core.slots.len() {
            return false;
        }
        core.push_task_at(metric, slot_index, reference);
        true
    }

    /// Checks out the slot at `slot_index` to `peer_rank`, moving its
    /// contents into a checked-out record. Returns the record's lock id,
    /// or `None` if the index is out of range.
    pub fn lock_query_subtable(&self, slot_index: usize, peer_rank: Rank) -> Option<LockId> {
        let mut core = self.inner.lock();
        (slot_index < core.slots.len()).then(|| core.lock_slot(slot_index, peer_rank))
    }

    /// Returns a checked-out record's contents to the active slots.
    /// Returns false if the lock id is stale.
    pub fn return_query_subtable(&self, lock: LockId) -> bool {
        let mut core = self.inner.lock();
        let Some(record) = core.checked_out.remove(lock.arena_index()) else {
            warn!(%lock, "return of a stale query subtable lock");
            return false;
        };
        trace!(id = %record.subtable_id(), %lock, "query subtable returned");
        core.slots.push(record.into_slot());
        true
    }

    // === Scheduling ===

    /// Dequeues the next task.
    ///
    /// When the slot count has fallen below the worker count, first tries
    /// to split the largest splittable query subtree so every worker can
    /// find work. Scanning the slots also performs lazy cleanup: a
    /// drained locally-owned slot with no remaining work is evicted, and a
    /// drained foreign slot is flushed home.
    ///
    /// With `check_out` set, the task's slot is checked out to the local
    /// rank and the returned [`DequeuedTask::lock`] must be returned via
    /// [`return_query_subtable`](Self::return_query_subtable).
    pub fn dequeue_task<M: Metric>(&self, metric: &M, check_out: bool) -> Option<DequeuedTask> {
        let mut core = self.inner.lock();
        if core.slots.len() < core.num_threads {
            core.redistribute_among_cores(metric);
        }

        let mut index = 0;
        while index < core.slots.len() {
            match core.dequeue_from_slot(index, check_out) {
                SlotProbe::Dequeued(dequeued) => return Some(dequeued),
                // The probed slot was evicted or flushed; its position now
                // holds the previous last slot, so probe it again.
                SlotProbe::Removed => {}
                SlotProbe::Keep => index += 1,
            }
        }
        None
    }

    /// Splits the largest splittable query subtree (non-leaf, with pending
    /// tasks) into its two children, duplicating the pending tasks onto
    /// both halves. Normally invoked from
    /// [`dequeue_task`](Self::dequeue_task) when the slot count falls
    /// below the worker count; drivers may also call it proactively.
    pub fn redistribute_among_cores<M: Metric>(&self, metric: &M) {
        self.inner.lock().redistribute_among_cores(metric);
    }

    /// Synthesizes tasks for reference subtables that arrived through the
    /// exchange layer. For every locally-owned slot and every checked-out
    /// record whose assignment history admits the reference range, one
    /// task is created and the backing cache block is locked once.
    /// Returns the number of tasks created.
    pub fn generate_tasks<M: Metric>(&self, metric: &M, received: &[ReceivedSubTable]) -> usize {
        let mut core = self.inner.lock();
        core.generate_tasks_inner(metric, received)
    }

    /// Merges an authoritative remote update of a checked-out query
    /// subtable. If the received id equals the record's id, the record
    /// rejoins the active slots; a strict sub-range only has its result
    /// data retained while the record stays on loan. Returns true iff the
    /// record was returned to the active slots.
    pub fn synchronize(&self, received: &SubTable) -> bool {
        let mut core = self.inner.lock();
        let received_id = received.subtable_id();
        debug!(id = %received_id, "synchronizing received query subtable");

        let Some(lock) = core
            .checked_out
            .iter()
            .find(|(_, record)| record.query_subtable().includes(received))
            .map(|(index, _)| LockId::from_arena(index))
        else {
            debug!(id = %received_id, "no checked-out record includes the received subtable");
            return false;
        };

        let outstanding_id = {
            let record = core
                .checked_out
                .get(lock.arena_index())
                .expect("lock id was just observed");
            record.query_subtable().copy_results_from(received);
            record.subtable_id()
        };

        if outstanding_id == received_id {
            let record = core
                .checked_out
                .remove(lock.arena_index())
                .expect("lock id was just observed");
            debug!(id = %received_id, "checked-out query subtable fully returned");
            core.slots.push(record.into_slot());
            core.num_exported_query_subtables = core.num_exported_query_subtables.saturating_sub(1);
            true
        } else {
            // Partial return: results are kept, the merge of the lock
            // record itself is deferred until the full id comes back.
            debug!(
                id = %received_id,
                outstanding = %outstanding_id,
                "partial return retained; record stays checked out"
            );
            false
        }
    }

    // === Load balancing ===

    /// Snapshots this process's load for a peer: owned query subtable ids
    /// (active and on loan), remaining local work, and cache headroom.
    pub fn prepare_load_balance_request(&self) -> LoadBalanceRequest {
        let core = self.inner.lock();
        let mut owned: Vec<SubTableId> = core
            .slots
            .iter()
            .map(|slot| slot.query_subtable.subtable_id())
            .collect();
        owned.extend(core.checked_out.iter().map(|(_, record)| record.subtable_id()));
        LoadBalanceRequest::new(
            core.my_rank,
            owned,
            core.remaining_local_computation,
            core.exchange.remaining_extra_points_to_hold(),
        )
    }

    /// Packs work for an underloaded peer: scans active slots the peer
    /// does not already own and moves whole slots into the list until the
    /// peer's point budget is exhausted. Every packed slot is checked out
    /// to the peer.
    pub fn prepare_extra_task_list(
        &self,
        peer: Rank,
        extra_points_to_hold: u64,
        peer_request: &LoadBalanceRequest,
    ) -> ExtraTaskList {
        let mut core = self.inner.lock();
        let mut list = ExtraTaskList::new(peer, extra_points_to_hold);

        let mut index = 0;
        while index < core.slots.len() && list.remaining_extra_points_to_hold() > 0 {
            let id = core.slots[index].query_subtable.subtable_id();
            if peer_request.query_subtable_is_owned(&id) {
                index += 1;
                continue;
            }
            if !list.try_admit(&core.slots[index].query_subtable, &core.slots[index].tasks) {
                index += 1;
                continue;
            }

            // The slot leaves the active set: its tasks travel with the
            // list (dropping this process's cache references for them) and
            // the subtable stays checked out to the peer until it comes
            // home through `synchronize`.
            let mut slot = core.slots.swap_remove(index);
            let mut tasks = Vec::with_capacity(slot.tasks.len());
            while let Some(task) = slot.tasks.pop() {
                core.num_remaining_tasks -= 1;
                core.remaining_local_computation =
                    core.remaining_local_computation.saturating_sub(task.work());
                if let Some(cache_id) = task.reference_cache_block_id() {
                    if let Err(error) = core.exchange.release_cache(cache_id, 1) {
                        warn!(%cache_id, %error, "release for exported task failed");
                    }
                }
                tasks.push(task);
            }
            let query_subtable = slot.query_subtable.clone();
            trace!(id = %id, %peer, tasks = tasks.len(), "exported query subtable");
            core.checked_out.insert(CheckedOutSubTable::new(slot, peer));
            core.num_exported_query_subtables += 1;
            list.push_entry(query_subtable, tasks);
        }
        list
    }

    // === Completed-work accounting ===

    /// Accounts completed work against every slot: the global budget drops
    /// by `work`, the delta is propagated through the exchange, and each
    /// slot's remaining-work counter drops by `ref_count`.
    pub fn push_completed_computation(&self, ref_count: u64, work: u64) {
        let mut core = self.inner.lock();
        core.account_completed(work);
        for slot in &mut core.slots {
            slot.remaining_work = slot.remaining_work.saturating_sub(ref_count);
        }
    }

    /// Accounts completed work against one checked-out record. Returns
    /// false if the lock id is stale (the global budget is still charged).
    pub fn push_completed_computation_for(&self, lock: LockId, ref_count: u64, work: u64) -> bool {
        let mut core = self.inner.lock();
        core.account_completed(work);
        let Some(record) = core.checked_out.get_mut(lock.arena_index()) else {
            warn!(%lock, "completed computation against a stale lock");
            return false;
        };
        record.slot.remaining_work = record.slot.remaining_work.saturating_sub(ref_count);
        true
    }

    // === Exchange rounds ===

    /// Drives one exchange round: transmits pending query-subtable flushes
    /// (when load balancing is enabled), then, iff the exchange layer is
    /// ready, performs a send/receive and feeds newly arrived reference
    /// subtables to task generation. Returns the number of tasks created.
    ///
    /// A transient exchange failure leaves all queue state untouched; the
    /// caller simply retries on the next round.
    pub fn send_receive<M: Metric>(
        &self,
        metric: &M,
        outbound: &mut Vec<RouteRequest>,
    ) -> Result<usize> {
        let mut core = self.inner.lock();
        if core.exchange.do_load_balancing() {
            core.exchange.send_receive_flush_requests()?;
        }
        if !core.exchange.ready_to_send_receive() {
            return Ok(0);
        }
        let received = core.exchange.send_receive(outbound)?;
        Ok(core.generate_tasks_inner(metric, &received))
    }

    /// Returns true when this process may exit: the global budget is spent
    /// and the exchange layer declares quiescence.
    #[must_use]
    pub fn can_terminate(&self) -> bool {
        let core = self.inner.lock();
        core.remaining_global_computation == 0 && core.exchange.can_terminate()
    }

    // === Cache proxies ===

    /// Releases `n` references on a cache block.
    pub fn release_cache(&self, id: CacheBlockId, n: u64) -> Result<()> {
        self.inner.lock().exchange.release_cache(id, n)
    }

    /// Looks up a cached subtable by cache block id.
    #[must_use]
    pub fn find_subtable(&self, id: CacheBlockId) -> Option<SubTable> {
        self.inner.lock().exchange.find_subtable(id).cloned()
    }

    /// Stores a subtable in the exchange cache with an initial reference
    /// count, returning its cache block id.
    pub fn push_subtable(&self, subtable: SubTable, n_references: u64) -> CacheBlockId {
        self.inner.lock().exchange.push_subtable(subtable, n_references)
    }

    // === Introspection ===

    /// Tasks pending across all slots and checked-out records.
    #[must_use]
    pub fn num_remaining_tasks(&self) -> usize {
        self.inner.lock().num_remaining_tasks
    }

    /// Returns true if no task is pending on this process.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().num_remaining_tasks == 0
    }

    /// Number of active slots.
    #[must_use]
    pub fn num_slots(&self) -> usize {
        self.inner.lock().slots.len()
    }

    /// Number of checked-out records.
    #[must_use]
    pub fn num_checked_out(&self) -> usize {
        self.inner.lock().checked_out.len()
    }

    /// Pending task count of one slot, or `None` if the index is out of
    /// range.
    #[must_use]
    pub fn size(&self, slot_index: usize) -> Option<usize> {
        let core = self.inner.lock();
        core.slots.get(slot_index).map(|slot| slot.tasks.len())
    }

    /// The query subtable at a slot index.
    #[must_use]
    pub fn query_subtable(&self, slot_index: usize) -> Option<SubTable> {
        let core = self.inner.lock();
        core.slots.get(slot_index).map(|slot| slot.query_subtable.clone())
    }

    /// Query subtables imported from other ranks and still active.
    #[must_use]
    pub fn num_imported_query_subtables(&self) -> usize {
        self.inner.lock().num_imported_query_subtables
    }

    /// Query subtables currently exported to other ranks.
    #[must_use]
    pub fn num_exported_query_subtables(&self) -> usize {
        self.inner.lock().num_exported_query_subtables
    }

    /// Sum of work estimates of all pending tasks.
    #[must_use]
    pub fn remaining_local_computation(&self) -> u64 {
        self.inner.lock().remaining_local_computation
    }

    /// Global remaining-work budget as seen by this process.
    #[must_use]
    pub fn remaining_global_computation(&self) -> u64 {
        self.inner.lock().remaining_global_computation
    }

    /// Decrements the local-work counter directly. Kernel drivers use this
    /// when they consume work outside the dequeue path.
    pub fn decrement_remaining_local_computation(&self, decrement: u64) {
        let mut core = self.inner.lock();
        core.remaining_local_computation =
            core.remaining_local_computation.saturating_sub(decrement);
    }

    /// Decrements the global-work counter directly, without routing the
    /// delta through the exchange.
    pub fn decrement_remaining_global_computation(&self, decrement: u64) {
        let mut core = self.inner.lock();
        debug_assert!(
            decrement <= core.remaining_global_computation,
            "global work counter underflow"
        );
        core.remaining_global_computation =
            core.remaining_global_computation.saturating_sub(decrement);
    }

    /// Returns true if any pending task still references the given
    /// subtable id. Used to assert that a cache block about to be evicted
    /// has no live task pointing at it.
    #[must_use]
    pub fn contains_reference(&self, id: SubTableId) -> bool {
        let core = self.inner.lock();
        let in_slots = core.slots.iter().any(|slot| {
            slot.tasks
                .iter()
                .any(|task| task.reference_subtable().subtable_id() == id)
        });
        in_slots
            || core.checked_out.iter().any(|(_, record)| {
                record
                    .slot
                    .tasks
                    .iter()
                    .any(|task| task.reference_subtable().subtable_id() == id)
            })
    }

    /// Produces a structured status dump, ordered by subtable id.
    #[must_use]
    pub fn snapshot(&self) -> QueueSnapshot {
        let core = self.inner.lock();
        let mut active: Vec<SlotSnapshot> = core
            .slots
            .iter()
            .map(|slot| SlotSnapshot {
                id: slot.query_subtable.subtable_id(),
                origin_rank: slot.query_subtable.origin_rank(),
                num_tasks: slot.tasks.len(),
                pending_work: slot.tasks.total_work(),
                remaining_work: slot.remaining_work,
                num_assigned: slot.assigned_work.len(),
            })
            .collect();
        active.sort_by_key(|snapshot| snapshot.id);

        let mut checked_out: Vec<CheckedOutSnapshot> = core
            .checked_out
            .iter()
            .map(|(_, record)| CheckedOutSnapshot {
                id: record.subtable_id(),
                locked_to: record.locked_to(),
                num_tasks: record.num_tasks(),
                pending_work: record.slot.tasks.total_work(),
                remaining_work: record.remaining_work(),
            })
            .collect();
        checked_out.sort_by_key(|snapshot| snapshot.id);

        QueueSnapshot {
            active,
            checked_out,
            num_remaining_tasks: core.num_remaining_tasks,
            remaining_local_computation: core.remaining_local_computation,
            remaining_global_computation: core.remaining_global_computation,
        }
    }

    /// Runs a closure against the exchange layer, under the queue lock.
    pub fn with_exchange<R>(&self, f: impl FnOnce(&E) -> R) -> R {
        f(&self.inner.lock().exchange)
    }

    /// Runs a closure against the exchange layer mutably, under the queue
    /// lock.
    pub fn with_exchange_mut<R>(&self, f: impl FnOnce(&mut E) -> R) -> R {
        f(&mut self.inner.lock().exchange)
    }
}

enum SlotProbe {
    Dequeued(DequeuedTask),
    Removed,
    Keep,
}

impl<E: TableExchange> QueueCore<E> {
    fn push_task_at<M: Metric>(&mut self, metric: &M, index: usize, reference: SubTable) {
        let priority = priority_for(
            &self.exchange,
            self.rank_favor_factor,
            metric,
            &self.slots[index].query_subtable,
            &reference,
        );
        let task = Task::new(self.slots[index].query_subtable.clone(), reference, priority);
        self.num_remaining_tasks += 1;
        debug_assert!(
            self.remaining_local_computation
                .checked_add(task.work())
                .is_some(),
            "local work counter overflow"
        );
        self.remaining_local_computation += task.work();
        trace!(
            slot = index,
            reference = %task.reference_subtable().subtable_id(),
            priority,
            work = task.work(),
            "task pushed"
        );
        self.slots[index].tasks.push(task);
    }

    fn lock_slot(&mut self, index: usize, peer_rank: Rank) -> LockId {
        let slot = self.slots.swap_remove(index);
        trace!(id = %slot.query_subtable.subtable_id(), peer = %peer_rank, "query subtable checked out");
        LockId::from_arena(
            self.checked_out
                .insert(CheckedOutSubTable::new(slot, peer_rank)),
        )
    }

    fn evict(&mut self, index: usize) {
        let slot = self.slots.swap_remove(index);
        trace!(id = %slot.query_subtable.subtable_id(), "drained slot evicted");
    }

    fn flush(&mut self, index: usize) {
        let slot = self.slots.swap_remove(index);
        debug!(id = %slot.query_subtable.subtable_id(), "flushing foreign query subtable home");
        self.exchange.queue_flush_request(slot.query_subtable);
        self.num_imported_query_subtables = self.num_imported_query_subtables.saturating_sub(1);
    }

    fn dequeue_from_slot(&mut self, index: usize, check_out: bool) -> SlotProbe {
        if let Some(task) = self.slots[index].tasks.pop() {
            self.num_remaining_tasks -= 1;
            self.remaining_local_computation =
                self.remaining_local_computation.saturating_sub(task.work());
            let lock = check_out.then(|| self.lock_slot(index, self.my_rank));
            return SlotProbe::Dequeued(DequeuedTask { task, lock });
        }

        if self.slots[index].query_subtable.rank() == self.my_rank {
            // Locally rooted: the slot stays until every reference point
            // has been completed against it somewhere in the cluster.
            if self.slots[index].remaining_work == 0 {
                self.evict(index);
                return SlotProbe::Removed;
            }
            SlotProbe::Keep
        } else {
            // Foreign and out of tasks: send the accumulated results home.
            self.flush(index);
            SlotProbe::Removed
        }
    }

    fn redistribute_among_cores<M: Metric>(&mut self, metric: &M) {
        let mut split_index = None;
        let mut split_size = 0;
        for (index, slot) in self.slots.iter().enumerate() {
            let count = slot.query_subtable.count();
            if !slot.query_subtable.is_leaf() && !slot.tasks.is_empty() && count > split_size {
                split_size = count;
                split_index = Some(index);
            }
        }
        if let Some(index) = split_index {
            self.split_subtree(metric, index);
        }
    }

    fn split_subtree<M: Metric>(&mut self, metric: &M, index: usize) {
        let tree = Arc::clone(self.slots[index].query_subtable.tree());
        let node = tree.node(self.slots[index].query_subtable.start_node());
        let (Some(left), Some(right)) = (node.left, node.right) else {
            return;
        };

        debug!(
            id = %self.slots[index].query_subtable.subtable_id(),
            "splitting query subtree"
        );

        // The probed slot keeps the left child; the right child goes to a
        // fresh slot inheriting the assignment history and remaining work.
        self.slots[index].query_subtable.set_start_node(left);
        let mut right_subtable = self.slots[index].query_subtable.clone();
        right_subtable.set_start_node(right);
        let right_slot = Slot {
            query_subtable: right_subtable,
            tasks: TaskHeap::new(),
            assigned_work: self.slots[index].assigned_work.clone(),
            remaining_work: self.slots[index].remaining_work,
        };
        self.slots.push(right_slot);
        let right_index = self.slots.len() - 1;

        let mut drained = Vec::with_capacity(self.slots[index].tasks.len());
        while let Some(task) = self.slots[index].tasks.pop() {
            self.num_remaining_tasks -= 1;
            self.remaining_local_computation =
                self.remaining_local_computation.saturating_sub(task.work());
            drained.push(task);
        }
        for task in drained {
            let reference = task.reference_subtable().clone();
            self.push_task_at(metric, index, reference.clone());
            self.push_task_at(metric, right_index, reference);
            // Only the query side was split: each duplicated pair needs
            // exactly one extra reference on its cache block.
            if let Some(cache_id) = task.reference_cache_block_id() {
                self.exchange.lock_cache(cache_id, 1);
            }
        }
    }

    fn generate_tasks_inner<M: Metric>(
        &mut self,
        metric: &M,
        received: &[ReceivedSubTable],
    ) -> usize {
        let mut created = 0;
        for arrival in received {
            let reference = match self.exchange.find_subtable(arrival.cache_block_id) {
                Some(subtable) => subtable.clone(),
                None => {
                    // Not a cached payload: the range names a node of the
                    // local reference tree, aliased under the arrival's
                    // cache id.
                    let Some(node) = self
                        .exchange
                        .find_by_begin_count(arrival.id.begin, arrival.id.count)
                    else {
                        warn!(id = %arrival.id, "received reference range matches no local node");
                        continue;
                    };
                    let mut alias =
                        SubTable::new(Arc::clone(self.exchange.local_table()), node);
                    alias.set_cache_block_id(Some(arrival.cache_block_id));
                    alias
                }
            };
            let grid = RefRange::from_id(reference.subtable_id());

            for index in 0..self.slots.len() {
                if self.slots[index].query_subtable.rank() != self.my_rank {
                    continue;
                }
                if !self.slots[index].assigned_work.insert(grid) {
                    continue;
                }
                self.push_task_at(metric, index, reference.clone());
                self.exchange.lock_cache(arrival.cache_block_id, 1);
                created += 1;
            }

            for (_, record) in self.checked_out.iter_mut() {
                if !record.insert_assigned(grid) {
                    continue;
                }
                let priority = priority_for(
                    &self.exchange,
                    self.rank_favor_factor,
                    metric,
                    record.query_subtable(),
                    &reference,
                );
                let task = Task::new(
                    record.query_subtable().clone(),
                    reference.clone(),
                    priority,
                );
                self.num_remaining_tasks += 1;
                self.remaining_local_computation += task.work();
                record.push_task(task);
                self.exchange.lock_cache(arrival.cache_block_id, 1);
                created += 1;
            }
        }
        created
    }

    fn account_completed(&mut self, work: u64) {
        debug_assert!(
            work <= self.remaining_global_computation,
            "completed work exceeds the global budget"
        );
        self.remaining_global_computation =
            self.remaining_global_computation.saturating_sub(work);
        self.exchange.push_completed_computation(work);
    }
}
