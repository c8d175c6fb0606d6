//! The fused slot record.
//!
//! One slot holds everything the queue tracks for an active query
//! subtable: the subtable itself, its pending-task heap, the assignment
//! history, and the remaining-work counter. Keeping the four together (in
//! place of parallel arrays) makes the equal-length invariant structural
//! and lets check-out move a slot as one value.

use crate::queue::intervals::DisjointIntervals;
use crate::queue::task_heap::TaskHeap;
use crate::table::SubTable;

/// An active query subtable and its scheduling state.
#[derive(Debug)]
pub(crate) struct Slot {
    /// The query subtable this slot schedules work for.
    pub query_subtable: SubTable,
    /// Pending tasks, highest priority first.
    pub tasks: TaskHeap,
    /// Reference ranges already scheduled against this subtable.
    pub assigned_work: DisjointIntervals,
    /// Reference points not yet completed against this subtable. Zero for
    /// foreign subtables, whose remaining work is tracked by their origin.
    pub remaining_work: u64,
}

impl Slot {
    /// Creates a slot with no tasks and no assignment history.
    pub(crate) fn new(query_subtable: SubTable, remaining_work: u64) -> Self {
        Self {
            query_subtable,
            tasks: TaskHeap::new(),
            assigned_work: DisjointIntervals::new(),
            remaining_work,
        }
    }
}
