//! Extra-task lists for exporting work to an underloaded peer.
//!
//! The list packs whole slots: the query subtable plus every task parked
//! on it. Admission is budgeted in points. Each subtable id not already
//! in the list costs its point count against the peer's declared cache
//! headroom, so the list can never oversubscribe the receiver.

use crate::queue::task::Task;
use crate::queue::task_heap::TaskHeap;
use crate::table::SubTable;
use crate::types::{Rank, SubTableId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// One exported query subtable with its drained task queue.
#[derive(Debug)]
pub struct ExportEntry {
    /// The query subtable handed to the peer.
    pub query_subtable: SubTable,
    /// Tasks that were pending on the subtable, in drain order.
    pub tasks: Vec<Task>,
}

/// A budget-bounded list of work destined for one peer.
#[derive(Debug)]
pub struct ExtraTaskList {
    destination: Rank,
    remaining_extra_points_to_hold: u64,
    seen_tables: HashSet<SubTableId>,
    entries: Vec<ExportEntry>,
}

/// Wire summary of an [`ExtraTaskList`]: what travels ahead of the bulk
/// subtable payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtraTaskListManifest {
    /// Receiving rank.
    pub destination: Rank,
    /// Per-entry query subtable id and number of tasks.
    pub entries: Vec<(SubTableId, usize)>,
}

impl ExtraTaskList {
    /// Creates an empty list for `destination` with the peer's declared
    /// headroom in points.
    #[must_use]
    pub fn new(destination: Rank, extra_points_to_hold: u64) -> Self {
        Self {
            destination,
            remaining_extra_points_to_hold: extra_points_to_hold,
            seen_tables: HashSet::new(),
            entries: Vec::new(),
        }
    }

    /// The receiving rank.
    #[must_use]
    pub const fn destination(&self) -> Rank {
        self.destination
    }

    /// Budget still available, in points.
    #[must_use]
    pub const fn remaining_extra_points_to_hold(&self) -> u64 {
        self.remaining_extra_points_to_hold
    }

    /// Tries to admit a slot's worth of work. On success the budget is
    /// charged for every subtable id the peer has not been promised yet
    /// and `true` is returned; on failure nothing changes.
    pub fn try_admit(&mut self, query_subtable: &SubTable, tasks: &TaskHeap) -> bool {
        let mut cost = 0u64;
        let mut admitted: Vec<SubTableId> = Vec::new();

        let query_id = query_subtable.subtable_id();
        if !self.seen_tables.contains(&query_id) {
            cost += query_id.count;
            admitted.push(query_id);
        }
        for task in tasks.iter() {
            let reference_id = task.reference_subtable().subtable_id();
            if !self.seen_tables.contains(&reference_id) && !admitted.contains(&reference_id) {
                cost += reference_id.count;
                admitted.push(reference_id);
            }
        }

        if cost > self.remaining_extra_points_to_hold {
            return false;
        }
        self.remaining_extra_points_to_hold -= cost;
        self.seen_tables.extend(admitted);
        true
    }

    /// Appends an admitted entry.
    pub(crate) fn push_entry(&mut self, query_subtable: SubTable, tasks: Vec<Task>) {
        self.entries.push(ExportEntry {
            query_subtable,
            tasks,
        });
    }

    /// The packed entries.
    #[must_use]
    pub fn entries(&self) -> &[ExportEntry] {
        &self.entries
    }

    /// Number of packed entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing was packed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The wire summary for this list.
    #[must_use]
    pub fn manifest(&self) -> ExtraTaskListManifest {
        ExtraTaskListManifest {
            destination: self.destination,
            entries: self
                .entries
                .iter()
                .map(|entry| (entry.query_subtable.subtable_id(), entry.tasks.len()))
                .collect(),
        }
    }
}
