//! Checked-out query subtable records.
//!
//! Checking out reifies the "on loan" state of a query subtable: the
//! slot's entire contents move into a record on the checked-out list,
//! tagged with the rank holding the loan. The record keeps accepting
//! assignment inserts and task pushes, because the exchange layer may
//! deliver further reference subtables while the query subtable is out.

use crate::queue::slot::Slot;
use crate::queue::task::Task;
use crate::table::SubTable;
use crate::types::{Rank, RefRange, SubTableId};

/// A query subtable checked out to a single peer (or local worker).
#[derive(Debug)]
pub struct CheckedOutSubTable {
    pub(crate) slot: Slot,
    pub(crate) locked_to: Rank,
}

impl CheckedOutSubTable {
    /// Wraps a slot moved off the active arrays.
    pub(crate) fn new(slot: Slot, locked_to: Rank) -> Self {
        Self { slot, locked_to }
    }

    /// Releases the slot for return to the active arrays.
    pub(crate) fn into_slot(self) -> Slot {
        self.slot
    }

    /// The query subtable on loan.
    #[must_use]
    pub fn query_subtable(&self) -> &SubTable {
        &self.slot.query_subtable
    }

    /// The id of the query subtable on loan.
    #[must_use]
    pub fn subtable_id(&self) -> SubTableId {
        self.slot.query_subtable.subtable_id()
    }

    /// The rank holding the loan.
    #[must_use]
    pub const fn locked_to(&self) -> Rank {
        self.locked_to
    }

    /// Number of tasks parked on the record.
    #[must_use]
    pub fn num_tasks(&self) -> usize {
        self.slot.tasks.len()
    }

    /// Reference points not yet completed against the subtable.
    #[must_use]
    pub const fn remaining_work(&self) -> u64 {
        self.slot.remaining_work
    }

    /// Records a reference range as scheduled. Returns false (and changes
    /// nothing) if the range overlaps the assignment history.
    pub fn insert_assigned(&mut self, range: RefRange) -> bool {
        self.slot.assigned_work.insert(range)
    }

    /// Parks a task on the record's queue.
    pub(crate) fn push_task(&mut self, task: Task) {
        self.slot.tasks.push(task);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{SubTable, Tree};
    use std::sync::Arc;

    fn slot(rank: u32, n: usize) -> Slot {
        let points: Vec<Vec<f64>> = (0..n).map(|i| vec![i as f64]).collect();
        let tree = Arc::new(Tree::build(Rank(rank), &points, n));
        Slot::new(SubTable::new(Arc::clone(&tree), tree.root()), n as u64)
    }

    #[test]
    fn check_out_preserves_slot_state() {
        let mut inner = slot(0, 4);
        assert!(inner.assigned_work.insert(RefRange {
            rank: Rank(0),
            begin: 0,
            end: 4,
        }));

        let record = CheckedOutSubTable::new(inner, Rank(3));
        assert_eq!(record.locked_to(), Rank(3));
        assert_eq!(record.remaining_work(), 4);
        assert_eq!(record.subtable_id(), SubTableId::new(Rank(0), 0, 4));

        let returned = record.into_slot();
        assert_eq!(returned.assigned_work.len(), 1);
    }

    #[test]
    fn record_accepts_inserts_while_on_loan() {
        let mut record = CheckedOutSubTable::new(slot(0, 4), Rank(1));
        let range = RefRange {
            rank: Rank(0),
            begin: 0,
            end: 4,
        };
        assert!(record.insert_assigned(range));
        assert!(!record.insert_assigned(range), "duplicate range rejected");
    }
}
