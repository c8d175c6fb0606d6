//! The tree store collaborator surface.
//!
//! The queue schedules work over two spatial trees but never builds or
//! traverses them beyond child pointers and point ranges. This module
//! carries the minimum the queue contract needs: an arena-backed tree of
//! bounded nodes ([`tree`]) and the subtable alias type that names a
//! subtree, locally rooted or received from a peer ([`subtable`]).

pub mod subtable;
pub mod tree;

pub use subtable::{QueryResult, SubTable};
pub use tree::{Bound, NodeId, Tree, TreeNode};
