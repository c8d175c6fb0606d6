//! Internal utilities.
//!
//! - [`arena`]: generational arena backing the checked-out record list

pub mod arena;

pub use arena::{Arena, ArenaIndex};
