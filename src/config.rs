//! Queue configuration.
//!
//! # Defaults
//!
//! | Field | Default |
//! |-------|---------|
//! | `num_threads` | available CPU parallelism |
//! | `max_subtree_size` | 512 |
//! | `slots_per_thread` | 4 |
//! | `do_load_balancing` | true |
//! | `rank_favor_factor` | 0.0 |

/// Configuration for a [`DistributedDualtreeTaskQueue`](crate::queue::DistributedDualtreeTaskQueue).
#[derive(Debug, Clone, PartialEq)]
pub struct QueueConfig {
    /// Number of worker threads the queue serves.
    pub num_threads: usize,
    /// Maximum number of points in an initial frontier subtree; larger
    /// non-leaf nodes are split during partitioning.
    pub max_subtree_size: u64,
    /// Target number of initial slots per worker thread.
    pub slots_per_thread: usize,
    /// Whether inter-node load balancing (export and flush traffic) is
    /// enabled.
    pub do_load_balancing: bool,
    /// Weight of the owner-rank bias in task priorities. Zero means
    /// distance-only ordering; positive values favor reference subtables
    /// owned by nearby ranks.
    pub rank_favor_factor: f64,
}

impl QueueConfig {
    /// Normalize configuration values to safe defaults.
    pub fn normalize(&mut self) {
        if self.num_threads == 0 {
            self.num_threads = 1;
        }
        if self.max_subtree_size == 0 {
            self.max_subtree_size = 1;
        }
        if self.slots_per_thread == 0 {
            self.slots_per_thread = 1;
        }
        if !self.rank_favor_factor.is_finite() || self.rank_favor_factor < 0.0 {
            self.rank_favor_factor = 0.0;
        }
    }

    fn default_num_threads() -> usize {
        std::thread::available_parallelism()
            .map_or(1, std::num::NonZeroUsize::get)
            .max(1)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            num_threads: Self::default_num_threads(),
            max_subtree_size: 512,
            slots_per_thread: 4,
            do_load_balancing: true,
            rank_favor_factor: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_clamps_zero_fields() {
        let mut config = QueueConfig {
            num_threads: 0,
            max_subtree_size: 0,
            slots_per_thread: 0,
            do_load_balancing: false,
            rank_favor_factor: f64::NAN,
        };
        config.normalize();
        assert_eq!(config.num_threads, 1);
        assert_eq!(config.max_subtree_size, 1);
        assert_eq!(config.slots_per_thread, 1);
        assert_eq!(config.rank_favor_factor, 0.0);
    }

    #[test]
    fn default_is_already_normal() {
        let default = QueueConfig::default();
        let mut normalized = default.clone();
        normalized.normalize();
        assert_eq!(default, normalized);
    }
}
