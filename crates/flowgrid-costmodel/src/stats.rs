//! Bottom-up resource statistics.
//!
//! Usage is folded from the leaves of the resource topology towards the
//! root. The fold is a commutative monoid, so siblings may be gathered in
//! any order; availability is derived per node once all children are in.

use flowgrid_core::ResourceVector;
use serde::Serialize;

/// Accumulated usage of a topology subtree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ResourceStats {
    /// Sum of resource requests of running tasks in the subtree.
    pub used: ResourceVector,
    pub running_tasks: u64,
}

impl ResourceStats {
    /// Contribution of one running task.
    pub fn for_task(request: &ResourceVector) -> Self {
        Self {
            used: *request,
            running_tasks: 1,
        }
    }

    /// Capacity left in a node with `capacity` after this usage.
    pub fn available_within(&self, capacity: &ResourceVector) -> ResourceVector {
        ResourceVector {
            cpu_cores: (capacity.cpu_cores - self.used.cpu_cores).max(0.0),
            ram_cap: capacity.ram_cap.saturating_sub(self.used.ram_cap),
            net_rx_bw: capacity.net_rx_bw.saturating_sub(self.used.net_rx_bw),
        }
    }
}

/// Reset `acc` to the identity of the fold.
pub fn prepare_stats(acc: &mut ResourceStats) {
    *acc = ResourceStats::default();
}

/// Combine `other` into `acc`.
pub fn gather_stats(acc: ResourceStats, other: &ResourceStats) -> ResourceStats {
    ResourceStats {
        used: ResourceVector {
            cpu_cores: acc.used.cpu_cores + other.used.cpu_cores,
            ram_cap: acc.used.ram_cap.saturating_add(other.used.ram_cap),
            net_rx_bw: acc.used.net_rx_bw.saturating_add(other.used.net_rx_bw),
        },
        running_tasks: acc.running_tasks + other.running_tasks,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(cpu: f64, ram: u64, tasks: u64) -> ResourceStats {
        ResourceStats {
            used: ResourceVector::new(cpu, ram),
            running_tasks: tasks,
        }
    }

    #[test]
    fn prepare_resets_to_identity() {
        let mut acc = stats(3.0, 100, 2);
        prepare_stats(&mut acc);
        assert_eq!(acc, ResourceStats::default());
        assert_eq!(gather_stats(acc, &stats(1.0, 10, 1)), stats(1.0, 10, 1));
    }

    #[test]
    fn gather_is_order_independent() {
        let a = stats(1.0, 100, 1);
        let b = stats(2.0, 50, 1);
        let c = stats(0.5, 0, 3);

        let left = gather_stats(gather_stats(gather_stats(ResourceStats::default(), &a), &b), &c);
        let right = gather_stats(gather_stats(gather_stats(ResourceStats::default(), &c), &a), &b);
        assert_eq!(left, right);
        assert_eq!(left.running_tasks, 5);
        assert_eq!(left.used.ram_cap, 150);
    }

    #[test]
    fn availability_saturates_at_zero() {
        let usage = stats(6.0, 9000, 2);
        let avail = usage.available_within(&ResourceVector::new(4.0, 8192));
        assert_eq!(avail.cpu_cores, 0.0);
        assert_eq!(avail.ram_cap, 0);

        let avail = stats(1.0, 1024, 1).available_within(&ResourceVector::new(4.0, 8192));
        assert_eq!(avail.cpu_cores, 3.0);
        assert_eq!(avail.ram_cap, 7168);
    }
}
