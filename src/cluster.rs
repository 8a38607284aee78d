// Shared cluster evidence counters.
//
// Engines aligning pairs from the same barcode cluster increment one shared
// byte per cluster. The counters are monotone and saturate at 255; decisions
// downstream only ask `counter >= min_cluster_size`, so cross-thread
// increment ordering is unobservable. The per-pair toggle that limits each
// pair to one increment per cluster is caller-owned and zeroed between
// pairs.

use std::sync::atomic::{AtomicU8, Ordering};

/// Marker for "not a member of any cluster".
pub const NO_CLUSTER: i32 = -1;

pub struct ClusterCounters {
    counters: Vec<AtomicU8>,
}

impl ClusterCounters {
    pub fn new(num_clusters: usize) -> Self {
        let mut counters = Vec::with_capacity(num_clusters);
        counters.resize_with(num_clusters, || AtomicU8::new(0));
        ClusterCounters { counters }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    /// Saturating increment; the compare-exchange loop keeps the 255
    /// ceiling exact under concurrent increments.
    pub fn increment(&self, cluster: usize) {
        let counter = &self.counters[cluster];
        let mut current = counter.load(Ordering::Relaxed);
        while current != u8::MAX {
            match counter.compare_exchange_weak(
                current,
                current + 1,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(seen) => current = seen,
            }
        }
    }

    #[inline]
    pub fn get(&self, cluster: usize) -> u8 {
        self.counters[cluster].load(Ordering::Relaxed)
    }
}

/// Cluster scoring context for one engine: the shared counters, the
/// validity threshold, and this pair's one-increment-per-cluster toggle.
pub struct ClusterContext<'c> {
    pub counters: &'c ClusterCounters,
    pub min_cluster_size: u8,
    toggle: Vec<bool>,
}

impl<'c> ClusterContext<'c> {
    pub fn new(counters: &'c ClusterCounters, min_cluster_size: u8) -> Self {
        let toggle = vec![false; counters.len()];
        ClusterContext {
            counters,
            min_cluster_size,
            toggle,
        }
    }

    /// Reset the toggle; must run before each pair's cluster increments.
    pub fn begin_pair(&mut self) {
        self.toggle.iter_mut().for_each(|t| *t = false);
    }

    /// Increment the cluster's counter once per pair; later calls for the
    /// same cluster within the pair are no-ops.
    pub fn increment_once(&mut self, cluster: usize) {
        if !self.toggle[cluster] {
            self.counters.increment(cluster);
            self.toggle[cluster] = true;
        }
    }

    /// A cluster is valid evidence once enough pairs have voted for it.
    #[inline]
    pub fn is_valid(&self, cluster_idx: i32) -> bool {
        cluster_idx != NO_CLUSTER && self.counters.get(cluster_idx as usize) >= self.min_cluster_size
    }
}
