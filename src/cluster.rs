use std::num::NonZeroUsize;

use lru::LruCache;
use serde::{Deserialize, Serialize};

/// A group of log lines sharing one template.
///
/// The template is a token sequence in which variable positions hold the
/// wildcard marker. Ids are allocated monotonically and never reused, even
/// after the cluster is evicted from a bounded store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogCluster {
    pub cluster_id: u64,
    pub log_template_tokens: Vec<String>,
    pub size: u64,
}

impl LogCluster {
    pub fn new(log_template_tokens: Vec<String>, cluster_id: u64) -> Self {
        Self {
            cluster_id,
            log_template_tokens,
            size: 1,
        }
    }

    pub fn get_template(&self) -> String {
        self.log_template_tokens.join(" ")
    }
}

impl std::fmt::Display for LogCluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ID={:<5} : size={:<10}: {}",
            self.cluster_id,
            self.size,
            self.get_template()
        )
    }
}

/// Cluster mapping with least-recently-used eviction when bounded.
///
/// Access is split in two flavors: `peek`/`contains` leave recency alone and
/// are used while scanning candidates or sweeping dead ids out of tree
/// nodes; `get_mut`/`insert` update recency and are reserved for the moment
/// a match is confirmed or a cluster is created.
#[derive(Debug)]
pub struct ClusterStore {
    clusters: LruCache<u64, LogCluster>,
}

impl ClusterStore {
    /// Capacity of zero is rejected earlier, at engine construction.
    pub fn new(max_clusters: Option<usize>) -> Self {
        let clusters = match max_clusters {
            Some(capacity) => LruCache::new(
                NonZeroUsize::new(capacity).expect("cluster store capacity must be non-zero"),
            ),
            None => LruCache::unbounded(),
        };
        Self { clusters }
    }

    /// Inserts as most recently used, evicting the least recently used
    /// cluster when at capacity.
    pub fn insert(&mut self, cluster: LogCluster) {
        self.clusters.put(cluster.cluster_id, cluster);
    }

    pub fn peek(&self, cluster_id: u64) -> Option<&LogCluster> {
        self.clusters.peek(&cluster_id)
    }

    /// Touching access: marks the cluster as most recently used.
    pub fn get_mut(&mut self, cluster_id: u64) -> Option<&mut LogCluster> {
        self.clusters.get_mut(&cluster_id)
    }

    pub fn contains(&self, cluster_id: u64) -> bool {
        self.clusters.contains(&cluster_id)
    }

    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    /// Iterates from most to least recently used without touching recency.
    pub fn iter(&self) -> impl Iterator<Item = (&u64, &LogCluster)> {
        self.clusters.iter()
    }
}
