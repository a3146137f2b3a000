use std::io::{Read, Write};

use anyhow::Context;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use serde::{Deserialize, Serialize};

use crate::cluster::{ClusterStore, LogCluster};
use crate::drain::{DrainCore, Node};
use crate::error::TemplateMinerError;

/// Serializable image of the engine state: id allocator, cluster records,
/// and the prefix tree. Cluster ids ride inside the records rather than as
/// map keys, so integer identity survives the byte round trip structurally.
///
/// The optional compression stage (zlib, then base64) is independent of the
/// serialization and chosen by the caller on both ends.
#[derive(Debug, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub clusters_counter: u64,
    pub clusters: Vec<LogCluster>,
    pub root_node: Node,
}

impl EngineSnapshot {
    pub fn capture(core: &DrainCore) -> Self {
        // least recently used first, so replaying the list restores recency
        let mut clusters: Vec<LogCluster> = core
            .id_to_cluster
            .iter()
            .map(|(_, cluster)| cluster.clone())
            .collect();
        clusters.reverse();

        Self {
            clusters_counter: core.clusters_counter,
            clusters,
            root_node: core.root_node.clone(),
        }
    }

    /// Replaces the engine state with this snapshot. The cluster store is
    /// rebuilt at the engine's configured capacity.
    pub fn restore(self, core: &mut DrainCore) {
        let mut store = ClusterStore::new(core.max_clusters);
        for cluster in self.clusters {
            store.insert(cluster);
        }
        core.id_to_cluster = store;
        core.clusters_counter = self.clusters_counter;
        core.root_node = self.root_node;
    }

    pub fn encode(&self, compress: bool) -> anyhow::Result<Vec<u8>> {
        let state = serde_json::to_vec(self).context("failed to serialize engine state")?;
        if !compress {
            return Ok(state);
        }

        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(&state)
            .context("failed to compress engine state")?;
        let deflated = encoder.finish().context("failed to compress engine state")?;
        Ok(BASE64.encode(deflated).into_bytes())
    }

    pub fn decode(state: &[u8], compressed: bool) -> anyhow::Result<Self> {
        let raw = if compressed {
            let deflated = BASE64
                .decode(state)
                .map_err(|e| TemplateMinerError::SnapshotCorrupt(format!("base64: {e}")))?;
            let mut inflated = Vec::new();
            ZlibDecoder::new(deflated.as_slice())
                .read_to_end(&mut inflated)
                .map_err(|e| TemplateMinerError::SnapshotCorrupt(format!("zlib: {e}")))?;
            inflated
        } else {
            state.to_vec()
        };

        let snapshot = serde_json::from_slice(&raw)
            .map_err(|e| TemplateMinerError::SnapshotCorrupt(e.to_string()))?;
        Ok(snapshot)
    }
}
