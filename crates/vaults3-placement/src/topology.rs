//! Cluster topology: the set of known nodes and the hash ring built over
//! them, behind one lock so membership changes and ring lookups stay
//! consistent with each other (spec §4.8's equal-weight, ring-only model;
//! no failure-domain weighting).

use crate::ring::{HashRing, DEFAULT_VIRTUAL_NODES};
use parking_lot::RwLock;
use std::collections::HashMap;
use vaults3_common::NodeId;

/// Placement knobs recorded alongside the ring (spec §4.8).
#[derive(Clone, Debug)]
pub struct PlacementConfig {
    pub replica_count: usize,
    pub read_quorum: usize,
    pub write_quorum: usize,
    pub virtual_nodes: u32,
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self {
            replica_count: 3,
            read_quorum: 2,
            write_quorum: 2,
            virtual_nodes: DEFAULT_VIRTUAL_NODES,
        }
    }
}

#[derive(Clone, Debug)]
pub struct NodeInfo {
    pub id: NodeId,
    pub addr: String,
}

struct Inner {
    version: u64,
    nodes: HashMap<NodeId, NodeInfo>,
    ring: HashRing,
}

/// Known cluster members plus the ring built over them. `self_id` is the
/// owning node's own identity, used so lookups can tell "primary is me"
/// apart from "primary is some peer".
pub struct ClusterTopology {
    self_id: NodeId,
    config: PlacementConfig,
    inner: RwLock<Inner>,
}

impl ClusterTopology {
    #[must_use]
    pub fn new(self_id: NodeId, config: PlacementConfig) -> Self {
        let ring = HashRing::new(config.virtual_nodes);
        Self {
            self_id,
            config,
            inner: RwLock::new(Inner { version: 0, nodes: HashMap::new(), ring }),
        }
    }

    #[must_use]
    pub const fn self_id(&self) -> NodeId {
        self.self_id
    }

    #[must_use]
    pub const fn config(&self) -> &PlacementConfig {
        &self.config
    }

    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.read().version
    }

    pub fn upsert_node(&self, node: NodeInfo) {
        let mut inner = self.inner.write();
        inner.ring.add_node(node.id);
        inner.nodes.insert(node.id, node);
        inner.version += 1;
    }

    pub fn remove_node(&self, id: NodeId) -> Option<NodeInfo> {
        let mut inner = self.inner.write();
        inner.ring.remove_node(id);
        let removed = inner.nodes.remove(&id);
        if removed.is_some() {
            inner.version += 1;
        }
        removed
    }

    #[must_use]
    pub fn get_node(&self, id: NodeId) -> Option<NodeInfo> {
        self.inner.read().nodes.get(&id).cloned()
    }

    #[must_use]
    pub fn all_nodes(&self) -> Vec<NodeInfo> {
        self.inner.read().nodes.values().cloned().collect()
    }

    /// The ordered replica set for `(bucket, key)`, per spec §4.8's
    /// `GetNodes`: the first `replica_count` distinct nodes walking
    /// clockwise from the key's ring position.
    #[must_use]
    pub fn replicas_for(&self, bucket: &str, key: &str) -> Vec<NodeId> {
        self.inner.read().ring.get_nodes(bucket, key, self.config.replica_count)
    }

    /// The single primary, i.e. `replicas_for(..).first()`.
    #[must_use]
    pub fn primary_for(&self, bucket: &str, key: &str) -> Option<NodeId> {
        self.inner.read().ring.get_node(bucket, key)
    }

    #[must_use]
    pub fn is_self_primary(&self, bucket: &str, key: &str) -> bool {
        self.primary_for(bucket, key) == Some(self.self_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(addr: &str) -> NodeInfo {
        NodeInfo { id: NodeId::new(), addr: addr.into() }
    }

    #[test]
    fn upsert_bumps_version_and_registers_on_the_ring() {
        let topology = ClusterTopology::new(NodeId::new(), PlacementConfig::default());
        assert_eq!(topology.version(), 0);

        let n1 = node("n1:9000");
        topology.upsert_node(n1.clone());
        assert_eq!(topology.version(), 1);
        assert!(topology.get_node(n1.id).is_some());
        assert_eq!(topology.primary_for("b", "k"), Some(n1.id));
    }

    #[test]
    fn remove_node_drops_it_from_both_the_map_and_the_ring() {
        let topology = ClusterTopology::new(NodeId::new(), PlacementConfig::default());
        let n1 = node("n1:9000");
        topology.upsert_node(n1.clone());
        topology.remove_node(n1.id);

        assert!(topology.get_node(n1.id).is_none());
        assert!(topology.primary_for("b", "k").is_none());
    }

    #[test]
    fn self_primary_detection() {
        let self_id = NodeId::new();
        let topology = ClusterTopology::new(self_id, PlacementConfig::default());
        topology.upsert_node(NodeInfo { id: self_id, addr: "self:9000".into() });
        assert!(topology.is_self_primary("b", "k"));
    }
}
