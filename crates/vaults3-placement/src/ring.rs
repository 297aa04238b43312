//! Consistent hash ring with virtual nodes (spec §4.8). Each physical node
//! gets `virtual_nodes` positions on the ring; looking up `(bucket, key)`
//! walks clockwise from its hash collecting the first `n` distinct node
//! IDs, giving replica placement that only reshuffles a small fraction of
//! keys when the membership changes.

use std::collections::HashSet;
use vaults3_common::NodeId;
use xxhash_rust::xxh64::xxh64;

/// Default virtual nodes per physical node, per spec.
pub const DEFAULT_VIRTUAL_NODES: u32 = 128;

fn hash(input: &str) -> u64 {
    xxh64(input.as_bytes(), 0)
}

/// A consistent hash ring over opaque `NodeId`s. Not itself concurrency
/// safe; callers needing concurrent access wrap it in a lock (see
/// `PlacementRing` below, which does exactly that).
#[derive(Clone, Debug, Default)]
pub struct HashRing {
    virtual_nodes: u32,
    /// Sorted by hash position; `(position, node)`.
    positions: Vec<(u64, NodeId)>,
}

impl HashRing {
    #[must_use]
    pub fn new(virtual_nodes: u32) -> Self {
        Self { virtual_nodes, positions: Vec::new() }
    }

    /// Insert `virtual_nodes` positions for `id`, each hashed from
    /// `xxhash64(id || "-" || i)`.
    pub fn add_node(&mut self, id: NodeId) {
        self.remove_node(id);
        for i in 0..self.virtual_nodes {
            let position = hash(&format!("{id}-{i}"));
            self.positions.push((position, id));
        }
        self.positions.sort_by_key(|(pos, _)| *pos);
    }

    /// Rebuild the ring without `id`'s virtual nodes.
    pub fn remove_node(&mut self, id: NodeId) {
        self.positions.retain(|(_, node)| *node != id);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.positions.iter().map(|(_, n)| n).collect::<HashSet<_>>().len()
    }

    /// The first `n` distinct node IDs walking clockwise from
    /// `hash(bucket + "/" + key)`, starting at the smallest position `>=`
    /// the key's hash (wrapping to the front of the ring).
    #[must_use]
    pub fn get_nodes(&self, bucket: &str, key: &str, n: usize) -> Vec<NodeId> {
        if self.positions.is_empty() || n == 0 {
            return Vec::new();
        }
        let target = hash(&format!("{bucket}/{key}"));
        let start = self
            .positions
            .partition_point(|(pos, _)| *pos < target);

        let mut out = Vec::with_capacity(n);
        let mut seen = HashSet::new();
        for offset in 0..self.positions.len() {
            let (_, node) = self.positions[(start + offset) % self.positions.len()];
            if seen.insert(node) {
                out.push(node);
                if out.len() == n {
                    break;
                }
            }
        }
        out
    }

    /// The single primary node for `(bucket, key)`, or `None` if the ring
    /// is empty.
    #[must_use]
    pub fn get_node(&self, bucket: &str, key: &str) -> Option<NodeId> {
        self.get_nodes(bucket, key, 1).into_iter().next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ring(n: usize) -> (HashRing, Vec<NodeId>) {
        let mut ring = HashRing::new(16);
        let nodes: Vec<NodeId> = (0..n).map(|_| NodeId::new()).collect();
        for node in &nodes {
            ring.add_node(*node);
        }
        (ring, nodes)
    }

    #[test]
    fn lookups_are_deterministic() {
        let (ring, _nodes) = ring(5);
        let a = ring.get_nodes("bucket", "key", 3);
        let b = ring.get_nodes("bucket", "key", 3);
        assert_eq!(a, b);
        assert_eq!(a.len(), 3);
    }

    #[test]
    fn get_nodes_returns_distinct_ids() {
        let (ring, _nodes) = ring(5);
        let replicas = ring.get_nodes("b", "k", 4);
        let unique: HashSet<_> = replicas.iter().collect();
        assert_eq!(unique.len(), replicas.len());
    }

    #[test]
    fn get_node_matches_first_of_get_nodes() {
        let (ring, _nodes) = ring(5);
        assert_eq!(ring.get_node("b", "k"), ring.get_nodes("b", "k", 3).into_iter().next());
    }

    #[test]
    fn removing_a_node_drops_it_from_lookups() {
        let (mut ring, nodes) = ring(3);
        let victim = nodes[0];
        ring.remove_node(victim);
        assert_eq!(ring.node_count(), 2);
        for _ in 0..50 {
            let replicas = ring.get_nodes("b", "k", 2);
            assert!(!replicas.contains(&victim));
        }
    }

    #[test]
    fn empty_ring_returns_no_nodes() {
        let ring = HashRing::new(16);
        assert!(ring.get_nodes("b", "k", 3).is_empty());
        assert!(ring.get_node("b", "k").is_none());
    }

    #[test]
    fn adding_a_node_only_remaps_a_small_fraction_of_keys() {
        let (mut ring, _nodes) = ring(4);
        let keys: Vec<String> = (0..500).map(|i| format!("key-{i}")).collect();
        let before: Vec<NodeId> = keys.iter().map(|k| ring.get_node("b", k).unwrap()).collect();

        ring.add_node(NodeId::new());
        let after: Vec<NodeId> = keys.iter().map(|k| ring.get_node("b", k).unwrap()).collect();

        let moved = before.iter().zip(&after).filter(|(a, b)| a != b).count();
        assert!(moved < keys.len() / 2, "moved {moved} of {}", keys.len());
    }
}
