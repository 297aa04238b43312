//! Failover Proxy (spec §4.10): like the Cluster Proxy, but walks the full
//! ordered replica set instead of trusting the single primary — a node the
//! failure detector has marked `Down` is skipped, and if every replica is
//! unreachable the request falls through to being handled locally as a
//! last resort.
//!
//! Grounded on `bin/objectio-gateway/src/scatter_gather.rs`'s fan-out over
//! a node set; here the "fan-out" is sequential failover rather than
//! parallel query, since only one node needs to answer a single object
//! request.

use async_trait::async_trait;
use std::sync::Arc;
use vaults3_common::NodeId;
use vaults3_placement::{ClusterTopology, FailureDetector, NodeHealth};

use crate::basic::{forward, ClientCache, LocalHandler, ProxyRequest, ProxyResponse};

pub struct FailoverProxy<H> {
    self_id: NodeId,
    topology: Arc<ClusterTopology>,
    detector: Arc<FailureDetector>,
    clients: ClientCache,
    local: H,
}

impl<H: LocalHandler> FailoverProxy<H> {
    pub fn new(topology: Arc<ClusterTopology>, detector: Arc<FailureDetector>, local: H) -> Self {
        Self { self_id: topology.self_id(), topology, detector, clients: ClientCache::new(), local }
    }

    pub async fn route(&self, bucket: &str, key: &str, req: ProxyRequest) -> ProxyResponse {
        if req.was_forwarded() {
            return self.local.handle(req).await;
        }

        for candidate in self.topology.replicas_for(bucket, key) {
            if candidate == self.self_id {
                return self.local.handle(req).await;
            }
            if self.detector.health(candidate) == Some(NodeHealth::Down) {
                continue;
            }
            let Some(node) = self.topology.get_node(candidate) else { continue };
            match forward(&self.clients, self.self_id, candidate, &node.addr, req.clone()).await {
                Ok(resp) => return resp,
                Err(err) => {
                    tracing::warn!(
                        target: "vaults3_proxy",
                        node = %candidate,
                        error = %err,
                        "replica failed, trying next"
                    );
                }
            }
        }

        self.local.handle(req).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http::{HeaderMap, Method, StatusCode};
    use vaults3_placement::{DetectorConfig, NodeInfo, PlacementConfig};

    struct Echo;

    #[async_trait]
    impl LocalHandler for Echo {
        async fn handle(&self, req: ProxyRequest) -> ProxyResponse {
            ProxyResponse { status: StatusCode::OK, headers: HeaderMap::new(), body: req.body }
        }
    }

    #[tokio::test]
    async fn handles_locally_when_self_is_among_the_replicas() {
        let self_id = NodeId::new();
        let topology = Arc::new(ClusterTopology::new(self_id, PlacementConfig::default()));
        topology.upsert_node(NodeInfo { id: self_id, addr: "self:9000".into() });
        let (detector, _rx) = FailureDetector::new(self_id, DetectorConfig::default());

        let proxy = FailoverProxy::new(topology, detector, Echo);
        let req = ProxyRequest::new(Method::GET, "/b/k", Bytes::from_static(b"hi"));
        let resp = proxy.route("b", "k", req).await;
        assert_eq!(resp.status, StatusCode::OK);
    }

    #[tokio::test]
    async fn falls_back_to_local_handling_when_every_replica_is_unreachable() {
        let self_id = NodeId::new();
        let mut config = PlacementConfig::default();
        config.replica_count = 2;
        let topology = Arc::new(ClusterTopology::new(self_id, config));

        let other = NodeId::new();
        topology.upsert_node(NodeInfo { id: other, addr: "127.0.0.1:1".into() });
        let (detector, _rx) = FailureDetector::new(self_id, DetectorConfig::default());

        let proxy = FailoverProxy::new(topology, detector, Echo);
        let req = ProxyRequest::new(Method::GET, "/b/k", Bytes::from_static(b"hi"));
        let resp = proxy.route("b", "k", req).await;
        // self is not in the (possibly one-node) replica set, the only peer
        // is unreachable, so the request must still come back OK via the
        // local-as-last-resort fallback rather than a bad gateway.
        assert_eq!(resp.status, StatusCode::OK);
    }

    #[tokio::test]
    async fn a_down_replica_is_skipped_in_favor_of_local_handling() {
        let self_id = NodeId::new();
        let mut config = PlacementConfig::default();
        config.replica_count = 2;
        let topology = Arc::new(ClusterTopology::new(self_id, config));
        topology.upsert_node(NodeInfo { id: self_id, addr: "self:9000".into() });

        let down_peer = NodeId::new();
        topology.upsert_node(NodeInfo { id: down_peer, addr: "127.0.0.1:1".into() });
        let (detector, _rx) = FailureDetector::new(
            self_id,
            DetectorConfig { down_after: 1, suspect_after: 1, ..DetectorConfig::default() },
        );
        detector.register_peer(down_peer, "127.0.0.1:1".into());
        // Connection to an unbound loopback port fails immediately, so one
        // probe round is enough to cross the (lowered) down threshold.
        detector.probe_once().await;
        assert_eq!(detector.health(down_peer), Some(NodeHealth::Down));

        let proxy = FailoverProxy::new(topology, detector, Echo);
        let req = ProxyRequest::new(Method::GET, "/b/k", Bytes::from_static(b"hi"));
        let resp = proxy.route("b", "k", req).await;
        assert_eq!(resp.status, StatusCode::OK);
    }
}
