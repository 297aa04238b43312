//! Cluster Proxy (spec §4.10): every node accepts every request, but only
//! the bucket/key's primary (per the hash ring) actually serves it. A
//! non-primary forwards the request verbatim to the primary over HTTP,
//! stamping a loop-prevention header so the primary never re-forwards a
//! request that was already forwarded to it.
//!
//! Grounded on `bin/objectio-gateway/src/osd_pool.rs`'s connection cache:
//! that pool dedups gRPC channels by node address and rebuilds one whose
//! address changed underneath it. An HTTP client doesn't need the same
//! per-node handshake (reqwest already pools keep-alive connections per
//! host), so `ClientCache` caches only the address-to-client mapping and
//! the same invalidate-on-address-change rule.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use http::{HeaderMap, Method, StatusCode};
use std::sync::Arc;
use vaults3_common::NodeId;
use vaults3_placement::ClusterTopology;

/// Header carried on every forwarded request. Its presence tells the
/// receiving node "this request already took one hop — handle it locally
/// no matter what the ring says," which is what stops an endless forward
/// loop if two nodes briefly disagree about who the primary is.
pub const PROXY_HEADER: &str = "x-vaults3-proxy";

#[derive(Clone, Debug)]
pub struct ProxyRequest {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ProxyRequest {
    #[must_use]
    pub fn new(method: Method, path: impl Into<String>, body: Bytes) -> Self {
        Self { method, path: path.into(), headers: HeaderMap::new(), body }
    }

    #[must_use]
    pub fn was_forwarded(&self) -> bool {
        self.headers.contains_key(PROXY_HEADER)
    }
}

#[derive(Clone, Debug)]
pub struct ProxyResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ProxyResponse {
    #[must_use]
    pub fn bad_gateway(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_GATEWAY,
            headers: HeaderMap::new(),
            body: Bytes::from(message.into()),
        }
    }
}

/// Serves a request this node is responsible for. Implemented by the
/// binary that wires up the actual object storage surface; this crate
/// only decides *whether* a request should be handled locally or
/// forwarded.
#[async_trait]
pub trait LocalHandler: Send + Sync {
    async fn handle(&self, req: ProxyRequest) -> ProxyResponse;
}

/// Caches one `reqwest::Client` per target node, rebuilding the cache
/// entry if the node's address has since changed.
pub(crate) struct ClientCache {
    entries: DashMap<NodeId, (String, reqwest::Client)>,
}

impl ClientCache {
    pub(crate) fn new() -> Self {
        Self { entries: DashMap::new() }
    }

    pub(crate) fn client_for(&self, id: NodeId, addr: &str) -> reqwest::Client {
        if let Some(entry) = self.entries.get(&id) {
            if entry.0 == addr {
                return entry.1.clone();
            }
        }
        let client = reqwest::Client::new();
        self.entries.insert(id, (addr.to_string(), client.clone()));
        client
    }
}

pub(crate) async fn forward(
    clients: &ClientCache,
    self_id: NodeId,
    target: NodeId,
    addr: &str,
    req: ProxyRequest,
) -> Result<ProxyResponse, reqwest::Error> {
    let client = clients.client_for(target, addr);
    let url = format!("http://{addr}{}", req.path);

    let mut headers = req.headers;
    headers.insert(PROXY_HEADER, self_id.to_string().parse().expect("node id is valid header value"));

    let response = client
        .request(req.method, url)
        .headers(headers)
        .body(req.body)
        .send()
        .await?;

    let status = response.status();
    let headers = response.headers().clone();
    let body = response.bytes().await?;
    Ok(ProxyResponse { status, headers, body })
}

/// Routes every request to the primary node for its `(bucket, key)`,
/// handling it locally if this node *is* the primary (or no primary is
/// known yet, e.g. an empty ring during startup).
pub struct ClusterProxy<H> {
    self_id: NodeId,
    topology: Arc<ClusterTopology>,
    clients: ClientCache,
    local: H,
}

impl<H: LocalHandler> ClusterProxy<H> {
    pub fn new(topology: Arc<ClusterTopology>, local: H) -> Self {
        Self { self_id: topology.self_id(), topology, clients: ClientCache::new(), local }
    }

    pub async fn route(&self, bucket: &str, key: &str, req: ProxyRequest) -> ProxyResponse {
        if req.was_forwarded() {
            return self.local.handle(req).await;
        }

        let primary = self.topology.primary_for(bucket, key);
        match primary {
            None => self.local.handle(req).await,
            Some(id) if id == self.self_id => self.local.handle(req).await,
            Some(id) => match self.topology.get_node(id) {
                None => self.local.handle(req).await,
                Some(node) => match forward(&self.clients, self.self_id, id, &node.addr, req).await {
                    Ok(resp) => resp,
                    Err(err) => {
                        tracing::warn!(target: "vaults3_proxy", node = %id, error = %err, "forwarding to primary failed");
                        ProxyResponse::bad_gateway(format!("upstream {id} unreachable: {err}"))
                    }
                },
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vaults3_placement::{NodeInfo, PlacementConfig};

    struct Echo;

    #[async_trait]
    impl LocalHandler for Echo {
        async fn handle(&self, req: ProxyRequest) -> ProxyResponse {
            ProxyResponse { status: StatusCode::OK, headers: HeaderMap::new(), body: req.body }
        }
    }

    fn topology_with_only_self() -> (Arc<ClusterTopology>, NodeId) {
        let self_id = NodeId::new();
        let topology = Arc::new(ClusterTopology::new(self_id, PlacementConfig::default()));
        topology.upsert_node(NodeInfo { id: self_id, addr: "self:9000".into() });
        (topology, self_id)
    }

    #[tokio::test]
    async fn handles_locally_when_self_is_primary() {
        let (topology, _self_id) = topology_with_only_self();
        let proxy = ClusterProxy::new(topology, Echo);

        let req = ProxyRequest::new(Method::GET, "/b/k", Bytes::from_static(b"hello"));
        let resp = proxy.route("b", "k", req).await;
        assert_eq!(resp.status, StatusCode::OK);
        assert_eq!(resp.body, Bytes::from_static(b"hello"));
    }

    #[tokio::test]
    async fn an_already_forwarded_request_is_always_handled_locally() {
        let (topology, _self_id) = topology_with_only_self();
        // Register a second node so this node is no longer guaranteed primary.
        topology.upsert_node(NodeInfo { id: NodeId::new(), addr: "other:9000".into() });
        let proxy = ClusterProxy::new(topology, Echo);

        let mut req = ProxyRequest::new(Method::GET, "/b/k", Bytes::from_static(b"hello"));
        req.headers.insert(PROXY_HEADER, "some-node".parse().unwrap());
        let resp = proxy.route("b", "k", req).await;
        assert_eq!(resp.status, StatusCode::OK);
    }

    #[tokio::test]
    async fn forwarding_to_an_unreachable_primary_returns_bad_gateway() {
        let self_id = NodeId::new();
        let topology = Arc::new(ClusterTopology::new(self_id, PlacementConfig::default()));
        let other = NodeId::new();
        // `other` is the only node registered, so it is always primary and
        // self never handles locally.
        topology.upsert_node(NodeInfo { id: other, addr: "127.0.0.1:1".into() });
        let proxy = ClusterProxy::new(topology, Echo);

        let req = ProxyRequest::new(Method::GET, "/b/k", Bytes::new());
        let resp = proxy.route("b", "k", req).await;
        assert_eq!(resp.status, StatusCode::BAD_GATEWAY);
    }
}
