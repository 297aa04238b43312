//! HTTP transport for Raft RPCs (spec §4.7's "Raft traffic travels over the
//! same cluster HTTP surface as everything else"). Each peer is addressed
//! by the `addr` carried in its `BasicNode`; requests/responses are plain
//! JSON bodies rather than a dedicated wire format, matching the rest of
//! the cluster's inter-node calls. Any transport failure (connection
//! refused, timeout, non-2xx status, bad JSON) is surfaced as a network
//! error so openraft retries it rather than treating it as a vote/append
//! rejection.

use crate::types::{NodeId, TypeConfig};
use openraft::error::{NetworkError, RPCError, RaftError};
use openraft::network::{RPCOption, RaftNetwork, RaftNetworkFactory};
use openraft::raft::{
    AppendEntriesRequest, AppendEntriesResponse, InstallSnapshotRequest, InstallSnapshotResponse,
    VoteRequest, VoteResponse,
};
use openraft::BasicNode;

/// Builds one `HttpNetwork` client per target node, caching nothing beyond
/// the shared `reqwest::Client` connection pool.
#[derive(Clone, Default)]
pub struct HttpNetworkFactory {
    client: reqwest::Client,
}

impl HttpNetworkFactory {
    #[must_use]
    pub fn new() -> Self {
        Self { client: reqwest::Client::new() }
    }
}

impl RaftNetworkFactory<TypeConfig> for HttpNetworkFactory {
    type Network = HttpNetwork;

    async fn new_client(&mut self, target: NodeId, node: &BasicNode) -> Self::Network {
        HttpNetwork {
            addr: node.addr.clone(),
            client: self.client.clone(),
        }
    }
}

pub struct HttpNetwork {
    addr: String,
    client: reqwest::Client,
}

impl HttpNetwork {
    async fn post<Req, Resp, E>(&self, path: &str, req: &Req) -> Result<Resp, RPCError<NodeId, BasicNode, E>>
    where
        Req: serde::Serialize,
        Resp: serde::de::DeserializeOwned,
    {
        let url = format!("http://{}/raft/{path}", self.addr);
        let response = self
            .client
            .post(&url)
            .json(req)
            .send()
            .await
            .map_err(|e| RPCError::Network(NetworkError::new(&e)))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| RPCError::Network(NetworkError::new(&e)))?;

        if !status.is_success() {
            return Err(RPCError::Network(NetworkError::new(&std::io::Error::other(
                format!("raft peer {} returned HTTP {status}", self.addr),
            ))));
        }

        serde_json::from_slice(&body)
            .map_err(|e| RPCError::Network(NetworkError::new(&std::io::Error::other(e))))
    }
}

impl RaftNetwork<TypeConfig> for HttpNetwork {
    async fn append_entries(
        &mut self,
        rpc: AppendEntriesRequest<TypeConfig>,
        _option: RPCOption,
    ) -> Result<AppendEntriesResponse<NodeId>, RPCError<NodeId, BasicNode, RaftError<NodeId>>> {
        self.post("append_entries", &rpc).await
    }

    async fn install_snapshot(
        &mut self,
        rpc: InstallSnapshotRequest<TypeConfig>,
        _option: RPCOption,
    ) -> Result<InstallSnapshotResponse<NodeId>, RPCError<NodeId, BasicNode, RaftError<NodeId>>> {
        self.post("install_snapshot", &rpc).await
    }

    async fn vote(
        &mut self,
        rpc: VoteRequest<NodeId>,
        _option: RPCOption,
    ) -> Result<VoteResponse<NodeId>, RPCError<NodeId, BasicNode, RaftError<NodeId>>> {
        self.post("vote", &rpc).await
    }
}
