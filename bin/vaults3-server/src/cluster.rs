//! Cluster-internal HTTP surface (spec §6): health, Raft membership
//! management, and status reporting. Kept deliberately thin — this is the
//! reference harness's control plane, not a general admin API.

use std::collections::BTreeSet;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use openraft::BasicNode;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use vaults3_common::NodeId as TopoNodeId;
use vaults3_placement::NodeInfo;
use vaults3_raft::NodeId as RaftNodeId;
use vaults3_replication::build_sync_response;

use crate::state::AppState;

/// Voter membership this node believes is current, maintained locally
/// rather than read back from openraft's metrics channel so join/leave
/// don't depend on exactly which metrics fields a given openraft version
/// exposes.
pub struct MembershipTracker {
    pub voters: Mutex<BTreeSet<RaftNodeId>>,
}

impl MembershipTracker {
    #[must_use]
    pub fn new(self_raft_id: RaftNodeId) -> Self {
        Self { voters: Mutex::new(BTreeSet::from([self_raft_id])) }
    }
}

pub async fn health(State(state): State<Arc<AppState>>) -> Response {
    match state.store.list_buckets() {
        Ok(_) => StatusCode::OK.into_response(),
        Err(_) => StatusCode::SERVICE_UNAVAILABLE.into_response(),
    }
}

#[derive(Serialize)]
struct ServerEntry {
    id: String,
    address: String,
}

#[derive(Serialize)]
struct ClusterStatus {
    node_id: String,
    state: &'static str,
    leader: Option<String>,
    leader_id: Option<String>,
    servers: Vec<ServerEntry>,
    stats: ClusterStats,
}

#[derive(Serialize)]
struct ClusterStats {
    bucket_count: usize,
    replication_peers: Vec<ReplicationPeerStats>,
}

#[derive(Serialize)]
struct ReplicationPeerStats {
    peer: String,
    queue_depth: u64,
    total_synced: u64,
    total_failed: u64,
    last_error: Option<String>,
}

pub async fn cluster_status(State(state): State<Arc<AppState>>) -> Response {
    let is_leader = state.raft.is_leader().await;
    let servers = state
        .topology
        .all_nodes()
        .into_iter()
        .map(|n| ServerEntry { id: n.id.to_string(), address: n.addr })
        .collect();

    let bucket_count = state.store.list_buckets().map(|b| b.len()).unwrap_or(0);
    let mut replication_peers = Vec::new();
    for peer in &state.config.replication.peers {
        if let Ok(Some(status)) = state.store.get_replication_status(&peer.name) {
            replication_peers.push(ReplicationPeerStats {
                peer: peer.name.clone(),
                queue_depth: status.queue_depth,
                total_synced: status.total_synced,
                total_failed: status.total_failed,
                last_error: status.last_error,
            });
        }
    }

    let status = ClusterStatus {
        node_id: state.self_id.to_string(),
        state: if is_leader { "Leader" } else { "Follower" },
        leader: if is_leader { Some(state.self_id.to_string()) } else { None },
        leader_id: if is_leader { Some(state.self_id.to_string()) } else { None },
        servers,
        stats: ClusterStats { bucket_count, replication_peers },
    };

    Json(status).into_response()
}

#[derive(Deserialize)]
pub struct JoinRequest {
    /// This node's `vaults3-raft` membership id.
    pub raft_node_id: RaftNodeId,
    /// This node's `vaults3-placement` topology id (a UUID, string form).
    pub topology_node_id: String,
    pub addr: String,
}

pub async fn cluster_join(State(state): State<Arc<AppState>>, Json(req): Json<JoinRequest>) -> Response {
    if !state.raft.is_leader().await {
        return StatusCode::TEMPORARY_REDIRECT.into_response();
    }

    let node = BasicNode { addr: req.addr.clone() };
    if let Err(err) = state.raft.add_learner(req.raft_node_id, node).await {
        tracing::warn!(target: "vaults3_server", error = %err, "add_learner failed");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    let voters = {
        let mut voters = state.membership.voters.lock();
        voters.insert(req.raft_node_id);
        voters.clone()
    };
    if let Err(err) = state.raft.change_membership(voters).await {
        tracing::warn!(target: "vaults3_server", error = %err, "change_membership failed");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    if let Ok(uuid) = Uuid::parse_str(&req.topology_node_id) {
        let id = TopoNodeId::from_uuid(uuid);
        state.topology.upsert_node(NodeInfo { id, addr: req.addr.clone() });
        state.detector.register_peer(id, req.addr);
    }

    StatusCode::OK.into_response()
}

#[derive(Deserialize)]
pub struct LeaveRequest {
    pub raft_node_id: RaftNodeId,
    pub topology_node_id: String,
}

pub async fn cluster_leave(State(state): State<Arc<AppState>>, Json(req): Json<LeaveRequest>) -> Response {
    if !state.raft.is_leader().await {
        return StatusCode::TEMPORARY_REDIRECT.into_response();
    }

    let voters = {
        let mut voters = state.membership.voters.lock();
        voters.remove(&req.raft_node_id);
        voters.clone()
    };
    if let Err(err) = state.raft.change_membership(voters).await {
        tracing::warn!(target: "vaults3_server", error = %err, "change_membership failed");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    if let Ok(uuid) = Uuid::parse_str(&req.topology_node_id) {
        let id = TopoNodeId::from_uuid(uuid);
        state.topology.remove_node(id);
        state.detector.remove_peer(id);
    }

    StatusCode::OK.into_response()
}

#[derive(Serialize)]
struct RebalanceTriggerResponse {
    started: bool,
}

/// Idempotent trigger for spec §4.11's scan: a second call while one is
/// already running just reports `started: false` rather than queuing a
/// second pass.
pub async fn rebalance_trigger(State(state): State<Arc<AppState>>) -> Response {
    let started = state.rebalancer.trigger();
    Json(RebalanceTriggerResponse { started }).into_response()
}

#[derive(Deserialize)]
pub struct SyncRequestBody {
    pub site_id: String,
    pub since_seq: u64,
    pub limit: usize,
}

pub async fn replication_sync(State(state): State<Arc<AppState>>, Json(req): Json<SyncRequestBody>) -> Response {
    let self_site = match &state.config.replication.site_id {
        Some(id) => vaults3_common::SiteId::new(id.clone()),
        None => vaults3_common::SiteId::new("default"),
    };
    let _ = req.site_id;
    match build_sync_response(&state.store, &self_site, req.since_seq, req.limit) {
        Ok(response) => Json(response).into_response(),
        Err(err) => {
            tracing::warn!(target: "vaults3_server", error = %err, "replication sync failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
