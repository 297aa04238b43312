//! Shared state handed to every axum handler.

use std::sync::Arc;

use vaults3_auth::SigV4Verifier;
use vaults3_common::{NodeId, VaultConfig};
use vaults3_meta::MetaStore;
use vaults3_placement::{ClusterTopology, FailureDetector};
use vaults3_raft::VaultRaftNode;
use vaults3_rebalancer::Rebalancer;

use crate::cluster::MembershipTracker;
use crate::objects::ObjectHandler;

pub struct AppState {
    pub config: VaultConfig,
    pub self_id: NodeId,
    pub store: Arc<MetaStore>,
    pub topology: Arc<ClusterTopology>,
    pub detector: Arc<FailureDetector>,
    pub raft: Arc<VaultRaftNode>,
    pub proxy: Arc<vaults3_proxy::FailoverProxy<ObjectHandler>>,
    pub rebalancer: Arc<Rebalancer>,
    pub verifier: SigV4Verifier,
    pub membership: MembershipTracker,
}
