//! A running Raft group member: log store, state machine, and HTTP
//! network wired into one `openraft::Raft` handle, plus the thin
//! `propose`/membership API the rest of the server calls through.

use crate::command::Command;
use crate::fsm::{CommandResponse, VaultStateMachine};
use crate::log_store::RaftLogStore;
use crate::network::HttpNetworkFactory;
use crate::state_machine::VaultStateMachineStore;
use crate::types::{NodeId, TypeConfig};
use openraft::{BasicNode, Config, Raft};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use vaults3_common::{Error, Result};
use vaults3_meta::MetaStore;

pub struct VaultRaftNode {
    raft: Raft<TypeConfig>,
    node_id: NodeId,
}

impl VaultRaftNode {
    /// Start (or resume) this node's Raft participation, opening its log
    /// and state-machine redb files under `data_dir`.
    pub async fn start(node_id: NodeId, data_dir: impl AsRef<Path>, store: Arc<MetaStore>) -> Result<Self> {
        let config = Arc::new(
            Config::default()
                .validate()
                .map_err(|e| Error::internal(e.to_string()))?,
        );
        let log_store = RaftLogStore::open(data_dir.as_ref().join("raft_log.redb"))
            .map_err(|e| Error::internal(e.to_string()))?;
        let fsm = Arc::new(VaultStateMachine::new(store));
        let state_machine = VaultStateMachineStore::open(fsm, data_dir.as_ref().join("raft_sm.redb"))
            .map_err(|e| Error::internal(e.to_string()))?;
        let network = HttpNetworkFactory::new();

        let raft = Raft::new(node_id, config, network, log_store, state_machine)
            .await
            .map_err(|e| Error::internal(e.to_string()))?;

        Ok(Self { raft, node_id })
    }

    /// Bootstrap a brand-new single-node cluster (first node only).
    pub async fn initialize(&self, members: BTreeSet<NodeId>, node: BasicNode) -> Result<()> {
        let mut membership = std::collections::BTreeMap::new();
        for id in members {
            membership.insert(id, node.clone());
        }
        self.raft
            .initialize(membership)
            .await
            .map_err(|e| Error::internal(e.to_string()))
    }

    /// Propose a command and wait for it to be committed to a majority
    /// (spec §4.7). A non-leader replica reports `NotLeader`, naming the
    /// current leader when one is known, so the caller can redirect. A
    /// command that committed but failed for a reason the caller needs to
    /// see (a duplicate `CreateBucket`) surfaces as that error too, rather
    /// than as a blanket success.
    pub async fn propose(&self, command: Command) -> Result<()> {
        match self.raft.client_write(command).await {
            Ok(response) => match response.data {
                CommandResponse::Ok => Ok(()),
                CommandResponse::AlreadyExists(name) => Err(Error::BucketAlreadyExists(name)),
            },
            Err(e) => {
                if let Some(forward) = e.forward_to_leader() {
                    return Err(Error::NotLeader {
                        leader: forward.leader_id.map(|id| id.to_string()),
                    });
                }
                Err(Error::internal(e.to_string()))
            }
        }
    }

    pub async fn add_learner(&self, node_id: NodeId, node: BasicNode) -> Result<()> {
        self.raft
            .add_learner(node_id, node, true)
            .await
            .map_err(|e| Error::internal(e.to_string()))?;
        Ok(())
    }

    pub async fn change_membership(&self, members: BTreeSet<NodeId>) -> Result<()> {
        self.raft
            .change_membership(members, false)
            .await
            .map_err(|e| Error::internal(e.to_string()))?;
        Ok(())
    }

    pub async fn is_leader(&self) -> bool {
        self.raft.current_leader().await == Some(self.node_id)
    }

    #[must_use]
    pub const fn node_id(&self) -> NodeId {
        self.node_id
    }

    #[must_use]
    pub const fn raft(&self) -> &Raft<TypeConfig> {
        &self.raft
    }
}
