//! openraft type configuration for the VaultS3 cluster (spec §4.7). Node
//! identity is a plain `u64` index into `vaults3-placement`'s topology
//! rather than the string `NodeId` used elsewhere, since openraft wants a
//! small `Copy + Ord` id for its internal membership bookkeeping; the
//! mapping between the two lives in `vaults3-placement::topology`.

use crate::fsm::CommandResponse;
use openraft::{BasicNode, Entry};
use std::io::Cursor;

pub type NodeId = u64;

openraft::declare_raft_types!(
    pub TypeConfig:
        D = crate::command::Command,
        R = CommandResponse,
        NodeId = NodeId,
        Node = BasicNode,
        Entry = Entry<TypeConfig>,
        SnapshotData = Cursor<Vec<u8>>,
);
