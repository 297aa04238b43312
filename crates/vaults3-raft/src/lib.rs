//! Raft consensus wrapper for VaultS3 (spec §4.7). `vaults3-meta` owns the
//! durable tables; this crate owns replicating mutations to them: a tagged
//! `Command` envelope, a deterministic FSM dispatcher, a redb-backed log
//! store, an HTTP network transport, and the `openraft::Raft` node that
//! ties them together.

pub mod command;
pub mod fsm;
pub mod log_store;
pub mod network;
pub mod node;
pub mod state_machine;
pub mod types;

pub use command::Command;
pub use fsm::{CommandResponse, VaultStateMachine};
pub use log_store::RaftLogStore;
pub use network::{HttpNetwork, HttpNetworkFactory};
pub use node::VaultRaftNode;
pub use state_machine::VaultStateMachineStore;
pub use types::{NodeId, TypeConfig};
