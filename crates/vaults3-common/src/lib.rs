//! VaultS3 Common - Shared types, errors, and configuration
//!
//! This crate provides the types, error taxonomy, and configuration surface
//! shared by every VaultS3 component: the storage engine chain, the
//! metadata store, the Raft FSM wrapper, and the placement and replication
//! subsystems.

pub mod config;
pub mod error;
pub mod types;

pub use config::VaultConfig;
pub use error::{Error, Result};
pub use types::*;
