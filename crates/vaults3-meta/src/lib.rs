//! VaultS3 Metadata Store - embedded redb-backed metadata service
//!
//! A single `MetaStore` wraps one redb database and exposes every logical
//! table spec.md §4.6 names (buckets, objects, object versions, IAM,
//! access keys, audit, replication queue/status, change log, bucket
//! configs). It has no opinion on consensus: `vaults3-raft` decodes
//! replicated commands and calls straight through to these methods, so
//! every mutation here must stay cheap to replay deterministically.

mod bucket;
mod iam;
mod object;
mod replication;
pub mod store;
pub mod tables;
pub mod types;

pub use store::MetaStore;
pub use types::{
    AuditRecord, ChangeEntry, ChangeOp, PeerReplicationStatus, ReplicationEvent, ReplicationOp,
    StoredAccessKey, StoredBucket, StoredGroup, StoredObject, StoredObjectVersion, StoredPolicy,
    StoredUser,
};
