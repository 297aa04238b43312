//! Stored types for metadata persistence. Every type here is bincode-encoded
//! into a redb value slot; none of it escapes the store except as plain
//! data returned to callers.

use serde::{Deserialize, Serialize};
use vaults3_common::{SiteId, VectorClock, VersioningState};

/// Bucket record (spec §4.6 "buckets" table).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoredBucket {
    pub name: String,
    pub created_at: i64,
    pub versioning: VersioningState,
    pub object_lock_enabled: bool,
}

/// Current (latest) state of an object, keyed by `(bucket, key)`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoredObject {
    pub bucket: String,
    pub key: String,
    /// `None` for unversioned buckets; the current version id otherwise.
    pub version_id: Option<String>,
    pub size: u64,
    pub etag: String,
    pub content_type: String,
    pub last_modified: i64,
    pub vector_clock: VectorClock,
    pub delete_marker: bool,
}

/// A single historical version of an object, kept once its bucket has
/// versioning enabled.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoredObjectVersion {
    pub bucket: String,
    pub key: String,
    pub version_id: String,
    pub size: u64,
    pub etag: String,
    pub content_type: String,
    pub last_modified: i64,
    pub delete_marker: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoredUser {
    pub user_id: String,
    pub display_name: String,
    pub arn: String,
    pub created_at: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoredGroup {
    pub group_id: String,
    pub group_name: String,
    pub member_user_ids: Vec<String>,
}

/// An IAM policy document. The document body is opaque JSON, interpreted by
/// the auth evaluator, not by the store.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoredPolicy {
    pub policy_id: String,
    pub document: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoredAccessKey {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub user_id: String,
    pub enabled: bool,
    pub created_at: i64,
}

/// One row of the durable audit trail (spec §4.6 supplement; feeds the
/// `onAudit` hook in spec §6).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditRecord {
    pub at: i64,
    pub actor: String,
    pub action: String,
    pub bucket: String,
    pub key: String,
    pub outcome: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeOp {
    Put,
    Delete,
}

/// One entry of the active-active replication change log (spec §4.13).
/// `seq` is assigned by `MetaStore::append_change_log`; callers pass every
/// other field already computed, since the FSM applying this entry must be
/// deterministic (spec §4.7: no clocks inside the store).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChangeEntry {
    pub seq: u64,
    pub site_id: SiteId,
    pub bucket: String,
    pub key: String,
    pub op: ChangeOp,
    pub size: u64,
    pub etag: String,
    pub vector_clock: VectorClock,
    pub at: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplicationOp {
    Put,
    Delete,
}

/// One queued active-passive replication event (spec §4.13).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReplicationEvent {
    pub event_id: String,
    pub peer: String,
    pub bucket: String,
    pub key: String,
    pub op: ReplicationOp,
    pub retry_count: u32,
    pub next_retry_at: i64,
}

/// Per-peer replication health, surfaced by the cluster status endpoint.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PeerReplicationStatus {
    pub queue_depth: u64,
    pub last_error: Option<String>,
    pub total_synced: u64,
    pub total_failed: u64,
    pub last_sync_at: Option<i64>,
}
