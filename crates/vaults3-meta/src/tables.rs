//! Redb table definitions for persistent metadata storage (spec §4.6).

use redb::TableDefinition;

// S3 metadata
pub const BUCKETS: TableDefinition<&str, &[u8]> = TableDefinition::new("buckets");
/// Keyed by `"<bucket>/<key>"`; holds the current (latest) object state.
pub const OBJECTS: TableDefinition<&str, &[u8]> = TableDefinition::new("objects");
/// Keyed by `"<bucket>/<key>@<version_id>"`.
pub const OBJECT_VERSIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("object_versions");
/// Keyed by `"<bucket>\0<kind>"`; opaque per-bucket config blobs (lifecycle,
/// CORS, website, notification, lambda, encryption) owned by external
/// collaborators, not interpreted here.
pub const BUCKET_CONFIGS: TableDefinition<&str, &[u8]> = TableDefinition::new("bucket_configs");

// IAM
pub const IAM_USERS: TableDefinition<&str, &[u8]> = TableDefinition::new("iam_users");
pub const IAM_GROUPS: TableDefinition<&str, &[u8]> = TableDefinition::new("iam_groups");
pub const IAM_POLICIES: TableDefinition<&str, &[u8]> = TableDefinition::new("iam_policies");
pub const ACCESS_KEYS: TableDefinition<&str, &[u8]> = TableDefinition::new("access_keys");

// Audit / change log — sequence-numbered, append-only
pub const AUDIT: TableDefinition<u64, &[u8]> = TableDefinition::new("audit");
pub const CHANGE_LOG: TableDefinition<u64, &[u8]> = TableDefinition::new("change_log");

// Replication
pub const REPLICATION_QUEUE: TableDefinition<&str, &[u8]> = TableDefinition::new("replication_queue");
pub const REPLICATION_STATUS: TableDefinition<&str, &[u8]> = TableDefinition::new("replication_status");

/// Named monotonic counters (`"audit"`, `"change_log"`) backing the two
/// append-only tables above.
pub const SEQUENCES: TableDefinition<&str, u64> = TableDefinition::new("sequences");
