//! Core metadata store: a single embedded redb database exposing
//! transactional operations over the logical tables `vaults3_meta::tables`
//! describes. Each mutation commits in its own redb write transaction;
//! reads see a consistent snapshot as of `begin_read`. Bucket, object, IAM,
//! and replication operations live in their own modules as `impl MetaStore`
//! blocks; this module owns the database handle, sequence counters, the
//! audit trail, the change log, and whole-store snapshot/restore.

use crate::tables::{
    ACCESS_KEYS, AUDIT, BUCKET_CONFIGS, BUCKETS, CHANGE_LOG, IAM_GROUPS, IAM_POLICIES, IAM_USERS,
    OBJECT_VERSIONS, OBJECTS, REPLICATION_QUEUE, REPLICATION_STATUS, SEQUENCES,
};
use crate::types::{AuditRecord, ChangeEntry};
use redb::{Database, ReadableTable};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use vaults3_common::{Error, Result};

pub(crate) fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    bincode::serialize(value).map_err(|e| Error::Serialization(e.to_string()))
}

pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    bincode::deserialize(bytes).map_err(|e| Error::Serialization(e.to_string()))
}

pub(crate) fn meta_err(e: impl std::fmt::Display) -> Error {
    Error::internal(e.to_string())
}

/// Embedded metadata store. One `MetaStore` wraps one redb database file;
/// in the running server the Raft FSM in `vaults3-raft` is its only writer.
pub struct MetaStore {
    pub(crate) db: Database,
}

impl MetaStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = Database::create(path).map_err(meta_err)?;
        let store = Self { db };
        store.init_tables()?;
        Ok(store)
    }

    fn init_tables(&self) -> Result<()> {
        let txn = self.db.begin_write().map_err(meta_err)?;
        txn.open_table(BUCKETS).map_err(meta_err)?;
        txn.open_table(OBJECTS).map_err(meta_err)?;
        txn.open_table(OBJECT_VERSIONS).map_err(meta_err)?;
        txn.open_table(IAM_USERS).map_err(meta_err)?;
        txn.open_table(IAM_GROUPS).map_err(meta_err)?;
        txn.open_table(IAM_POLICIES).map_err(meta_err)?;
        txn.open_table(ACCESS_KEYS).map_err(meta_err)?;
        txn.open_table(AUDIT).map_err(meta_err)?;
        txn.open_table(REPLICATION_QUEUE).map_err(meta_err)?;
        txn.open_table(REPLICATION_STATUS).map_err(meta_err)?;
        txn.open_table(CHANGE_LOG).map_err(meta_err)?;
        txn.open_table(BUCKET_CONFIGS).map_err(meta_err)?;
        txn.open_table(SEQUENCES).map_err(meta_err)?;
        txn.commit().map_err(meta_err)?;
        Ok(())
    }

    /// Atomically bump and return the next value of a named sequence
    /// (`"audit"` or `"change_log"`), starting at 1, within `txn`.
    pub(crate) fn next_sequence(&self, txn: &redb::WriteTransaction, name: &str) -> Result<u64> {
        let mut table = txn.open_table(SEQUENCES).map_err(meta_err)?;
        let current = table
            .get(name)
            .map_err(meta_err)?
            .map(|v| v.value())
            .unwrap_or(0);
        let next = current + 1;
        table.insert(name, next).map_err(meta_err)?;
        Ok(next)
    }

    /// Append a durable audit record, returning its sequence number.
    pub fn record_audit(&self, record: AuditRecord) -> Result<u64> {
        let txn = self.db.begin_write().map_err(meta_err)?;
        let seq = self.next_sequence(&txn, "audit")?;
        {
            let mut table = txn.open_table(AUDIT).map_err(meta_err)?;
            table.insert(seq, encode(&record)?.as_slice()).map_err(meta_err)?;
        }
        txn.commit().map_err(meta_err)?;
        Ok(seq)
    }

    /// Read up to `limit` audit records with `seq > since_seq`, in order.
    /// `limit == 0` means unbounded.
    pub fn read_audit(&self, since_seq: u64, limit: usize) -> Result<Vec<AuditRecord>> {
        let txn = self.db.begin_read().map_err(meta_err)?;
        let table = txn.open_table(AUDIT).map_err(meta_err)?;
        let mut out = Vec::new();
        for row in table.iter().map_err(meta_err)? {
            let (k, v) = row.map_err(meta_err)?;
            if k.value() <= since_seq {
                continue;
            }
            out.push(decode(v.value())?);
            if limit > 0 && out.len() >= limit {
                break;
            }
        }
        Ok(out)
    }

    /// Append a change-log entry, assigning its `seq`. The caller must have
    /// already computed every other field deterministically (spec §4.7).
    pub fn append_change_log(&self, mut entry: ChangeEntry) -> Result<u64> {
        let txn = self.db.begin_write().map_err(meta_err)?;
        let seq = self.next_sequence(&txn, "change_log")?;
        entry.seq = seq;
        {
            let mut table = txn.open_table(CHANGE_LOG).map_err(meta_err)?;
            table.insert(seq, encode(&entry)?.as_slice()).map_err(meta_err)?;
        }
        txn.commit().map_err(meta_err)?;
        Ok(seq)
    }

    /// Read up to `limit` change-log entries with `seq > since_seq`, in
    /// order. `limit == 0` means unbounded.
    pub fn read_change_log(&self, since_seq: u64, limit: usize) -> Result<Vec<ChangeEntry>> {
        let txn = self.db.begin_read().map_err(meta_err)?;
        let table = txn.open_table(CHANGE_LOG).map_err(meta_err)?;
        let mut out = Vec::new();
        for row in table.iter().map_err(meta_err)? {
            let (k, v) = row.map_err(meta_err)?;
            if k.value() <= since_seq {
                continue;
            }
            out.push(decode(v.value())?);
            if limit > 0 && out.len() >= limit {
                break;
            }
        }
        Ok(out)
    }

    /// Drop every change-log entry with `seq < before_seq`.
    pub fn trim_change_log(&self, before_seq: u64) -> Result<()> {
        let txn = self.db.begin_write().map_err(meta_err)?;
        {
            let mut table = txn.open_table(CHANGE_LOG).map_err(meta_err)?;
            let stale: Vec<u64> = table
                .iter()
                .map_err(meta_err)?
                .filter_map(std::result::Result::ok)
                .map(|(k, _)| k.value())
                .filter(|&seq| seq < before_seq)
                .collect();
            for seq in stale {
                table.remove(seq).map_err(meta_err)?;
            }
        }
        txn.commit().map_err(meta_err)?;
        Ok(())
    }

    /// The last assigned change-log sequence number, or 0 if none yet.
    pub fn last_change_log_seq(&self) -> Result<u64> {
        let txn = self.db.begin_read().map_err(meta_err)?;
        let table = txn.open_table(SEQUENCES).map_err(meta_err)?;
        Ok(table
            .get("change_log")
            .map_err(meta_err)?
            .map(|v| v.value())
            .unwrap_or(0))
    }
}

/// One row of a whole-store snapshot, tagged with its source table so
/// `restore` can dispatch it back to the right place.
#[derive(Serialize, serde::Deserialize)]
struct SnapshotEntry {
    table: String,
    key: Vec<u8>,
    value: Vec<u8>,
}

fn str_key(bytes: &[u8]) -> Result<&str> {
    std::str::from_utf8(bytes).map_err(|e| Error::Serialization(e.to_string()))
}

fn u64_key(bytes: &[u8]) -> Result<u64> {
    let arr: [u8; 8] = bytes
        .try_into()
        .map_err(|_| Error::Serialization("malformed u64 snapshot key".into()))?;
    Ok(u64::from_be_bytes(arr))
}

fn u64_value(bytes: &[u8]) -> Result<u64> {
    u64_key(bytes)
}

impl MetaStore {
    /// Serialize the entire store to a byte stream (spec §4.6:
    /// `Snapshot(writer)`), for Raft snapshotting.
    pub fn snapshot(&self) -> Result<Vec<u8>> {
        let txn = self.db.begin_read().map_err(meta_err)?;
        let mut entries = Vec::new();

        for (name, def) in [
            ("buckets", BUCKETS),
            ("objects", OBJECTS),
            ("object_versions", OBJECT_VERSIONS),
            ("iam_users", IAM_USERS),
            ("iam_groups", IAM_GROUPS),
            ("iam_policies", IAM_POLICIES),
            ("access_keys", ACCESS_KEYS),
            ("replication_queue", REPLICATION_QUEUE),
            ("replication_status", REPLICATION_STATUS),
            ("bucket_configs", BUCKET_CONFIGS),
        ] {
            let table = txn.open_table(def).map_err(meta_err)?;
            for row in table.iter().map_err(meta_err)? {
                let (k, v) = row.map_err(meta_err)?;
                entries.push(SnapshotEntry {
                    table: name.to_string(),
                    key: k.value().as_bytes().to_vec(),
                    value: v.value().to_vec(),
                });
            }
        }

        for (name, def) in [("audit", AUDIT), ("change_log", CHANGE_LOG)] {
            let table = txn.open_table(def).map_err(meta_err)?;
            for row in table.iter().map_err(meta_err)? {
                let (k, v) = row.map_err(meta_err)?;
                entries.push(SnapshotEntry {
                    table: name.to_string(),
                    key: k.value().to_be_bytes().to_vec(),
                    value: v.value().to_vec(),
                });
            }
        }

        {
            let table = txn.open_table(SEQUENCES).map_err(meta_err)?;
            for row in table.iter().map_err(meta_err)? {
                let (k, v) = row.map_err(meta_err)?;
                entries.push(SnapshotEntry {
                    table: "sequences".to_string(),
                    key: k.value().as_bytes().to_vec(),
                    value: v.value().to_be_bytes().to_vec(),
                });
            }
        }

        encode(&entries)
    }

    /// Replace the entire store's contents from a byte stream produced by
    /// `snapshot` (spec §4.6: `Restore(reader)`).
    pub fn restore(&self, bytes: &[u8]) -> Result<()> {
        let entries: Vec<SnapshotEntry> = decode(bytes)?;
        let txn = self.db.begin_write().map_err(meta_err)?;

        txn.delete_table(BUCKETS).map_err(meta_err)?;
        txn.delete_table(OBJECTS).map_err(meta_err)?;
        txn.delete_table(OBJECT_VERSIONS).map_err(meta_err)?;
        txn.delete_table(IAM_USERS).map_err(meta_err)?;
        txn.delete_table(IAM_GROUPS).map_err(meta_err)?;
        txn.delete_table(IAM_POLICIES).map_err(meta_err)?;
        txn.delete_table(ACCESS_KEYS).map_err(meta_err)?;
        txn.delete_table(REPLICATION_QUEUE).map_err(meta_err)?;
        txn.delete_table(REPLICATION_STATUS).map_err(meta_err)?;
        txn.delete_table(BUCKET_CONFIGS).map_err(meta_err)?;
        txn.delete_table(AUDIT).map_err(meta_err)?;
        txn.delete_table(CHANGE_LOG).map_err(meta_err)?;
        txn.delete_table(SEQUENCES).map_err(meta_err)?;

        {
            let mut buckets = txn.open_table(BUCKETS).map_err(meta_err)?;
            let mut objects = txn.open_table(OBJECTS).map_err(meta_err)?;
            let mut object_versions = txn.open_table(OBJECT_VERSIONS).map_err(meta_err)?;
            let mut iam_users = txn.open_table(IAM_USERS).map_err(meta_err)?;
            let mut iam_groups = txn.open_table(IAM_GROUPS).map_err(meta_err)?;
            let mut iam_policies = txn.open_table(IAM_POLICIES).map_err(meta_err)?;
            let mut access_keys = txn.open_table(ACCESS_KEYS).map_err(meta_err)?;
            let mut replication_queue = txn.open_table(REPLICATION_QUEUE).map_err(meta_err)?;
            let mut replication_status = txn.open_table(REPLICATION_STATUS).map_err(meta_err)?;
            let mut bucket_configs = txn.open_table(BUCKET_CONFIGS).map_err(meta_err)?;
            let mut audit = txn.open_table(AUDIT).map_err(meta_err)?;
            let mut change_log = txn.open_table(CHANGE_LOG).map_err(meta_err)?;
            let mut sequences = txn.open_table(SEQUENCES).map_err(meta_err)?;

            for entry in entries {
                match entry.table.as_str() {
                    "buckets" => {
                        buckets
                            .insert(str_key(&entry.key)?, entry.value.as_slice())
                            .map_err(meta_err)?;
                    }
                    "objects" => {
                        objects
                            .insert(str_key(&entry.key)?, entry.value.as_slice())
                            .map_err(meta_err)?;
                    }
                    "object_versions" => {
                        object_versions
                            .insert(str_key(&entry.key)?, entry.value.as_slice())
                            .map_err(meta_err)?;
                    }
                    "iam_users" => {
                        iam_users
                            .insert(str_key(&entry.key)?, entry.value.as_slice())
                            .map_err(meta_err)?;
                    }
                    "iam_groups" => {
                        iam_groups
                            .insert(str_key(&entry.key)?, entry.value.as_slice())
                            .map_err(meta_err)?;
                    }
                    "iam_policies" => {
                        iam_policies
                            .insert(str_key(&entry.key)?, entry.value.as_slice())
                            .map_err(meta_err)?;
                    }
                    "access_keys" => {
                        access_keys
                            .insert(str_key(&entry.key)?, entry.value.as_slice())
                            .map_err(meta_err)?;
                    }
                    "replication_queue" => {
                        replication_queue
                            .insert(str_key(&entry.key)?, entry.value.as_slice())
                            .map_err(meta_err)?;
                    }
                    "replication_status" => {
                        replication_status
                            .insert(str_key(&entry.key)?, entry.value.as_slice())
                            .map_err(meta_err)?;
                    }
                    "bucket_configs" => {
                        bucket_configs
                            .insert(str_key(&entry.key)?, entry.value.as_slice())
                            .map_err(meta_err)?;
                    }
                    "audit" => {
                        audit
                            .insert(u64_key(&entry.key)?, entry.value.as_slice())
                            .map_err(meta_err)?;
                    }
                    "change_log" => {
                        change_log
                            .insert(u64_key(&entry.key)?, entry.value.as_slice())
                            .map_err(meta_err)?;
                    }
                    "sequences" => {
                        sequences
                            .insert(str_key(&entry.key)?, u64_value(&entry.value)?)
                            .map_err(meta_err)?;
                    }
                    other => {
                        return Err(Error::internal(format!("unknown snapshot table: {other}")));
                    }
                }
            }
        }

        txn.commit().map_err(meta_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChangeOp, StoredBucket};
    use tempfile::tempdir;
    use vaults3_common::{SiteId, VectorClock, VersioningState};

    fn open_store() -> (tempfile::TempDir, MetaStore) {
        let dir = tempdir().unwrap();
        let store = MetaStore::open(dir.path().join("meta.redb")).unwrap();
        (dir, store)
    }

    #[test]
    fn audit_sequence_numbers_are_monotonic() {
        let (_dir, store) = open_store();
        let seq1 = store
            .record_audit(AuditRecord {
                at: 1,
                actor: "a".into(),
                action: "PutObject".into(),
                bucket: "b".into(),
                key: "k".into(),
                outcome: "ok".into(),
            })
            .unwrap();
        let seq2 = store
            .record_audit(AuditRecord {
                at: 2,
                actor: "a".into(),
                action: "DeleteObject".into(),
                bucket: "b".into(),
                key: "k".into(),
                outcome: "ok".into(),
            })
            .unwrap();
        assert_eq!(seq2, seq1 + 1);

        let records = store.read_audit(0, 0).unwrap();
        assert_eq!(records.len(), 2);
        let records = store.read_audit(seq1, 0).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].action, "DeleteObject");
    }

    #[test]
    fn change_log_trims_entries_before_seq() {
        let (_dir, store) = open_store();
        let site = SiteId::new("A");
        for i in 0..3u64 {
            store
                .append_change_log(ChangeEntry {
                    seq: 0,
                    site_id: site.clone(),
                    bucket: "b".into(),
                    key: format!("k{i}"),
                    op: ChangeOp::Put,
                    size: 10,
                    etag: "\"x\"".into(),
                    vector_clock: VectorClock::new(),
                    at: i as i64,
                })
                .unwrap();
        }
        assert_eq!(store.last_change_log_seq().unwrap(), 3);

        store.trim_change_log(3).unwrap();
        let remaining = store.read_change_log(0, 0).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].seq, 3);
    }

    #[test]
    fn snapshot_restore_roundtrips_store_contents() {
        let (_dir, store) = open_store();
        store
            .create_bucket(&StoredBucket {
                name: "b".into(),
                created_at: 0,
                versioning: VersioningState::Enabled,
                object_lock_enabled: false,
            })
            .unwrap();
        store
            .record_audit(AuditRecord {
                at: 1,
                actor: "a".into(),
                action: "CreateBucket".into(),
                bucket: "b".into(),
                key: String::new(),
                outcome: "ok".into(),
            })
            .unwrap();

        let bytes = store.snapshot().unwrap();

        let (_dir2, fresh) = open_store();
        fresh.restore(&bytes).unwrap();

        assert!(fresh.get_bucket("b").unwrap().is_some());
        assert_eq!(fresh.read_audit(0, 0).unwrap().len(), 1);
    }
}
