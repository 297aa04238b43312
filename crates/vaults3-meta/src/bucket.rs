//! Bucket metadata operations (spec §4.6), plus the opaque per-bucket
//! config blobs (lifecycle, CORS, website, notification, lambda,
//! encryption) keyed by `(bucket, kind)` and left uninterpreted here.

use crate::store::{MetaStore, decode, encode, meta_err};
use crate::tables::{BUCKET_CONFIGS, BUCKETS};
use crate::types::StoredBucket;
use redb::ReadableTable;
use vaults3_common::{Error, Result};

fn config_key(bucket: &str, kind: &str) -> String {
    format!("{bucket}\0{kind}")
}

impl MetaStore {
    /// Create a bucket if absent (spec §4.6, §8). A name already in the
    /// table is `BucketAlreadyExists` — this is a distinct client proposal
    /// for a name that was already created, not a replay of the same Raft
    /// log entry (whole-store snapshot restore bypasses this method
    /// entirely), so it is not safe to treat as a no-op.
    pub fn create_bucket(&self, bucket: &StoredBucket) -> Result<()> {
        let txn = self.db.begin_write().map_err(meta_err)?;
        {
            let mut table = txn.open_table(BUCKETS).map_err(meta_err)?;
            if table.get(bucket.name.as_str()).map_err(meta_err)?.is_some() {
                return Err(Error::BucketAlreadyExists(bucket.name.clone()));
            }
            table
                .insert(bucket.name.as_str(), encode(bucket)?.as_slice())
                .map_err(meta_err)?;
        }
        txn.commit().map_err(meta_err)?;
        Ok(())
    }

    pub fn get_bucket(&self, name: &str) -> Result<Option<StoredBucket>> {
        let txn = self.db.begin_read().map_err(meta_err)?;
        let table = txn.open_table(BUCKETS).map_err(meta_err)?;
        table
            .get(name)
            .map_err(meta_err)?
            .map(|g| decode(g.value()))
            .transpose()
    }

    pub fn delete_bucket(&self, name: &str) -> Result<()> {
        let txn = self.db.begin_write().map_err(meta_err)?;
        {
            let mut table = txn.open_table(BUCKETS).map_err(meta_err)?;
            table.remove(name).map_err(meta_err)?;
        }
        txn.commit().map_err(meta_err)?;
        Ok(())
    }

    pub fn list_buckets(&self) -> Result<Vec<StoredBucket>> {
        let txn = self.db.begin_read().map_err(meta_err)?;
        let table = txn.open_table(BUCKETS).map_err(meta_err)?;
        let mut out = Vec::new();
        for row in table.iter().map_err(meta_err)? {
            let (_, v) = row.map_err(meta_err)?;
            out.push(decode::<StoredBucket>(v.value())?);
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    pub fn set_bucket_config(&self, bucket: &str, kind: &str, body: &[u8]) -> Result<()> {
        let key = config_key(bucket, kind);
        let txn = self.db.begin_write().map_err(meta_err)?;
        {
            let mut table = txn.open_table(BUCKET_CONFIGS).map_err(meta_err)?;
            table.insert(key.as_str(), body).map_err(meta_err)?;
        }
        txn.commit().map_err(meta_err)?;
        Ok(())
    }

    pub fn get_bucket_config(&self, bucket: &str, kind: &str) -> Result<Option<Vec<u8>>> {
        let key = config_key(bucket, kind);
        let txn = self.db.begin_read().map_err(meta_err)?;
        let table = txn.open_table(BUCKET_CONFIGS).map_err(meta_err)?;
        Ok(table
            .get(key.as_str())
            .map_err(meta_err)?
            .map(|g| g.value().to_vec()))
    }

    pub fn delete_bucket_config(&self, bucket: &str, kind: &str) -> Result<()> {
        let key = config_key(bucket, kind);
        let txn = self.db.begin_write().map_err(meta_err)?;
        {
            let mut table = txn.open_table(BUCKET_CONFIGS).map_err(meta_err)?;
            table.remove(key.as_str()).map_err(meta_err)?;
        }
        txn.commit().map_err(meta_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use vaults3_common::VersioningState;

    fn open_store() -> (tempfile::TempDir, MetaStore) {
        let dir = tempdir().unwrap();
        let store = MetaStore::open(dir.path().join("meta.redb")).unwrap();
        (dir, store)
    }

    fn bucket(name: &str) -> StoredBucket {
        StoredBucket {
            name: name.to_string(),
            created_at: 0,
            versioning: VersioningState::Disabled,
            object_lock_enabled: false,
        }
    }

    #[test]
    fn create_bucket_twice_is_already_exists() {
        let (_dir, store) = open_store();
        store.create_bucket(&bucket("b")).unwrap();
        let err = store.create_bucket(&bucket("b")).unwrap_err();
        assert!(matches!(err, Error::BucketAlreadyExists(name) if name == "b"));
        assert_eq!(store.list_buckets().unwrap().len(), 1);
    }

    #[test]
    fn delete_then_get_returns_none() {
        let (_dir, store) = open_store();
        store.create_bucket(&bucket("b")).unwrap();
        store.delete_bucket("b").unwrap();
        assert!(store.get_bucket("b").unwrap().is_none());
    }

    #[test]
    fn bucket_configs_are_opaque_blobs_scoped_by_kind() {
        let (_dir, store) = open_store();
        store.set_bucket_config("b", "lifecycle", b"<Rule/>").unwrap();
        store.set_bucket_config("b", "cors", b"<CORS/>").unwrap();

        assert_eq!(
            store.get_bucket_config("b", "lifecycle").unwrap().unwrap(),
            b"<Rule/>"
        );
        assert_eq!(
            store.get_bucket_config("b", "cors").unwrap().unwrap(),
            b"<CORS/>"
        );

        store.delete_bucket_config("b", "lifecycle").unwrap();
        assert!(store.get_bucket_config("b", "lifecycle").unwrap().is_none());
        assert!(store.get_bucket_config("b", "cors").unwrap().is_some());
    }
}
