//! Object metadata operations (spec §4.6): current object state plus
//! historical versions, each living in their own redb table.

use crate::store::{MetaStore, decode, encode, meta_err};
use crate::tables::{OBJECT_VERSIONS, OBJECTS};
use crate::types::{StoredObject, StoredObjectVersion};
use redb::ReadableTable;
use vaults3_common::Result;

fn object_key(bucket: &str, key: &str) -> String {
    format!("{bucket}/{key}")
}

fn version_key(bucket: &str, key: &str, version_id: &str) -> String {
    format!("{bucket}/{key}@{version_id}")
}

impl MetaStore {
    pub fn put_object_meta(&self, object: &StoredObject) -> Result<()> {
        let txn = self.db.begin_write().map_err(meta_err)?;
        {
            let mut table = txn.open_table(OBJECTS).map_err(meta_err)?;
            let full_key = object_key(&object.bucket, &object.key);
            table
                .insert(full_key.as_str(), encode(object)?.as_slice())
                .map_err(meta_err)?;
        }
        txn.commit().map_err(meta_err)?;
        Ok(())
    }

    pub fn get_object_meta(&self, bucket: &str, key: &str) -> Result<Option<StoredObject>> {
        let txn = self.db.begin_read().map_err(meta_err)?;
        let table = txn.open_table(OBJECTS).map_err(meta_err)?;
        table
            .get(object_key(bucket, key).as_str())
            .map_err(meta_err)?
            .map(|g| decode(g.value()))
            .transpose()
    }

    pub fn delete_object_meta(&self, bucket: &str, key: &str) -> Result<()> {
        let txn = self.db.begin_write().map_err(meta_err)?;
        {
            let mut table = txn.open_table(OBJECTS).map_err(meta_err)?;
            table.remove(object_key(bucket, key).as_str()).map_err(meta_err)?;
        }
        txn.commit().map_err(meta_err)?;
        Ok(())
    }

    /// List current objects in `bucket` under `prefix`, ordered by key,
    /// skipping keys `<= start_after`. `max_keys == 0` means unbounded.
    /// Returns `(objects, truncated)`.
    pub fn list_object_meta(
        &self,
        bucket: &str,
        prefix: &str,
        start_after: &str,
        max_keys: usize,
    ) -> Result<(Vec<StoredObject>, bool)> {
        let txn = self.db.begin_read().map_err(meta_err)?;
        let table = txn.open_table(OBJECTS).map_err(meta_err)?;
        let bucket_prefix = format!("{bucket}/");

        let mut all = Vec::new();
        for row in table.iter().map_err(meta_err)? {
            let (k, v) = row.map_err(meta_err)?;
            let full_key = k.value();
            let Some(rel_key) = full_key.strip_prefix(&bucket_prefix) else {
                continue;
            };
            if !rel_key.starts_with(prefix) {
                continue;
            }
            if !start_after.is_empty() && rel_key <= start_after {
                continue;
            }
            all.push(decode::<StoredObject>(v.value())?);
        }

        all.sort_by(|a, b| a.key.cmp(&b.key));
        let truncated = max_keys > 0 && all.len() > max_keys;
        if truncated {
            all.truncate(max_keys);
        }
        Ok((all, truncated))
    }

    pub fn put_object_version(&self, version: &StoredObjectVersion) -> Result<()> {
        let txn = self.db.begin_write().map_err(meta_err)?;
        {
            let mut table = txn.open_table(OBJECT_VERSIONS).map_err(meta_err)?;
            let key = version_key(&version.bucket, &version.key, &version.version_id);
            table.insert(key.as_str(), encode(version)?.as_slice()).map_err(meta_err)?;
        }
        txn.commit().map_err(meta_err)?;
        Ok(())
    }

    pub fn get_object_version(
        &self,
        bucket: &str,
        key: &str,
        version_id: &str,
    ) -> Result<Option<StoredObjectVersion>> {
        let txn = self.db.begin_read().map_err(meta_err)?;
        let table = txn.open_table(OBJECT_VERSIONS).map_err(meta_err)?;
        table
            .get(version_key(bucket, key, version_id).as_str())
            .map_err(meta_err)?
            .map(|g| decode(g.value()))
            .transpose()
    }

    pub fn delete_object_version(&self, bucket: &str, key: &str, version_id: &str) -> Result<()> {
        let txn = self.db.begin_write().map_err(meta_err)?;
        {
            let mut table = txn.open_table(OBJECT_VERSIONS).map_err(meta_err)?;
            table
                .remove(version_key(bucket, key, version_id).as_str())
                .map_err(meta_err)?;
        }
        txn.commit().map_err(meta_err)?;
        Ok(())
    }

    /// All versions of `(bucket, key)`, most recently modified first.
    pub fn list_object_versions(&self, bucket: &str, key: &str) -> Result<Vec<StoredObjectVersion>> {
        let txn = self.db.begin_read().map_err(meta_err)?;
        let table = txn.open_table(OBJECT_VERSIONS).map_err(meta_err)?;
        let version_prefix = format!("{bucket}/{key}@");

        let mut out = Vec::new();
        for row in table.iter().map_err(meta_err)? {
            let (k, v) = row.map_err(meta_err)?;
            if k.value().starts_with(&version_prefix) {
                out.push(decode::<StoredObjectVersion>(v.value())?);
            }
        }
        out.sort_by(|a, b| b.last_modified.cmp(&a.last_modified));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use vaults3_common::VectorClock;

    fn open_store() -> (tempfile::TempDir, MetaStore) {
        let dir = tempdir().unwrap();
        let store = MetaStore::open(dir.path().join("meta.redb")).unwrap();
        (dir, store)
    }

    fn object(bucket: &str, key: &str) -> StoredObject {
        StoredObject {
            bucket: bucket.to_string(),
            key: key.to_string(),
            version_id: None,
            size: 10,
            etag: "\"abc\"".into(),
            content_type: "text/plain".into(),
            last_modified: 0,
            vector_clock: VectorClock::new(),
            delete_marker: false,
        }
    }

    #[test]
    fn put_get_delete_roundtrip() {
        let (_dir, store) = open_store();
        store.put_object_meta(&object("b", "a/b.txt")).unwrap();
        assert!(store.get_object_meta("b", "a/b.txt").unwrap().is_some());
        store.delete_object_meta("b", "a/b.txt").unwrap();
        assert!(store.get_object_meta("b", "a/b.txt").unwrap().is_none());
    }

    #[test]
    fn list_respects_prefix_start_after_and_max_keys() {
        let (_dir, store) = open_store();
        for key in ["a/1", "a/2", "a/3", "z/1"] {
            store.put_object_meta(&object("b", key)).unwrap();
        }
        // Cross-bucket isolation: same keys in another bucket must not leak in.
        store.put_object_meta(&object("other", "a/1")).unwrap();

        let (objects, truncated) = store.list_object_meta("b", "a/", "a/1", 0).unwrap();
        assert_eq!(
            objects.iter().map(|o| o.key.as_str()).collect::<Vec<_>>(),
            vec!["a/2", "a/3"]
        );
        assert!(!truncated);

        let (objects, truncated) = store.list_object_meta("b", "", "", 2).unwrap();
        assert_eq!(objects.len(), 2);
        assert!(truncated);
    }

    #[test]
    fn versions_are_listed_newest_first() {
        let (_dir, store) = open_store();
        for (version_id, last_modified) in [("v1", 1), ("v2", 2), ("v3", 3)] {
            store
                .put_object_version(&StoredObjectVersion {
                    bucket: "b".into(),
                    key: "k".into(),
                    version_id: version_id.into(),
                    size: 1,
                    etag: "\"x\"".into(),
                    content_type: "application/octet-stream".into(),
                    last_modified,
                    delete_marker: false,
                })
                .unwrap();
        }

        let versions = store.list_object_versions("b", "k").unwrap();
        assert_eq!(
            versions.iter().map(|v| v.version_id.as_str()).collect::<Vec<_>>(),
            vec!["v3", "v2", "v1"]
        );

        store.delete_object_version("b", "k", "v2").unwrap();
        assert_eq!(store.list_object_versions("b", "k").unwrap().len(), 2);
    }
}
