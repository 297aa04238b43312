//! Filesystem storage backend (spec §4.2)
//!
//! Objects live at `<data_dir>/<bucket>/<key>`, with parent directories
//! created on demand. `put_object` writes to a temp path and renames on
//! success so a crash mid-write never leaves a partial object visible;
//! `delete_object` removes now-empty parent directories up to the bucket
//! root.

use crate::{GetResult, ListResult, ObjectInfo, PutResult, StorageEngine, compute_etag};
use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use vaults3_common::{Error, Result};

/// Filesystem-backed `StorageEngine`.
pub struct FsEngine {
    data_dir: PathBuf,
}

impl FsEngine {
    #[must_use]
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    fn bucket_path(&self, bucket: &str) -> PathBuf {
        self.data_dir.join(bucket)
    }

    fn object_path(&self, bucket: &str, key: &str) -> PathBuf {
        let mut path = self.bucket_path(bucket);
        for segment in key.split('/') {
            path.push(segment);
        }
        path
    }

    /// Remove `dir` and walk upward removing newly-empty parents, stopping
    /// at (and never removing) the bucket root.
    async fn prune_empty_parents(&self, bucket: &str, mut dir: PathBuf) -> Result<()> {
        let bucket_root = self.bucket_path(bucket);
        while dir != bucket_root && dir.starts_with(&bucket_root) {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(_) => break,
            };
            if entries.next_entry().await.ok().flatten().is_some() {
                break;
            }
            if tokio::fs::remove_dir(&dir).await.is_err() {
                break;
            }
            match dir.parent() {
                Some(parent) => dir = parent.to_path_buf(),
                None => break,
            }
        }
        Ok(())
    }

    async fn walk(&self, dir: &Path, out: &mut Vec<(String, u64)>, rel_prefix: &str) -> Result<()> {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let rel_key = if rel_prefix.is_empty() {
                name
            } else {
                format!("{rel_prefix}/{name}")
            };

            if file_type.is_dir() {
                Box::pin(self.walk(&entry.path(), out, &rel_key)).await?;
            } else if file_type.is_file() {
                let size = entry.metadata().await?.len();
                out.push((rel_key, size));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl StorageEngine for FsEngine {
    async fn create_bucket_dir(&self, bucket: &str) -> Result<()> {
        tokio::fs::create_dir_all(self.bucket_path(bucket)).await?;
        Ok(())
    }

    async fn delete_bucket_dir(&self, bucket: &str) -> Result<()> {
        match tokio::fs::remove_dir_all(self.bucket_path(bucket)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        _declared_size: u64,
    ) -> Result<PutResult> {
        let final_path = self.object_path(bucket, key);
        if let Some(parent) = final_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp_path = final_path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4()));

        let write_result = tokio::fs::write(&tmp_path, &data).await;
        if let Err(e) = write_result {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(e.into());
        }

        if let Err(e) = tokio::fs::rename(&tmp_path, &final_path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(e.into());
        }

        Ok(PutResult {
            written: data.len() as u64,
            etag: compute_etag(&data),
        })
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<GetResult> {
        let path = self.object_path(bucket, key);
        let metadata = match tokio::fs::metadata(&path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::ObjectNotFound {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        };
        if metadata.is_dir() {
            return Err(Error::ObjectNotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            });
        }

        let data = tokio::fs::read(&path).await?;
        let size = data.len() as u64;
        Ok(GetResult {
            data: Bytes::from(data),
            size,
        })
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        let path = self.object_path(bucket, key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        if let Some(parent) = path.parent() {
            self.prune_empty_parents(bucket, parent.to_path_buf())
                .await?;
        }
        Ok(())
    }

    async fn object_exists(&self, bucket: &str, key: &str) -> Result<bool> {
        let path = self.object_path(bucket, key);
        match tokio::fs::metadata(&path).await {
            Ok(metadata) => Ok(metadata.is_file()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn object_size(&self, bucket: &str, key: &str) -> Result<u64> {
        let path = self.object_path(bucket, key);
        let metadata = tokio::fs::metadata(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::ObjectNotFound {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                }
            } else {
                e.into()
            }
        })?;
        Ok(metadata.len())
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        start_after: &str,
        max_keys: usize,
    ) -> Result<ListResult> {
        let mut all = Vec::new();
        self.walk(&self.bucket_path(bucket), &mut all, "").await?;
        all.sort_by(|a, b| a.0.cmp(&b.0));

        let mut objects = Vec::new();
        let mut truncated = false;
        for (key, size) in all {
            if !key.starts_with(prefix) {
                continue;
            }
            if !start_after.is_empty() && key.as_str() <= start_after {
                continue;
            }
            if max_keys > 0 && objects.len() >= max_keys {
                truncated = true;
                break;
            }
            objects.push(ObjectInfo { key, size });
        }

        Ok(ListResult { objects, truncated })
    }

    async fn bucket_size(&self, bucket: &str) -> Result<(u64, u64)> {
        let mut all = Vec::new();
        self.walk(&self.bucket_path(bucket), &mut all, "").await?;
        let bytes: u64 = all.iter().map(|(_, size)| size).sum();
        Ok((bytes, all.len() as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn put_get_roundtrip() {
        let dir = tempdir().unwrap();
        let engine = FsEngine::new(dir.path());
        engine.create_bucket_dir("b").await.unwrap();

        let data = Bytes::from_static(b"hello");
        let put = engine
            .put_object("b", "a/b/c.txt", data.clone(), data.len() as u64)
            .await
            .unwrap();
        assert_eq!(put.written, 5);

        let got = engine.get_object("b", "a/b/c.txt").await.unwrap();
        assert_eq!(got.data, data);
    }

    #[tokio::test]
    async fn get_missing_is_not_found() {
        let dir = tempdir().unwrap();
        let engine = FsEngine::new(dir.path());
        engine.create_bucket_dir("b").await.unwrap();

        let err = engine.get_object("b", "missing").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn delete_prunes_empty_parent_dirs() {
        let dir = tempdir().unwrap();
        let engine = FsEngine::new(dir.path());
        engine.create_bucket_dir("b").await.unwrap();

        let data = Bytes::from_static(b"x");
        engine
            .put_object("b", "a/b/c.txt", data.clone(), 1)
            .await
            .unwrap();
        engine.delete_object("b", "a/b/c.txt").await.unwrap();

        assert!(!dir.path().join("b/a/b").exists());
        assert!(!dir.path().join("b/a").exists());
        assert!(dir.path().join("b").exists());
    }

    #[tokio::test]
    async fn list_objects_sorted_prefix_start_after_max_keys() {
        let dir = tempdir().unwrap();
        let engine = FsEngine::new(dir.path());
        engine.create_bucket_dir("b").await.unwrap();

        for key in ["a/1", "a/2", "a/3", "z/1"] {
            engine
                .put_object("b", key, Bytes::from_static(b"x"), 1)
                .await
                .unwrap();
        }

        let result = engine.list_objects("b", "a/", "a/1", 0).await.unwrap();
        assert_eq!(
            result.objects.iter().map(|o| o.key.clone()).collect::<Vec<_>>(),
            vec!["a/2", "a/3"]
        );
        assert!(!result.truncated);

        let result = engine.list_objects("b", "", "", 2).await.unwrap();
        assert_eq!(result.objects.len(), 2);
        assert!(result.truncated);
    }
}
