//! Gzip compression decorator (spec §4.3)
//!
//! Objects whose key extension is already-compressed media are passed
//! through unchanged. Everything else is read fully into memory (bounded),
//! gzipped, and handed to the inner engine; `get_object` reverses this.
//! The plaintext size and etag reported to the caller always describe the
//! uncompressed bytes, independent of what's actually stored below.

use crate::{GetResult, ListResult, PutResult, StorageEngine, compute_etag};
use async_trait::async_trait;
use bytes::Bytes;
use flate2::Compression;
use flate2::read::{GzDecoder, GzEncoder};
use std::io::Read;
use std::sync::Arc;
use vaults3_common::{Error, Result};

/// Objects with these extensions are already compressed; gzipping them
/// again would waste CPU for no space savings.
const DENY_LIST: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "webp", "avif", "heic", // images
    "mp3", "aac", "flac", "ogg", "opus", // audio
    "mp4", "mkv", "webm", "mov", "avi", // video
    "zip", "gz", "bz2", "xz", "zst", "7z", "rar", // archives
    "woff", "woff2", // webfonts
];

/// Upper bound on how much plaintext this decorator will buffer in memory
/// for a single object.
const MAX_INLINE_SIZE: u64 = 1024 * 1024 * 1024;

fn is_deny_listed(key: &str) -> bool {
    key.rsplit('.')
        .next()
        .map(|ext| DENY_LIST.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Gzip compression decorator wrapping a lower `StorageEngine`.
pub struct CompressionEngine {
    inner: Arc<dyn StorageEngine>,
}

impl CompressionEngine {
    #[must_use]
    pub fn new(inner: Arc<dyn StorageEngine>) -> Self {
        Self { inner }
    }
}

fn gzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(data, Compression::default());
    let mut out = Vec::new();
    encoder
        .read_to_end(&mut out)
        .map_err(|e| Error::internal(format!("gzip encode failed: {e}")))?;
    Ok(out)
}

fn gunzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| Error::internal(format!("gzip decode failed: {e}")))?;
    Ok(out)
}

#[async_trait]
impl StorageEngine for CompressionEngine {
    async fn create_bucket_dir(&self, bucket: &str) -> Result<()> {
        self.inner.create_bucket_dir(bucket).await
    }

    async fn delete_bucket_dir(&self, bucket: &str) -> Result<()> {
        self.inner.delete_bucket_dir(bucket).await
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        declared_size: u64,
    ) -> Result<PutResult> {
        if declared_size > MAX_INLINE_SIZE {
            return Err(Error::invalid_argument("object exceeds 1 GiB inline limit"));
        }

        if is_deny_listed(key) {
            return self.inner.put_object(bucket, key, data, declared_size).await;
        }

        let etag = compute_etag(&data);
        let written = data.len() as u64;
        let compressed = gzip(&data)?;

        self.inner
            .put_object(bucket, key, Bytes::from(compressed), declared_size)
            .await?;

        Ok(PutResult { written, etag })
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<GetResult> {
        if is_deny_listed(key) {
            return self.inner.get_object(bucket, key).await;
        }

        let stored = self.inner.get_object(bucket, key).await?;
        if stored.size > MAX_INLINE_SIZE {
            return Err(Error::invalid_argument("object exceeds 1 GiB inline limit"));
        }

        let plaintext = gunzip(&stored.data)?;
        let size = plaintext.len() as u64;
        Ok(GetResult {
            data: Bytes::from(plaintext),
            size,
        })
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        self.inner.delete_object(bucket, key).await
    }

    async fn object_exists(&self, bucket: &str, key: &str) -> Result<bool> {
        self.inner.object_exists(bucket, key).await
    }

    async fn object_size(&self, bucket: &str, key: &str) -> Result<u64> {
        // Compressed size on disk differs from plaintext size; callers that
        // need the authoritative plaintext size should track it in the
        // metadata store rather than asking the storage engine.
        self.inner.object_size(bucket, key).await
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        start_after: &str,
        max_keys: usize,
    ) -> Result<ListResult> {
        self.inner
            .list_objects(bucket, prefix, start_after, max_keys)
            .await
    }

    async fn bucket_size(&self, bucket: &str) -> Result<(u64, u64)> {
        self.inner.bucket_size(bucket).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::FsEngine;
    use tempfile::tempdir;

    #[tokio::test]
    async fn roundtrip_compresses_and_reports_plaintext_size() {
        let dir = tempdir().unwrap();
        let fs = Arc::new(FsEngine::new(dir.path()));
        fs.create_bucket_dir("b").await.unwrap();
        let engine = CompressionEngine::new(fs);

        let plaintext = Bytes::from(vec![b'x'; 4096]);
        let put = engine
            .put_object("b", "file.txt", plaintext.clone(), plaintext.len() as u64)
            .await
            .unwrap();
        assert_eq!(put.written, plaintext.len() as u64);
        assert_eq!(put.etag, compute_etag(&plaintext));

        let got = engine.get_object("b", "file.txt").await.unwrap();
        assert_eq!(got.data, plaintext);
    }

    #[tokio::test]
    async fn deny_listed_extension_passes_through_uncompressed() {
        let dir = tempdir().unwrap();
        let fs = Arc::new(FsEngine::new(dir.path()));
        fs.create_bucket_dir("b").await.unwrap();
        let engine = CompressionEngine::new(fs.clone());

        let data = Bytes::from_static(b"already-compressed-bytes");
        engine
            .put_object("b", "photo.jpg", data.clone(), data.len() as u64)
            .await
            .unwrap();

        // Stored bytes are identical to plaintext, i.e. never gzipped.
        let raw = fs.get_object("b", "photo.jpg").await.unwrap();
        assert_eq!(raw.data, data);
    }
}
