//! VaultS3 Storage - Layered storage engine
//!
//! A single `StorageEngine` abstraction underlies every layer: the
//! filesystem backend at the bottom, and the compression, encryption, and
//! erasure-coding decorators stacked above it. Each decorator wraps a lower
//! engine and transforms bytes transparently, so the chain can be composed
//! in any order the deployment config asks for.

pub mod compression;
pub mod encryption;
pub mod erasure;
pub mod fs;

use async_trait::async_trait;
use bytes::Bytes;
use vaults3_common::Result;

/// Result of a successful `put_object`: the plaintext size actually written
/// and the etag computed over that plaintext.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PutResult {
    pub written: u64,
    pub etag: String,
}

/// Result of a successful `get_object`.
#[derive(Clone, Debug)]
pub struct GetResult {
    pub data: Bytes,
    pub size: u64,
}

impl GetResult {
    /// A seekable in-memory reader over the plaintext.
    #[must_use]
    pub fn reader(&self) -> std::io::Cursor<Bytes> {
        std::io::Cursor::new(self.data.clone())
    }
}

/// A single entry returned by `list_objects`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
}

/// Result of a successful `list_objects`.
#[derive(Clone, Debug, Default)]
pub struct ListResult {
    pub objects: Vec<ObjectInfo>,
    pub truncated: bool,
}

/// Compute the etag for a `put_object` call: the MD5 of plaintext,
/// serialized as a quoted lowercase hex string.
#[must_use]
pub fn compute_etag(data: &[u8]) -> String {
    use md5::{Digest, Md5};
    let digest = Md5::digest(data);
    format!("\"{}\"", hex::encode(digest))
}

fn versioned_key(key: &str, version_id: &str) -> String {
    format!("{key}@{version_id}")
}

/// Core storage engine abstraction (spec §4.1). Implemented by the
/// filesystem backend and by every decorator layered above it.
#[async_trait]
pub trait StorageEngine: Send + Sync {
    async fn create_bucket_dir(&self, bucket: &str) -> Result<()>;

    async fn delete_bucket_dir(&self, bucket: &str) -> Result<()>;

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        declared_size: u64,
    ) -> Result<PutResult>;

    async fn get_object(&self, bucket: &str, key: &str) -> Result<GetResult>;

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()>;

    async fn object_exists(&self, bucket: &str, key: &str) -> Result<bool>;

    async fn object_size(&self, bucket: &str, key: &str) -> Result<u64>;

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        start_after: &str,
        max_keys: usize,
    ) -> Result<ListResult>;

    /// Total bytes and object count under a bucket.
    async fn bucket_size(&self, bucket: &str) -> Result<(u64, u64)>;

    /// Versioned variant of `put_object`: stores the object under a key
    /// namespaced by `version_id`, leaving the unversioned key (the
    /// "latest" pointer, managed by the metadata store) untouched.
    async fn put_object_version(
        &self,
        bucket: &str,
        key: &str,
        version_id: &str,
        data: Bytes,
        declared_size: u64,
    ) -> Result<PutResult> {
        self.put_object(bucket, &versioned_key(key, version_id), data, declared_size)
            .await
    }

    async fn get_object_version(
        &self,
        bucket: &str,
        key: &str,
        version_id: &str,
    ) -> Result<GetResult> {
        self.get_object(bucket, &versioned_key(key, version_id)).await
    }

    async fn delete_object_version(
        &self,
        bucket: &str,
        key: &str,
        version_id: &str,
    ) -> Result<()> {
        self.delete_object(bucket, &versioned_key(key, version_id))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn etag_is_quoted_lowercase_hex_md5() {
        let etag = compute_etag(b"hello world");
        assert_eq!(etag, "\"5eb63bbbe01eeed093cb22bb8f5acdc3\"");
    }

    #[test]
    fn versioned_key_appends_suffix() {
        assert_eq!(versioned_key("foo/bar", "v1"), "foo/bar@v1");
    }
}
