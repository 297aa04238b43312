//! Erasure-coding decorator (spec §4.5)
//!
//! Wraps a primary inner engine (`backends[0]`) plus zero or more auxiliary
//! backends used only for shard distribution. Objects smaller than
//! `block_size` delegate straight through to the primary, untouched.
//! Larger objects are split into `k` data shards and `m` parity shards,
//! each written to `.ec/<key>/shard-NN` on `backends[i % backends.len()]`,
//! alongside a `.ec/<key>/meta.json` shard-metadata file on `backends[0]`.

use crate::{GetResult, ListResult, ObjectInfo, PutResult, StorageEngine, compute_etag};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use vaults3_common::{Error, ErasureConfig, Result};
use vaults3_erasure::ErasureCodec;

const EC_PREFIX: &str = ".ec/";

#[derive(Clone, Debug, Serialize, Deserialize)]
struct ShardMeta {
    original_size: u64,
    data_shards: u8,
    parity_shards: u8,
    block_size: u64,
    shard_sizes: Vec<u64>,
    etag: String,
    created_at: i64,
}

fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

fn meta_path(key: &str) -> String {
    format!("{EC_PREFIX}{key}/meta.json")
}

fn shard_path(key: &str, index: usize) -> String {
    format!("{EC_PREFIX}{key}/shard-{index:02}")
}

/// Erasure-coding decorator wrapping a primary engine plus auxiliary shard
/// backends.
pub struct ErasureEngine {
    backends: Vec<Arc<dyn StorageEngine>>,
    config: ErasureConfig,
    block_size: u64,
}

impl ErasureEngine {
    /// `backends[0]` is the primary inner engine; the rest are auxiliary
    /// shard-distribution backends (spec.md's "extra data directories").
    #[must_use]
    pub fn new(backends: Vec<Arc<dyn StorageEngine>>, config: ErasureConfig, block_size: u64) -> Self {
        assert!(!backends.is_empty(), "erasure engine needs at least one backend");
        Self {
            backends,
            config,
            block_size,
        }
    }

    fn backend_for(&self, index: usize) -> &Arc<dyn StorageEngine> {
        &self.backends[index % self.backends.len()]
    }

    fn primary(&self) -> &Arc<dyn StorageEngine> {
        &self.backends[0]
    }

    async fn read_meta(&self, bucket: &str, key: &str) -> Result<Option<ShardMeta>> {
        match self.primary().get_object(bucket, &meta_path(key)).await {
            Ok(result) => {
                let meta: ShardMeta = serde_json::from_slice(&result.data)
                    .map_err(|e| Error::internal(format!("corrupt shard metadata: {e}")))?;
                Ok(Some(meta))
            }
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn read_shards(
        &self,
        bucket: &str,
        key: &str,
        meta: &ShardMeta,
    ) -> Result<Vec<Option<Vec<u8>>>> {
        let total = meta.data_shards as usize + meta.parity_shards as usize;
        let mut shards = Vec::with_capacity(total);
        for i in 0..total {
            let path = shard_path(key, i);
            match self.backend_for(i).get_object(bucket, &path).await {
                Ok(result) => shards.push(Some(result.data.to_vec())),
                Err(e) if e.is_not_found() => shards.push(None),
                Err(e) => return Err(e),
            }
        }
        Ok(shards)
    }

    /// Merge the primary engine's non-EC listing with the logical keys
    /// derived from `.ec/` shard metadata, producing one sorted key/size
    /// list hiding the `.ec/` prefix entirely.
    async fn unified_listing(&self, bucket: &str) -> Result<Vec<(String, u64)>> {
        let raw = self
            .primary()
            .list_objects(bucket, "", "", 0)
            .await?
            .objects;

        let mut ec_keys = BTreeMap::new();
        let mut plain = Vec::new();
        for object in raw {
            if let Some(rest) = object.key.strip_prefix(EC_PREFIX) {
                if let Some(key) = rest.strip_suffix("/meta.json") {
                    ec_keys.insert(key.to_string(), ());
                }
                // shard-NN entries carry no independent logical key
                continue;
            }
            plain.push((object.key, object.size));
        }

        for key in ec_keys.into_keys() {
            if let Some(meta) = self.read_meta(bucket, &key).await? {
                plain.push((key, meta.original_size));
            }
        }

        plain.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(plain)
    }
}

/// Shard-count snapshot for one erasure-coded key (spec §4.12's healer
/// status scan).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ShardHealth {
    pub missing: usize,
    pub total: usize,
    pub parity_shards: usize,
}

impl ShardHealth {
    #[must_use]
    pub const fn is_healthy(&self) -> bool {
        self.missing == 0
    }

    #[must_use]
    pub const fn is_unrecoverable(&self) -> bool {
        self.missing > self.parity_shards
    }
}

impl ErasureEngine {
    /// Every logical key in `bucket` that has been erasure-coded (i.e.
    /// carries a `.ec/<key>/meta.json`), for the healer's scan.
    pub async fn list_ec_keys(&self, bucket: &str) -> Result<Vec<String>> {
        let raw = self.primary().list_objects(bucket, EC_PREFIX, "", 0).await?.objects;
        let mut keys = Vec::new();
        for object in raw {
            if let Some(rest) = object.key.strip_prefix(EC_PREFIX) {
                if let Some(key) = rest.strip_suffix("/meta.json") {
                    keys.push(key.to_string());
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    /// Current shard counts for an erasure-coded key, or `None` if `key`
    /// isn't erasure-coded (e.g. it was small enough to bypass EC, or
    /// doesn't exist).
    pub async fn shard_health(&self, bucket: &str, key: &str) -> Result<Option<ShardHealth>> {
        let Some(meta) = self.read_meta(bucket, key).await? else {
            return Ok(None);
        };
        let shards = self.read_shards(bucket, key, &meta).await?;
        let missing = shards.iter().filter(|s| s.is_none()).count();
        Ok(Some(ShardHealth {
            missing,
            total: shards.len(),
            parity_shards: meta.parity_shards as usize,
        }))
    }

    /// Reconstruct `key`'s plaintext from whatever shards are still
    /// readable and rewrite every shard from scratch. Returns
    /// `Error::InsufficientShards` if more than `parity_shards` are
    /// missing, and does nothing if `key` isn't erasure-coded.
    pub async fn heal(&self, bucket: &str, key: &str) -> Result<()> {
        let Some(meta) = self.read_meta(bucket, key).await? else {
            return Ok(());
        };

        let mut shards = self.read_shards(bucket, key, &meta).await?;
        let missing = shards.iter().filter(|s| s.is_none()).count();
        if missing == 0 {
            return Ok(());
        }
        if missing > meta.parity_shards as usize {
            return Err(Error::InsufficientShards {
                available: shards.len() - missing,
                required: meta.data_shards as usize,
            });
        }

        let codec = ErasureCodec::new(ErasureConfig::new(meta.data_shards, meta.parity_shards))?;
        let plaintext = codec.decode(&mut shards, meta.original_size as usize)?;
        let rebuilt = codec.encode(&plaintext)?;

        for (i, shard) in rebuilt.into_iter().enumerate() {
            let shard_len = shard.len() as u64;
            self.backend_for(i)
                .put_object(bucket, &shard_path(key, i), Bytes::from(shard), shard_len)
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl StorageEngine for ErasureEngine {
    async fn create_bucket_dir(&self, bucket: &str) -> Result<()> {
        for backend in &self.backends {
            backend.create_bucket_dir(bucket).await?;
        }
        Ok(())
    }

    async fn delete_bucket_dir(&self, bucket: &str) -> Result<()> {
        for backend in &self.backends {
            backend.delete_bucket_dir(bucket).await?;
        }
        Ok(())
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        declared_size: u64,
    ) -> Result<PutResult> {
        if (data.len() as u64) < self.block_size {
            return self.primary().put_object(bucket, key, data, declared_size).await;
        }

        let etag = compute_etag(&data);
        let original_size = data.len() as u64;

        let codec = ErasureCodec::new(self.config)?;
        let shards = codec.encode(&data)?;
        let shard_sizes: Vec<u64> = shards.iter().map(|s| s.len() as u64).collect();

        let meta = ShardMeta {
            original_size,
            data_shards: self.config.data_shards,
            parity_shards: self.config.parity_shards,
            block_size: self.block_size,
            shard_sizes,
            etag: etag.clone(),
            created_at: now_unix(),
        };
        let meta_bytes = serde_json::to_vec(&meta)
            .map_err(|e| Error::internal(format!("failed to serialize shard metadata: {e}")))?;
        let meta_len = meta_bytes.len() as u64;
        self.primary()
            .put_object(bucket, &meta_path(key), Bytes::from(meta_bytes), meta_len)
            .await?;

        for (i, shard) in shards.into_iter().enumerate() {
            let shard_len = shard.len() as u64;
            self.backend_for(i)
                .put_object(bucket, &shard_path(key, i), Bytes::from(shard), shard_len)
                .await?;
        }

        Ok(PutResult {
            written: original_size,
            etag,
        })
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<GetResult> {
        let Some(meta) = self.read_meta(bucket, key).await? else {
            return self.primary().get_object(bucket, key).await;
        };

        let m = meta.parity_shards as usize;
        let mut shards = self.read_shards(bucket, key, &meta).await?;
        let missing = shards.iter().filter(|s| s.is_none()).count();
        if missing > m {
            return Err(Error::InsufficientShards {
                available: shards.len() - missing,
                required: meta.data_shards as usize,
            });
        }

        let codec = ErasureCodec::new(ErasureConfig::new(meta.data_shards, meta.parity_shards))?;
        let plaintext = codec.decode(&mut shards, meta.original_size as usize)?;

        Ok(GetResult {
            size: plaintext.len() as u64,
            data: Bytes::from(plaintext),
        })
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        let Some(meta) = self.read_meta(bucket, key).await? else {
            return self.primary().delete_object(bucket, key).await;
        };

        let total = meta.data_shards as usize + meta.parity_shards as usize;
        for i in 0..total {
            self.backend_for(i)
                .delete_object(bucket, &shard_path(key, i))
                .await?;
        }
        self.primary().delete_object(bucket, &meta_path(key)).await
    }

    async fn object_exists(&self, bucket: &str, key: &str) -> Result<bool> {
        if self.read_meta(bucket, key).await?.is_some() {
            return Ok(true);
        }
        self.primary().object_exists(bucket, key).await
    }

    async fn object_size(&self, bucket: &str, key: &str) -> Result<u64> {
        if let Some(meta) = self.read_meta(bucket, key).await? {
            return Ok(meta.original_size);
        }
        self.primary().object_size(bucket, key).await
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        start_after: &str,
        max_keys: usize,
    ) -> Result<ListResult> {
        let all = self.unified_listing(bucket).await?;

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
        let all = self.unified_listing(bucket).await?;
        let bytes: u64 = all.iter().map(|(_, size)| size).sum();
        Ok((bytes, all.len() as u64))
    }
}
