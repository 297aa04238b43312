//! Rebalancer (spec §4.11): a triggerable background scan that moves each
//! object's bytes to whichever node the hash ring currently names as its
//! primary, for use after cluster membership changes. No teacher module
//! covers this directly — `RepairConfig`'s bandwidth/batch knobs
//! (`objectio_common::config`) are the only carried-over piece, reused
//! here as `ClusterConfig::rebalance_bandwidth_mb_s` /
//! `rebalance_batch_size`.

mod throttle;

use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use throttle::TokenBucket;
use tracing::{info, warn};
use vaults3_common::{Error, NodeId, Result};
use vaults3_meta::MetaStore;
use vaults3_placement::ClusterTopology;
use vaults3_storage::StorageEngine;

/// Header stamped on a rebalance push so the receiving node's access log
/// (and, if it matters later, its own rebalancer) can tell this write
/// apart from an ordinary client PUT.
pub const REBALANCE_HEADER: &str = "x-vaults3-rebalance";

#[derive(Clone, Copy, Debug)]
pub struct RebalanceConfig {
    pub batch_size: usize,
    pub bandwidth_mb_s: u64,
}

impl Default for RebalanceConfig {
    fn default() -> Self {
        Self { batch_size: 100, bandwidth_mb_s: 50 }
    }
}

/// Drives a single full-cluster migration scan at a time; a second
/// `trigger()` while one is already running is a no-op rather than a
/// queued second pass.
pub struct Rebalancer {
    self_id: NodeId,
    store: Arc<MetaStore>,
    engine: Arc<dyn StorageEngine>,
    topology: Arc<ClusterTopology>,
    config: RebalanceConfig,
    client: reqwest::Client,
    running: AtomicBool,
    cancel: AtomicBool,
}

impl Rebalancer {
    #[must_use]
    pub fn new(
        store: Arc<MetaStore>,
        engine: Arc<dyn StorageEngine>,
        topology: Arc<ClusterTopology>,
        config: RebalanceConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            self_id: topology.self_id(),
            store,
            engine,
            topology,
            config,
            client: reqwest::Client::new(),
            running: AtomicBool::new(false),
            cancel: AtomicBool::new(false),
        })
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Ask the in-progress scan (if any) to stop at its next object
    /// boundary. Has no effect if no scan is running.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// Start a scan in the background unless one is already running.
    /// Returns whether this call actually started a scan.
    pub fn trigger(self: &Arc<Self>) -> bool {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }
        self.cancel.store(false, Ordering::SeqCst);

        let this = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(err) = this.scan().await {
                warn!(target: "vaults3_rebalancer", error = %err, "rebalance scan aborted");
            }
            this.running.store(false, Ordering::SeqCst);
        });
        true
    }

    async fn scan(&self) -> Result<()> {
        let mut limiter = TokenBucket::new(self.config.bandwidth_mb_s * 1024 * 1024);
        let mut moved = 0u64;

        for bucket in self.store.list_buckets()? {
            let mut start_after = String::new();
            loop {
                if self.cancel.load(Ordering::SeqCst) {
                    info!(target: "vaults3_rebalancer", moved, "rebalance scan cancelled");
                    return Ok(());
                }

                let (objects, truncated) =
                    self.store.list_object_meta(&bucket.name, "", &start_after, self.config.batch_size)?;
                if objects.is_empty() {
                    break;
                }

                for object in &objects {
                    if self.cancel.load(Ordering::SeqCst) {
                        info!(target: "vaults3_rebalancer", moved, "rebalance scan cancelled");
                        return Ok(());
                    }
                    match self.migrate_if_needed(&bucket.name, &object.key, object.size, &mut limiter).await {
                        Ok(true) => moved += 1,
                        Ok(false) => {}
                        Err(err) => warn!(
                            target: "vaults3_rebalancer",
                            bucket = %bucket.name, key = %object.key, error = %err,
                            "failed to migrate object, continuing"
                        ),
                    }
                }

                start_after = objects.last().map(|o| o.key.clone()).unwrap_or_default();
                if !truncated {
                    break;
                }
            }
        }

        info!(target: "vaults3_rebalancer", moved, "rebalance scan complete");
        Ok(())
    }

    /// Moves one object's bytes to its current primary, if that isn't
    /// already this node. Returns whether a migration actually happened.
    async fn migrate_if_needed(
        &self,
        bucket: &str,
        key: &str,
        size: u64,
        limiter: &mut TokenBucket,
    ) -> Result<bool> {
        let Some(primary) = self.topology.primary_for(bucket, key) else {
            return Ok(false);
        };
        if primary == self.self_id {
            return Ok(false);
        }
        let Some(node) = self.topology.get_node(primary) else {
            return Ok(false);
        };

        limiter.acquire(size).await;

        let current = self.engine.get_object(bucket, key).await?;
        self.push(&node.addr, bucket, key, current.data).await?;
        self.engine.delete_object(bucket, key).await?;
        self.store.delete_object_meta(bucket, key)?;
        Ok(true)
    }

    async fn push(&self, addr: &str, bucket: &str, key: &str, body: Bytes) -> Result<()> {
        let url = format!("http://{addr}/objects/{bucket}/{key}");
        let response = self
            .client
            .put(url)
            .header(REBALANCE_HEADER, self.self_id.to_string())
            .body(body)
            .send()
            .await
            .map_err(|err| Error::Transient(err.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::Transient(format!(
                "rebalance push to {addr} rejected with status {}",
                response.status()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use vaults3_common::VectorClock;
    use vaults3_meta::types::StoredBucket;
    use vaults3_meta::types::StoredObject;
    use vaults3_placement::{NodeInfo, PlacementConfig};
    use vaults3_storage::{GetResult, ListResult, PutResult};

    /// In-memory engine just good enough to exercise migration bookkeeping.
    struct MemEngine {
        objects: Mutex<HashMap<(String, String), Bytes>>,
    }

    impl MemEngine {
        fn new() -> Self {
            Self { objects: Mutex::new(HashMap::new()) }
        }

        fn insert(&self, bucket: &str, key: &str, data: &[u8]) {
            self.objects.lock().insert((bucket.to_string(), key.to_string()), Bytes::copy_from_slice(data));
        }

        fn contains(&self, bucket: &str, key: &str) -> bool {
            self.objects.lock().contains_key(&(bucket.to_string(), key.to_string()))
        }
    }

    #[async_trait]
    impl StorageEngine for MemEngine {
        async fn create_bucket_dir(&self, _bucket: &str) -> Result<()> {
            Ok(())
        }

        async fn delete_bucket_dir(&self, _bucket: &str) -> Result<()> {
            Ok(())
        }

        async fn put_object(&self, bucket: &str, key: &str, data: Bytes, _declared_size: u64) -> Result<PutResult> {
            let written = data.len() as u64;
            self.objects.lock().insert((bucket.to_string(), key.to_string()), data);
            Ok(PutResult { written, etag: "\"x\"".into() })
        }

        async fn get_object(&self, bucket: &str, key: &str) -> Result<GetResult> {
            let data = self
                .objects
                .lock()
                .get(&(bucket.to_string(), key.to_string()))
                .cloned()
                .ok_or_else(|| Error::ObjectNotFound { bucket: bucket.into(), key: key.into() })?;
            let size = data.len() as u64;
            Ok(GetResult { data, size })
        }

        async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
            self.objects.lock().remove(&(bucket.to_string(), key.to_string()));
            Ok(())
        }

        async fn object_exists(&self, bucket: &str, key: &str) -> Result<bool> {
            Ok(self.contains(bucket, key))
        }

        async fn object_size(&self, bucket: &str, key: &str) -> Result<u64> {
            Ok(self.get_object(bucket, key).await?.size)
        }

        async fn list_objects(&self, _bucket: &str, _prefix: &str, _start_after: &str, _max_keys: usize) -> Result<ListResult> {
            Ok(ListResult::default())
        }

        async fn bucket_size(&self, _bucket: &str) -> Result<(u64, u64)> {
            Ok((0, 0))
        }
    }

    fn stored_object(bucket: &str, key: &str, size: u64) -> StoredObject {
        StoredObject {
            bucket: bucket.into(),
            key: key.into(),
            version_id: None,
            size,
            etag: "\"x\"".into(),
            content_type: "application/octet-stream".into(),
            last_modified: 0,
            vector_clock: VectorClock::new(),
            delete_marker: false,
        }
    }

    fn open_store() -> (tempfile::TempDir, Arc<MetaStore>) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MetaStore::open(dir.path().join("meta.redb")).unwrap());
        (dir, store)
    }

    #[tokio::test]
    async fn an_object_whose_primary_is_self_is_left_alone() {
        let (_dir, store) = open_store();
        store.create_bucket(&StoredBucket { name: "b".into(), created_at: 0, versioning: Default::default(), object_lock_enabled: false }).unwrap();
        store.put_object_meta(&stored_object("b", "k", 5)).unwrap();

        let engine: Arc<dyn StorageEngine> = Arc::new(MemEngine::new());
        engine.put_object("b", "k", Bytes::from_static(b"hello"), 5).await.unwrap();

        let self_id = NodeId::new();
        let topology = Arc::new(ClusterTopology::new(self_id, PlacementConfig::default()));
        topology.upsert_node(NodeInfo { id: self_id, addr: "self:9000".into() });

        let rebalancer = Rebalancer::new(store, engine.clone(), topology, RebalanceConfig::default());
        rebalancer.scan().await.unwrap();

        assert!(engine.object_exists("b", "k").await.unwrap());
    }

    #[test]
    fn trigger_refuses_to_start_a_second_concurrent_scan() {
        let (_dir, store) = open_store();
        let engine: Arc<dyn StorageEngine> = Arc::new(MemEngine::new());
        let topology = Arc::new(ClusterTopology::new(NodeId::new(), PlacementConfig::default()));
        let rebalancer = Rebalancer::new(store, engine, topology, RebalanceConfig::default());

        rebalancer.running.store(true, Ordering::SeqCst);
        assert!(!rebalancer.trigger());
    }
}
