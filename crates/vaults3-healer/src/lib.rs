//! Erasure shard healer (spec §4.12): an hourly scan over every
//! erasure-coded key that reconstructs and rewrites any shards missing
//! since the last pass, skipping keys too damaged to recover. Built on
//! `vaults3_storage::erasure::ErasureEngine`'s own `.ec/` bookkeeping
//! (`list_ec_keys`/`shard_health`/`heal`) rather than duplicating the
//! shard layout here.

use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use vaults3_common::Result;
use vaults3_meta::MetaStore;
use vaults3_storage::erasure::ErasureEngine;

#[derive(Clone, Copy, Debug)]
pub struct HealerConfig {
    pub interval: Duration,
}

impl Default for HealerConfig {
    fn default() -> Self {
        Self { interval: Duration::from_secs(3600) }
    }
}

/// Outcome of one reconstruction pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HealSummary {
    pub total: usize,
    pub healed: usize,
    pub unrecoverable: usize,
    pub failed: usize,
}

/// Outcome of a read-only status scan.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HealthReport {
    pub total: usize,
    pub healthy: usize,
    pub degraded: usize,
}

pub struct Healer {
    store: Arc<MetaStore>,
    engine: Arc<ErasureEngine>,
    config: HealerConfig,
}

impl Healer {
    #[must_use]
    pub fn new(store: Arc<MetaStore>, engine: Arc<ErasureEngine>, config: HealerConfig) -> Arc<Self> {
        Arc::new(Self { store, engine, config })
    }

    /// Run `heal_once` on `config.interval` until the runtime shuts the
    /// task down.
    pub async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.interval);
        loop {
            ticker.tick().await;
            match self.heal_once().await {
                Ok(summary) => info!(target: "vaults3_healer", ?summary, "heal pass complete"),
                Err(err) => error!(target: "vaults3_healer", error = %err, "heal pass aborted"),
            }
        }
    }

    /// One pass over every erasure-coded key in every bucket: skip
    /// already-healthy keys, log and skip keys too damaged to
    /// reconstruct, and reconstruct everything else.
    pub async fn heal_once(&self) -> Result<HealSummary> {
        let mut summary = HealSummary::default();

        for bucket in self.store.list_buckets()? {
            for key in self.engine.list_ec_keys(&bucket.name).await? {
                let Some(health) = self.engine.shard_health(&bucket.name, &key).await? else {
                    continue;
                };
                summary.total += 1;

                if health.is_healthy() {
                    continue;
                }
                if health.is_unrecoverable() {
                    error!(
                        target: "vaults3_healer",
                        bucket = %bucket.name, key = %key, missing = health.missing, total = health.total,
                        "shard group unrecoverable, skipping"
                    );
                    summary.unrecoverable += 1;
                    continue;
                }

                match self.engine.heal(&bucket.name, &key).await {
                    Ok(()) => summary.healed += 1,
                    Err(err) => {
                        warn!(
                            target: "vaults3_healer",
                            bucket = %bucket.name, key = %key, error = %err,
                            "heal failed, continuing"
                        );
                        summary.failed += 1;
                    }
                }
            }
        }

        Ok(summary)
    }

    /// Read-only pass over every erasure-coded key, without touching
    /// anything — used to answer "what's the cluster's EC health right
    /// now" without also triggering repairs.
    pub async fn status(&self) -> Result<HealthReport> {
        let mut report = HealthReport::default();

        for bucket in self.store.list_buckets()? {
            for key in self.engine.list_ec_keys(&bucket.name).await? {
                let Some(health) = self.engine.shard_health(&bucket.name, &key).await? else {
                    continue;
                };
                report.total += 1;
                if health.is_healthy() {
                    report.healthy += 1;
                } else {
                    report.degraded += 1;
                }
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::sync::Arc as StdArc;
    use vaults3_common::ErasureConfig;
    use vaults3_meta::types::StoredBucket;
    use vaults3_storage::fs::FsEngine;
    use vaults3_storage::StorageEngine;

    struct Fixture {
        _meta_dir: tempfile::TempDir,
        _backend_dirs: Vec<tempfile::TempDir>,
        store: Arc<MetaStore>,
        backends: Vec<StdArc<dyn StorageEngine>>,
        engine: Arc<ErasureEngine>,
    }

    fn setup() -> Fixture {
        let meta_dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MetaStore::open(meta_dir.path().join("meta.redb")).unwrap());
        store
            .create_bucket(&StoredBucket {
                name: "b".into(),
                created_at: 0,
                versioning: Default::default(),
                object_lock_enabled: false,
            })
            .unwrap();

        let backend_dirs: Vec<_> = (0..3).map(|_| tempfile::tempdir().unwrap()).collect();
        let backends: Vec<StdArc<dyn StorageEngine>> = backend_dirs
            .iter()
            .map(|d| StdArc::new(FsEngine::new(d.path())) as StdArc<dyn StorageEngine>)
            .collect();

        let engine = Arc::new(ErasureEngine::new(backends.clone(), ErasureConfig::new(4, 2), 16));
        Fixture { _meta_dir: meta_dir, _backend_dirs: backend_dirs, store, backends, engine }
    }

    #[tokio::test]
    async fn heal_once_reconstructs_a_degraded_key_and_reports_it_healed() {
        let fx = setup();
        fx.engine.create_bucket_dir("b").await.unwrap();

        let data = Bytes::from(vec![b'h'; 2048]);
        fx.engine.put_object("b", "big", data.clone(), data.len() as u64).await.unwrap();

        // Knock out one shard, still within parity tolerance.
        fx.backends[0 % fx.backends.len()].delete_object("b", ".ec/big/shard-00").await.unwrap();

        let healer = Healer::new(fx.store, fx.engine.clone(), HealerConfig::default());
        let summary = healer.heal_once().await.unwrap();
        assert_eq!(summary, HealSummary { total: 1, healed: 1, unrecoverable: 0, failed: 0 });

        let status = healer.status().await.unwrap();
        assert_eq!(status, HealthReport { total: 1, healthy: 1, degraded: 0 });
    }

    #[tokio::test]
    async fn heal_once_logs_and_skips_unrecoverable_keys() {
        let fx = setup();
        fx.engine.create_bucket_dir("b").await.unwrap();

        let data = Bytes::from(vec![b'u'; 2048]);
        fx.engine.put_object("b", "big", data, 2048).await.unwrap();

        for i in 0..3 {
            let shard_path = format!(".ec/big/shard-0{i}");
            fx.backends[i % fx.backends.len()].delete_object("b", &shard_path).await.unwrap();
        }

        let healer = Healer::new(fx.store, fx.engine, HealerConfig::default());
        let summary = healer.heal_once().await.unwrap();
        assert_eq!(summary, HealSummary { total: 1, healed: 0, unrecoverable: 1, failed: 0 });
    }

    #[tokio::test]
    async fn a_healthy_key_is_left_untouched() {
        let fx = setup();
        fx.engine.create_bucket_dir("b").await.unwrap();

        fx.engine.put_object("b", "big", Bytes::from(vec![b'k'; 2048]), 2048).await.unwrap();

        let healer = Healer::new(fx.store, fx.engine, HealerConfig::default());
        let summary = healer.heal_once().await.unwrap();
        assert_eq!(summary, HealSummary { total: 1, healed: 0, unrecoverable: 0, failed: 0 });
    }
}
