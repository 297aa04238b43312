//! Active-active replication: a per-peer pull worker that walks the
//! remote change log, resolves concurrent writes, and merges vector
//! clocks (spec §4.13).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use vaults3_auth::SigV4Signer;
use vaults3_common::config::PeerConfig;
use vaults3_common::{CompareResult, Result, SiteId, VectorClock};
use vaults3_meta::types::{ChangeEntry, ChangeOp, StoredObject};
use vaults3_meta::MetaStore;
use vaults3_storage::StorageEngine;

use crate::queue::REPLICATION_HEADER;
use crate::resolver::{Candidate, ConflictResolver, Winner};

#[derive(Clone, Debug)]
pub struct ChangelogConfig {
    pub site_id: SiteId,
    pub tick_interval: Duration,
    pub pull_limit: usize,
}

/// Request body sent to a peer's `/_replication/sync` endpoint.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SyncRequest {
    pub site_id: String,
    pub since_seq: u64,
    pub limit: usize,
}

/// Response a peer's `/_replication/sync` endpoint returns.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SyncResponse {
    pub site_id: String,
    pub changes: Vec<ChangeEntry>,
    pub last_seq: u64,
}

/// Build the response side of `/_replication/sync`, shared with the HTTP
/// handler that serves peers pulling from this node.
pub fn build_sync_response(store: &MetaStore, self_site: &SiteId, since_seq: u64, limit: usize) -> Result<SyncResponse> {
    let changes = store.read_change_log(since_seq, limit)?;
    let last_seq = store.last_change_log_seq()?;
    Ok(SyncResponse { site_id: self_site.as_str().to_string(), changes, last_seq })
}

pub struct ChangelogPuller {
    store: Arc<MetaStore>,
    engine: Arc<dyn StorageEngine>,
    peers: Vec<PeerConfig>,
    config: ChangelogConfig,
    resolver: Arc<dyn ConflictResolver>,
    client: reqwest::Client,
    cursors: Mutex<HashMap<String, u64>>,
}

impl ChangelogPuller {
    #[must_use]
    pub fn new(
        store: Arc<MetaStore>,
        engine: Arc<dyn StorageEngine>,
        peers: Vec<PeerConfig>,
        config: ChangelogConfig,
        resolver: Arc<dyn ConflictResolver>,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            engine,
            peers,
            config,
            resolver,
            client: reqwest::Client::new(),
            cursors: Mutex::new(HashMap::new()),
        })
    }

    pub async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.tick_interval);
        loop {
            ticker.tick().await;
            for peer in self.peers.clone() {
                if let Err(err) = self.sync_with_peer(&peer).await {
                    warn!(target: "vaults3_replication", peer = %peer.name, error = %err, "sync failed");
                }
            }
        }
    }

    async fn sync_with_peer(&self, peer: &PeerConfig) -> Result<()> {
        let cursor = self.cursors.lock().get(&peer.name).copied().unwrap_or(0);
        let body = SyncRequest {
            site_id: self.config.site_id.as_str().to_string(),
            since_seq: cursor,
            limit: self.config.pull_limit,
        };
        let payload = serde_json::to_vec(&body)
            .map_err(|e| vaults3_common::Error::Internal(e.to_string()))?;

        let path = "/_replication/sync";
        let url = format!("{}{path}", peer.url.trim_end_matches('/'));
        let host = host_of(&peer.url);
        let signer = SigV4Signer::new(&peer.access_key, &peer.secret_key, "us-east-1");
        let signed = signer.sign(&http::Method::POST, &host, path, &payload);

        let response = self
            .client
            .post(&url)
            .header("host", host)
            .header("x-amz-date", signed.date)
            .header("x-amz-content-sha256", signed.content_sha256)
            .header("authorization", signed.authorization)
            .header(REPLICATION_HEADER, "true")
            .header("content-type", "application/json")
            .body(payload)
            .send()
            .await
            .map_err(|e| vaults3_common::Error::Transient(e.to_string()))?;

        if !response.status().is_success() {
            return Err(vaults3_common::Error::Transient(format!(
                "peer {} sync returned {}",
                peer.name,
                response.status()
            )));
        }

        let sync: SyncResponse = response
            .json()
            .await
            .map_err(|e| vaults3_common::Error::Internal(e.to_string()))?;

        let mut applied = 0usize;
        for change in &sync.changes {
            if change.site_id.as_str() == self.config.site_id.as_str() {
                continue;
            }
            self.apply_change(peer, change).await?;
            applied += 1;
        }

        self.cursors.lock().insert(peer.name.clone(), sync.last_seq);
        if applied > 0 {
            info!(target: "vaults3_replication", peer = %peer.name, applied, "applied remote changes");
        }
        Ok(())
    }

    async fn apply_change(&self, peer: &PeerConfig, change: &ChangeEntry) -> Result<()> {
        let local = self.store.get_object_meta(&change.bucket, &change.key)?;

        let Some(local) = local else {
            // No local state: apply unconditionally.
            self.fetch_and_apply(peer, change).await?;
            return Ok(());
        };

        match local.vector_clock.compare(&change.vector_clock) {
            CompareResult::HappenedAfter => {
                // Local is strictly newer; nothing to do.
            }
            CompareResult::HappenedBefore | CompareResult::Equal => {
                self.fetch_and_apply(peer, change).await?;
            }
            CompareResult::Concurrent => {
                let local_candidate = Candidate {
                    site_id: local_site_of(&local, &self.config.site_id),
                    op: if local.delete_marker { ChangeOp::Delete } else { ChangeOp::Put },
                    size: local.size,
                    etag: local.etag.clone(),
                    at: local.last_modified,
                };
                let remote_candidate = Candidate {
                    site_id: change.site_id.clone(),
                    op: change.op,
                    size: change.size,
                    etag: change.etag.clone(),
                    at: change.at,
                };
                if self.resolver.resolve(&local_candidate, &remote_candidate) == Winner::Remote {
                    self.fetch_and_apply(peer, change).await?;
                } else {
                    let merged = local.vector_clock.merge(&change.vector_clock);
                    let mut updated = local;
                    updated.vector_clock = merged;
                    self.store.put_object_meta(&updated)?;
                }
            }
        }
        Ok(())
    }

    /// Fetch the object body from `peer` (for puts) and write it locally,
    /// merging vector clocks either way.
    async fn fetch_and_apply(&self, peer: &PeerConfig, change: &ChangeEntry) -> Result<()> {
        let existing_clock = self
            .store
            .get_object_meta(&change.bucket, &change.key)?
            .map(|o| o.vector_clock)
            .unwrap_or_default();
        let merged_clock = existing_clock.merge(&change.vector_clock);

        match change.op {
            ChangeOp::Delete => {
                self.engine.delete_object(&change.bucket, &change.key).await.ok();
                self.store.delete_object_meta(&change.bucket, &change.key)?;
            }
            ChangeOp::Put => {
                let body = self.fetch_object(peer, &change.bucket, &change.key).await?;
                self.engine
                    .put_object(&change.bucket, &change.key, body, change.size)
                    .await?;
                self.store.put_object_meta(&StoredObject {
                    bucket: change.bucket.clone(),
                    key: change.key.clone(),
                    version_id: None,
                    size: change.size,
                    etag: change.etag.clone(),
                    content_type: String::new(),
                    last_modified: change.at,
                    vector_clock: merged_clock,
                    delete_marker: false,
                })?;
            }
        }
        Ok(())
    }

    async fn fetch_object(&self, peer: &PeerConfig, bucket: &str, key: &str) -> Result<Bytes> {
        let path = format!("/{bucket}/{key}");
        let url = format!("{}{path}", peer.url.trim_end_matches('/'));
        let host = host_of(&peer.url);
        let signer = SigV4Signer::new(&peer.access_key, &peer.secret_key, "us-east-1");
        let signed = signer.sign(&http::Method::GET, &host, &path, b"");

        let response = self
            .client
            .get(&url)
            .header("host", host)
            .header("x-amz-date", signed.date)
            .header("x-amz-content-sha256", signed.content_sha256)
            .header("authorization", signed.authorization)
            .header(REPLICATION_HEADER, "true")
            .send()
            .await
            .map_err(|e| vaults3_common::Error::Transient(e.to_string()))?;

        if !response.status().is_success() {
            return Err(vaults3_common::Error::Transient(format!(
                "peer fetch of {bucket}/{key} returned {}",
                response.status()
            )));
        }
        response
            .bytes()
            .await
            .map_err(|e| vaults3_common::Error::Transient(e.to_string()))
    }
}

/// Stored objects don't track which site wrote them locally, so the
/// synthetic candidate for "our" side of a conflict is always this site.
fn local_site_of(_local: &StoredObject, self_site: &SiteId) -> SiteId {
    self_site.clone()
}

fn host_of(url: &str) -> String {
    url.trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_end_matches('/')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::LastWriterWins;
    use vaults3_meta::types::StoredBucket;
    use vaults3_storage::fs::FsEngine;

    fn setup() -> (tempfile::TempDir, Arc<MetaStore>, Arc<dyn StorageEngine>) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MetaStore::open(dir.path().join("meta.redb")).unwrap());
        store
            .create_bucket(&StoredBucket {
                name: "b".into(),
                created_at: 0,
                versioning: Default::default(),
                object_lock_enabled: false,
            })
            .unwrap();
        let engine: Arc<dyn StorageEngine> = Arc::new(FsEngine::new(dir.path()));
        (dir, store, engine)
    }

    fn peer() -> PeerConfig {
        PeerConfig {
            name: "peerA".into(),
            url: "http://127.0.0.1:1".into(),
            site_id: Some("B".into()),
            access_key: "AKIA".into(),
            secret_key: "secret".into(),
        }
    }

    #[tokio::test]
    async fn an_unknown_key_is_applied_unconditionally() {
        let (_dir, store, engine) = setup();
        let puller = ChangelogPuller::new(
            store.clone(),
            engine,
            vec![peer()],
            ChangelogConfig {
                site_id: SiteId::new("A"),
                tick_interval: Duration::from_secs(30),
                pull_limit: 100,
            },
            Arc::new(LastWriterWins),
        );

        let mut vc = VectorClock::new();
        vc.increment(&SiteId::new("B"));
        let change = ChangeEntry {
            seq: 1,
            site_id: SiteId::new("B"),
            bucket: "b".into(),
            key: "k".into(),
            op: ChangeOp::Delete,
            size: 0,
            etag: String::new(),
            vector_clock: vc,
            at: 100,
        };

        // Delete of a never-seen key: local metadata stays absent, but the
        // call must not error.
        puller.apply_change(&peer(), &change).await.unwrap();
        assert!(store.get_object_meta("b", "k").unwrap().is_none());
    }

    #[tokio::test]
    async fn a_causally_older_remote_change_is_skipped() {
        let (_dir, store, engine) = setup();

        let mut local_vc = VectorClock::new();
        local_vc.increment(&SiteId::new("A"));
        local_vc.increment(&SiteId::new("A"));
        store
            .put_object_meta(&StoredObject {
                bucket: "b".into(),
                key: "k".into(),
                version_id: None,
                size: 10,
                etag: "\"local\"".into(),
                content_type: String::new(),
                last_modified: 500,
                vector_clock: local_vc.clone(),
                delete_marker: false,
            })
            .unwrap();

        let puller = ChangelogPuller::new(
            store.clone(),
            engine,
            vec![peer()],
            ChangelogConfig {
                site_id: SiteId::new("A"),
                tick_interval: Duration::from_secs(30),
                pull_limit: 100,
            },
            Arc::new(LastWriterWins),
        );

        let mut older_vc = VectorClock::new();
        older_vc.increment(&SiteId::new("A"));
        let change = ChangeEntry {
            seq: 1,
            site_id: SiteId::new("B"),
            bucket: "b".into(),
            key: "k".into(),
            op: ChangeOp::Put,
            size: 1,
            etag: "\"remote\"".into(),
            vector_clock: older_vc,
            at: 1,
        };

        puller.apply_change(&peer(), &change).await.unwrap();
        let after = store.get_object_meta("b", "k").unwrap().unwrap();
        assert_eq!(after.etag, "\"local\"");
    }
}
