//! Active-passive replication: a per-peer push queue drained by a single
//! ticking worker (spec §4.13).

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use vaults3_auth::SigV4Signer;
use vaults3_common::config::PeerConfig;
use vaults3_common::Result;
use vaults3_meta::types::{ReplicationEvent, ReplicationOp};
use vaults3_meta::MetaStore;
use vaults3_storage::StorageEngine;

pub const REPLICATION_HEADER: &str = "x-vaults3-replication";

/// Retry backoff in seconds, indexed by `retry_count - 1` after a failed
/// attempt; the last entry repeats once `retry_count` exceeds its length.
const BACKOFF_SECS: [i64; 5] = [5, 15, 45, 135, 405];

#[derive(Clone, Debug)]
pub struct QueueConfig {
    pub tick_interval: Duration,
    pub batch_size: usize,
    pub max_retries: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { tick_interval: Duration::from_secs(30), batch_size: 100, max_retries: 3 }
    }
}

fn backoff_secs(retry_count: u32) -> i64 {
    let idx = (retry_count.saturating_sub(1)) as usize;
    BACKOFF_SECS[idx.min(BACKOFF_SECS.len() - 1)]
}

pub struct PushQueue {
    store: Arc<MetaStore>,
    engine: Arc<dyn StorageEngine>,
    peers: Vec<PeerConfig>,
    config: QueueConfig,
    client: reqwest::Client,
}

impl PushQueue {
    #[must_use]
    pub fn new(
        store: Arc<MetaStore>,
        engine: Arc<dyn StorageEngine>,
        peers: Vec<PeerConfig>,
        config: QueueConfig,
    ) -> Arc<Self> {
        Arc::new(Self { store, engine, peers, config, client: reqwest::Client::new() })
    }

    /// Enqueue one event per configured peer for a local mutation. Called
    /// from the S3 handler's replication hook on every successful PUT or
    /// DELETE.
    pub fn enqueue_replication(&self, bucket: &str, key: &str, op: ReplicationOp) -> Result<()> {
        for peer in &self.peers {
            let event = ReplicationEvent {
                event_id: format!("{}-{}-{}-{}", peer.name, bucket, key, uuid::Uuid::new_v4()),
                peer: peer.name.clone(),
                bucket: bucket.to_string(),
                key: key.to_string(),
                op,
                retry_count: 0,
                next_retry_at: 0,
            };
            self.store.enqueue_replication(&event)?;
        }
        Ok(())
    }

    /// Run the drain loop on `config.tick_interval` until cancelled.
    pub async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.tick_interval);
        loop {
            ticker.tick().await;
            for peer in self.peers.clone() {
                if let Err(err) = self.drain_peer(&peer).await {
                    warn!(target: "vaults3_replication", peer = %peer.name, error = %err, "drain failed");
                }
            }
        }
    }

    async fn drain_peer(&self, peer: &PeerConfig) -> Result<()> {
        let now = now_unix();
        let due = self.store.due_replication_events(&peer.name, now, self.config.batch_size)?;

        let mut synced = 0u64;
        let mut failed = 0u64;
        let mut last_error = None;

        for event in due {
            match self.push_event(peer, &event).await {
                Ok(()) => {
                    self.store.ack_replication_event(&event.event_id)?;
                    synced += 1;
                }
                Err(err) => {
                    failed += 1;
                    last_error = Some(err.to_string());
                    if event.retry_count + 1 > self.config.max_retries {
                        warn!(
                            target: "vaults3_replication",
                            peer = %peer.name, bucket = %event.bucket, key = %event.key,
                            "dead-lettering after max retries"
                        );
                        self.store.ack_replication_event(&event.event_id)?;
                    } else {
                        let next_retry_at = now + backoff_secs(event.retry_count + 1);
                        self.store.nack_replication_event(&event.event_id, next_retry_at)?;
                    }
                }
            }
        }

        let depth = self.store.queue_depth_for_peer(&peer.name)?;
        let mut status = self.store.get_replication_status(&peer.name)?.unwrap_or_default();
        status.queue_depth = depth;
        status.total_synced += synced;
        status.total_failed += failed;
        if let Some(err) = last_error {
            status.last_error = Some(err);
        }
        if synced > 0 {
            status.last_sync_at = Some(now);
        }
        self.store.update_replication_status(&peer.name, &status)?;

        if synced > 0 {
            info!(target: "vaults3_replication", peer = %peer.name, synced, failed, "drain complete");
        }
        Ok(())
    }

    async fn push_event(&self, peer: &PeerConfig, event: &ReplicationEvent) -> Result<()> {
        match event.op {
            ReplicationOp::Put => {
                let object = self.engine.get_object(&event.bucket, &event.key).await?;
                self.ensure_bucket(peer, &event.bucket).await?;
                self.put_object(peer, &event.bucket, &event.key, object.data.to_vec()).await
            }
            ReplicationOp::Delete => self.delete_object(peer, &event.bucket, &event.key).await,
        }
    }

    /// Create the bucket on the peer before pushing its first object.
    /// Bucket-create is idempotent on the peer side, so a 409 (already
    /// exists) counts as success.
    async fn ensure_bucket(&self, peer: &PeerConfig, bucket: &str) -> Result<()> {
        let path = format!("/{bucket}");
        let url = format!("{}{path}", peer.url.trim_end_matches('/'));
        let host = host_of(&peer.url);
        let signer = SigV4Signer::new(&peer.access_key, &peer.secret_key, "us-east-1");
        let signed = signer.sign(&http::Method::PUT, &host, &path, b"");

        let response = self
            .client
            .put(&url)
            .header("host", host)
            .header("x-amz-date", signed.date)
            .header("x-amz-content-sha256", signed.content_sha256)
            .header("authorization", signed.authorization)
            .header(REPLICATION_HEADER, "true")
            .send()
            .await
            .map_err(|e| vaults3_common::Error::Transient(e.to_string()))?;

        if response.status().is_success() || response.status() == reqwest::StatusCode::CONFLICT {
            Ok(())
        } else {
            Err(vaults3_common::Error::Transient(format!(
                "peer {} rejected bucket create with status {}",
                peer.name,
                response.status()
            )))
        }
    }

    async fn put_object(&self, peer: &PeerConfig, bucket: &str, key: &str, body: Vec<u8>) -> Result<()> {
        let path = format!("/{bucket}/{key}");
        let url = format!("{}{path}", peer.url.trim_end_matches('/'));
        let host = host_of(&peer.url);
        let signer = SigV4Signer::new(&peer.access_key, &peer.secret_key, "us-east-1");
        let signed = signer.sign(&http::Method::PUT, &host, &path, &body);

        let response = self
            .client
            .put(&url)
            .header("host", host)
            .header("x-amz-date", signed.date)
            .header("x-amz-content-sha256", signed.content_sha256)
            .header("authorization", signed.authorization)
            .header(REPLICATION_HEADER, "true")
            .body(body)
            .send()
            .await
            .map_err(|e| vaults3_common::Error::Transient(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(vaults3_common::Error::Transient(format!(
                "peer {} rejected PUT with status {}",
                peer.name,
                response.status()
            )))
        }
    }

    async fn delete_object(&self, peer: &PeerConfig, bucket: &str, key: &str) -> Result<()> {
        let path = format!("/{bucket}/{key}");
        let url = format!("{}{path}", peer.url.trim_end_matches('/'));
        let host = host_of(&peer.url);
        let signer = SigV4Signer::new(&peer.access_key, &peer.secret_key, "us-east-1");
        let signed = signer.sign(&http::Method::DELETE, &host, &path, b"");

        let response = self
            .client
            .delete(&url)
            .header("host", host)
            .header("x-amz-date", signed.date)
            .header("x-amz-content-sha256", signed.content_sha256)
            .header("authorization", signed.authorization)
            .header(REPLICATION_HEADER, "true")
            .send()
            .await
            .map_err(|e| vaults3_common::Error::Transient(e.to_string()))?;

        // Deleting an object that's already gone on the peer is not an error.
        if response.status().is_success() || response.status() == reqwest::StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(vaults3_common::Error::Transient(format!(
                "peer {} rejected DELETE with status {}",
                peer.name,
                response.status()
            )))
        }
    }
}

fn host_of(url: &str) -> String {
    url.trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_end_matches('/')
        .to_string()
}

fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_escalates_then_holds_at_the_last_step() {
        assert_eq!(backoff_secs(1), 5);
        assert_eq!(backoff_secs(2), 15);
        assert_eq!(backoff_secs(5), 405);
        assert_eq!(backoff_secs(9), 405);
    }

    #[test]
    fn host_of_strips_scheme_and_trailing_slash() {
        assert_eq!(host_of("http://peer:9000/"), "peer:9000");
        assert_eq!(host_of("https://peer:9000"), "peer:9000");
    }

    #[tokio::test]
    async fn due_events_are_acked_on_success_and_nacked_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MetaStore::open(dir.path().join("meta.redb")).unwrap());
        store
            .enqueue_replication(&ReplicationEvent {
                event_id: "e1".into(),
                peer: "peerA".into(),
                bucket: "b".into(),
                key: "k".into(),
                op: ReplicationOp::Put,
                retry_count: 0,
                next_retry_at: 0,
            })
            .unwrap();

        // No live peer listening: push fails, so the queue should nack with
        // a backoff rather than ack.
        let engine: Arc<dyn StorageEngine> = Arc::new(vaults3_storage::fs::FsEngine::new(dir.path()));
        let peer = PeerConfig {
            name: "peerA".into(),
            url: "http://127.0.0.1:1".into(),
            site_id: None,
            access_key: "AKIA".into(),
            secret_key: "secret".into(),
        };
        let queue = PushQueue::new(store.clone(), engine, vec![peer.clone()], QueueConfig::default());
        queue.drain_peer(&peer).await.unwrap();

        let due = store.due_replication_events("peerA", 0, 10).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].retry_count, 1);
        assert!(due[0].next_retry_at > 0);
    }

    #[tokio::test]
    async fn three_failures_exhaust_all_backoffs_before_dead_lettering() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MetaStore::open(dir.path().join("meta.redb")).unwrap());
        store
            .enqueue_replication(&ReplicationEvent {
                event_id: "e1".into(),
                peer: "peerA".into(),
                bucket: "b".into(),
                key: "k".into(),
                op: ReplicationOp::Put,
                retry_count: 0,
                next_retry_at: 0,
            })
            .unwrap();

        let engine: Arc<dyn StorageEngine> = Arc::new(vaults3_storage::fs::FsEngine::new(dir.path()));
        let peer = PeerConfig {
            name: "peerA".into(),
            url: "http://127.0.0.1:1".into(),
            site_id: None,
            access_key: "AKIA".into(),
            secret_key: "secret".into(),
        };
        let config = QueueConfig { max_retries: 3, ..QueueConfig::default() };
        let queue = PushQueue::new(store.clone(), engine, vec![peer.clone()], config);

        // Each of the first three failures consumes one backoff step and
        // stays on the queue.
        for expected_retry_count in 1..=3u32 {
            let before = now_unix();
            queue.drain_peer(&peer).await.unwrap();
            let due = store.due_replication_events("peerA", i64::MAX, 10).unwrap();
            assert_eq!(due.len(), 1, "event dropped before exhausting retries");
            assert_eq!(due[0].retry_count, expected_retry_count);
            assert_eq!(due[0].next_retry_at, before + backoff_secs(expected_retry_count));

            // Fast-forward: make the event due again for the next attempt.
            let mut ready = due.into_iter().next().unwrap();
            ready.next_retry_at = 0;
            store.enqueue_replication(&ready).unwrap();
        }

        // The fourth failure exceeds max_retries and dead-letters.
        queue.drain_peer(&peer).await.unwrap();
        let due = store.due_replication_events("peerA", i64::MAX, 10).unwrap();
        assert!(due.is_empty(), "event should be dead-lettered once retries are exhausted");
    }
}
