//! Active-passive replication queue and per-peer status (spec §4.13).
//! Enqueue/dequeue/ack/nack are plain store operations; the retry-backoff
//! policy and actual peer HTTP calls live in `vaults3-replication`.

use crate::store::{MetaStore, decode, encode, meta_err};
use crate::tables::{REPLICATION_QUEUE, REPLICATION_STATUS};
use crate::types::{PeerReplicationStatus, ReplicationEvent};
use redb::ReadableTable;
use vaults3_common::Result;

impl MetaStore {
    pub fn enqueue_replication(&self, event: &ReplicationEvent) -> Result<()> {
        let txn = self.db.begin_write().map_err(meta_err)?;
        {
            let mut table = txn.open_table(REPLICATION_QUEUE).map_err(meta_err)?;
            table
                .insert(event.event_id.as_str(), encode(event)?.as_slice())
                .map_err(meta_err)?;
        }
        txn.commit().map_err(meta_err)?;
        Ok(())
    }

    /// Up to `batch_size` events queued for `peer` whose `next_retry_at <=
    /// now`, spec §4.13's per-tick dequeue.
    pub fn due_replication_events(
        &self,
        peer: &str,
        now: i64,
        batch_size: usize,
    ) -> Result<Vec<ReplicationEvent>> {
        let txn = self.db.begin_read().map_err(meta_err)?;
        let table = txn.open_table(REPLICATION_QUEUE).map_err(meta_err)?;
        let mut out = Vec::new();
        for row in table.iter().map_err(meta_err)? {
            let (_, v) = row.map_err(meta_err)?;
            let event: ReplicationEvent = decode(v.value())?;
            if event.peer == peer && event.next_retry_at <= now {
                out.push(event);
                if out.len() >= batch_size {
                    break;
                }
            }
        }
        Ok(out)
    }

    /// Remove an event on successful delivery.
    pub fn ack_replication_event(&self, event_id: &str) -> Result<()> {
        let txn = self.db.begin_write().map_err(meta_err)?;
        {
            let mut table = txn.open_table(REPLICATION_QUEUE).map_err(meta_err)?;
            table.remove(event_id).map_err(meta_err)?;
        }
        txn.commit().map_err(meta_err)?;
        Ok(())
    }

    /// Bump retry count and reschedule after a failed delivery. The caller
    /// is responsible for dead-lettering (removing via `ack_replication_event`
    /// and recording the failure) once `retry_count` crosses `max_retries`.
    pub fn nack_replication_event(&self, event_id: &str, next_retry_at: i64) -> Result<()> {
        let txn = self.db.begin_write().map_err(meta_err)?;
        {
            let mut table = txn.open_table(REPLICATION_QUEUE).map_err(meta_err)?;
            if let Some(guard) = table.get(event_id).map_err(meta_err)? {
                let mut event: ReplicationEvent = decode(guard.value())?;
                drop(guard);
                event.retry_count += 1;
                event.next_retry_at = next_retry_at;
                table
                    .insert(event_id, encode(&event)?.as_slice())
                    .map_err(meta_err)?;
            }
        }
        txn.commit().map_err(meta_err)?;
        Ok(())
    }

    pub fn queue_depth_for_peer(&self, peer: &str) -> Result<u64> {
        let txn = self.db.begin_read().map_err(meta_err)?;
        let table = txn.open_table(REPLICATION_QUEUE).map_err(meta_err)?;
        let mut count = 0u64;
        for row in table.iter().map_err(meta_err)? {
            let (_, v) = row.map_err(meta_err)?;
            let event: ReplicationEvent = decode(v.value())?;
            if event.peer == peer {
                count += 1;
            }
        }
        Ok(count)
    }

    pub fn update_replication_status(&self, peer: &str, status: &PeerReplicationStatus) -> Result<()> {
        let txn = self.db.begin_write().map_err(meta_err)?;
        {
            let mut table = txn.open_table(REPLICATION_STATUS).map_err(meta_err)?;
            table.insert(peer, encode(status)?.as_slice()).map_err(meta_err)?;
        }
        txn.commit().map_err(meta_err)?;
        Ok(())
    }

    pub fn get_replication_status(&self, peer: &str) -> Result<Option<PeerReplicationStatus>> {
        let txn = self.db.begin_read().map_err(meta_err)?;
        let table = txn.open_table(REPLICATION_STATUS).map_err(meta_err)?;
        table
            .get(peer)
            .map_err(meta_err)?
            .map(|g| decode(g.value()))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ReplicationOp;
    use tempfile::tempdir;

    fn open_store() -> (tempfile::TempDir, MetaStore) {
        let dir = tempdir().unwrap();
        let store = MetaStore::open(dir.path().join("meta.redb")).unwrap();
        (dir, store)
    }

    fn event(id: &str, peer: &str, next_retry_at: i64) -> ReplicationEvent {
        ReplicationEvent {
            event_id: id.into(),
            peer: peer.into(),
            bucket: "b".into(),
            key: "k".into(),
            op: ReplicationOp::Put,
            retry_count: 0,
            next_retry_at,
        }
    }

    #[test]
    fn due_events_filters_by_peer_and_retry_time() {
        let (_dir, store) = open_store();
        store.enqueue_replication(&event("e1", "peerA", 0)).unwrap();
        store.enqueue_replication(&event("e2", "peerA", 100)).unwrap();
        store.enqueue_replication(&event("e3", "peerB", 0)).unwrap();

        let due = store.due_replication_events("peerA", 50, 10).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].event_id, "e1");
    }

    #[test]
    fn nack_increments_retry_and_reschedules() {
        let (_dir, store) = open_store();
        store.enqueue_replication(&event("e1", "peerA", 0)).unwrap();
        store.nack_replication_event("e1", 45).unwrap();

        let due = store.due_replication_events("peerA", 100, 10).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].retry_count, 1);
        assert_eq!(due[0].next_retry_at, 45);

        store.ack_replication_event("e1").unwrap();
        assert_eq!(store.queue_depth_for_peer("peerA").unwrap(), 0);
    }

    #[test]
    fn replication_status_persists_per_peer() {
        let (_dir, store) = open_store();
        store
            .update_replication_status(
                "peerA",
                &PeerReplicationStatus {
                    queue_depth: 3,
                    last_error: Some("timeout".into()),
                    total_synced: 10,
                    total_failed: 2,
                    last_sync_at: Some(123),
                },
            )
            .unwrap();

        let status = store.get_replication_status("peerA").unwrap().unwrap();
        assert_eq!(status.total_synced, 10);
        assert_eq!(status.last_error.as_deref(), Some("timeout"));
        assert!(store.get_replication_status("peerB").unwrap().is_none());
    }
}
