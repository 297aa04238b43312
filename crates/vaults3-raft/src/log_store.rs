//! redb-backed Raft log storage, following `vaults3-meta::store`'s idiom of
//! one `redb::Database` handle per concern: the log lives in its own file
//! so the metadata store's snapshot/restore never has to account for
//! Raft's own bookkeeping rows.

use crate::types::{NodeId, TypeConfig};
use openraft::storage::{IOFlushed, LogState, RaftLogStorage};
use openraft::{
    Entry, LogId, OptionalSend, RaftLogReader, StorageError, StorageIOError, Vote,
};
use redb::{Database, ReadableTable, TableDefinition};
use std::fmt::Debug;
use std::ops::RangeBounds;
use std::path::Path;
use std::sync::Arc;

const LOG: TableDefinition<u64, &[u8]> = TableDefinition::new("raft_log");
const STATE: TableDefinition<&str, &[u8]> = TableDefinition::new("raft_state");

const KEY_VOTE: &str = "vote";
const KEY_LAST_PURGED: &str = "last_purged";

fn store_err<E: std::error::Error + 'static>(e: E) -> StorageError<NodeId> {
    StorageIOError::write(&e).into()
}

/// Owns the redb database backing one node's Raft log and vote record.
/// Cheap to clone: the underlying `Database` handle is shared.
#[derive(Clone)]
pub struct RaftLogStore {
    db: Arc<Database>,
}

impl RaftLogStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, redb::Error> {
        let db = Database::create(path)?;
        {
            let txn = db.begin_write()?;
            txn.open_table(LOG)?;
            txn.open_table(STATE)?;
            txn.commit()?;
        }
        Ok(Self { db: Arc::new(db) })
    }

    fn encode_entry(entry: &Entry<TypeConfig>) -> Result<Vec<u8>, StorageError<NodeId>> {
        serde_json::to_vec(entry).map_err(store_err)
    }

    fn decode_entry(bytes: &[u8]) -> Result<Entry<TypeConfig>, StorageError<NodeId>> {
        serde_json::from_slice(bytes).map_err(store_err)
    }
}

impl RaftLogReader<TypeConfig> for RaftLogStore {
    async fn try_get_log_entries<RB: RangeBounds<u64> + Clone + Debug + OptionalSend>(
        &mut self,
        range: RB,
    ) -> Result<Vec<Entry<TypeConfig>>, StorageError<NodeId>> {
        let txn = self.db.begin_read().map_err(store_err)?;
        let table = txn.open_table(LOG).map_err(store_err)?;
        let mut out = Vec::new();
        for row in table.iter().map_err(store_err)? {
            let (k, v) = row.map_err(store_err)?;
            if range.contains(&k.value()) {
                out.push(Self::decode_entry(v.value())?);
            }
        }
        Ok(out)
    }
}

impl RaftLogStorage<TypeConfig> for RaftLogStore {
    type LogReader = Self;

    async fn get_log_state(&mut self) -> Result<LogState<TypeConfig>, StorageError<NodeId>> {
        let txn = self.db.begin_read().map_err(store_err)?;
        let log = txn.open_table(LOG).map_err(store_err)?;

        let last = log
            .iter()
            .map_err(store_err)?
            .next_back()
            .transpose()
            .map_err(store_err)?
            .map(|(_, v)| Self::decode_entry(v.value()))
            .transpose()?
            .map(|e| e.log_id);

        let state = txn.open_table(STATE).map_err(store_err)?;
        let last_purged = state
            .get(KEY_LAST_PURGED)
            .map_err(store_err)?
            .map(|g| serde_json::from_slice::<LogId<NodeId>>(g.value()))
            .transpose()
            .map_err(store_err)?;

        Ok(LogState {
            last_purged_log_id: last_purged.clone(),
            last_log_id: last.or(last_purged),
        })
    }

    async fn save_vote(&mut self, vote: &Vote<NodeId>) -> Result<(), StorageError<NodeId>> {
        let txn = self.db.begin_write().map_err(store_err)?;
        {
            let mut table = txn.open_table(STATE).map_err(store_err)?;
            let bytes = serde_json::to_vec(vote).map_err(store_err)?;
            table.insert(KEY_VOTE, bytes.as_slice()).map_err(store_err)?;
        }
        txn.commit().map_err(store_err)?;
        Ok(())
    }

    async fn read_vote(&mut self) -> Result<Option<Vote<NodeId>>, StorageError<NodeId>> {
        let txn = self.db.begin_read().map_err(store_err)?;
        let table = txn.open_table(STATE).map_err(store_err)?;
        table
            .get(KEY_VOTE)
            .map_err(store_err)?
            .map(|g| serde_json::from_slice(g.value()).map_err(store_err))
            .transpose()
    }

    async fn append<I>(
        &mut self,
        entries: I,
        callback: IOFlushed<TypeConfig>,
    ) -> Result<(), StorageError<NodeId>>
    where
        I: IntoIterator<Item = Entry<TypeConfig>> + OptionalSend,
    {
        let txn = self.db.begin_write().map_err(store_err)?;
        {
            let mut table = txn.open_table(LOG).map_err(store_err)?;
            for entry in entries {
                let index = entry.log_id.index;
                let bytes = Self::encode_entry(&entry)?;
                table.insert(index, bytes.as_slice()).map_err(store_err)?;
            }
        }
        txn.commit().map_err(store_err)?;
        callback.io_completed(Ok(()));
        Ok(())
    }

    async fn truncate(&mut self, log_id: LogId<NodeId>) -> Result<(), StorageError<NodeId>> {
        let txn = self.db.begin_write().map_err(store_err)?;
        {
            let mut table = txn.open_table(LOG).map_err(store_err)?;
            let stale: Vec<u64> = table
                .iter()
                .map_err(store_err)?
                .filter_map(std::result::Result::ok)
                .map(|(k, _)| k.value())
                .filter(|&index| index >= log_id.index)
                .collect();
            for index in stale {
                table.remove(index).map_err(store_err)?;
            }
        }
        txn.commit().map_err(store_err)?;
        Ok(())
    }

    async fn purge(&mut self, log_id: LogId<NodeId>) -> Result<(), StorageError<NodeId>> {
        let txn = self.db.begin_write().map_err(store_err)?;
        {
            let mut log = txn.open_table(LOG).map_err(store_err)?;
            let stale: Vec<u64> = log
                .iter()
                .map_err(store_err)?
                .filter_map(std::result::Result::ok)
                .map(|(k, _)| k.value())
                .filter(|&index| index <= log_id.index)
                .collect();
            for index in stale {
                log.remove(index).map_err(store_err)?;
            }
            let mut state = txn.open_table(STATE).map_err(store_err)?;
            let bytes = serde_json::to_vec(&log_id).map_err(store_err)?;
            state
                .insert(KEY_LAST_PURGED, bytes.as_slice())
                .map_err(store_err)?;
        }
        txn.commit().map_err(store_err)?;
        Ok(())
    }

    async fn get_log_reader(&mut self) -> Self::LogReader {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{Command, DeleteBucketPayload};
    use openraft::{CommittedLeaderId, EntryPayload};
    use tempfile::tempdir;

    fn make_entry(index: u64) -> Entry<TypeConfig> {
        Entry {
            log_id: LogId::new(CommittedLeaderId::new(1, 0), index),
            payload: EntryPayload::Normal(Command::DeleteBucket(DeleteBucketPayload {
                name: "b".into(),
            })),
        }
    }

    #[tokio::test]
    async fn appended_entries_are_readable_back() {
        let dir = tempdir().unwrap();
        let mut store = RaftLogStore::open(dir.path().join("raft.redb")).unwrap();

        let (tx, _rx) = tokio::sync::oneshot::channel();
        store
            .append(vec![make_entry(1), make_entry(2)], IOFlushed::new(tx))
            .await
            .unwrap();

        let entries = store.try_get_log_entries(1..=2).await.unwrap();
        assert_eq!(entries.len(), 2);

        let state = store.get_log_state().await.unwrap();
        assert_eq!(state.last_log_id.unwrap().index, 2);
    }

    #[tokio::test]
    async fn vote_persists_across_reads() {
        let dir = tempdir().unwrap();
        let mut store = RaftLogStore::open(dir.path().join("raft.redb")).unwrap();
        assert!(store.read_vote().await.unwrap().is_none());

        let vote = Vote::new(1, 7u64);
        store.save_vote(&vote).await.unwrap();
        assert_eq!(store.read_vote().await.unwrap().unwrap(), vote);
    }
}
