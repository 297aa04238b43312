//! openraft `RaftStateMachine` adapter around `VaultStateMachine`. Tracks
//! the last applied log id and current membership alongside the metadata
//! store itself, in a small redb file separate from both the log and the
//! metadata database.

use crate::fsm::{CommandResponse, VaultStateMachine};
use crate::types::{NodeId, TypeConfig};
use openraft::storage::{RaftSnapshotBuilder, RaftStateMachine, Snapshot};
use openraft::{
    Entry, EntryPayload, LogId, OptionalSend, SnapshotMeta, StorageError, StorageIOError,
    StoredMembership,
};
use redb::{Database, ReadableTable, TableDefinition};
use std::io::Cursor;
use std::path::Path;
use std::sync::{Arc, Mutex};

const SM_STATE: TableDefinition<&str, &[u8]> = TableDefinition::new("sm_state");
const KEY_APPLIED: &str = "last_applied";
const KEY_MEMBERSHIP: &str = "membership";

type Meta = (Option<LogId<NodeId>>, StoredMembership<TypeConfig>);

fn store_err<E: std::error::Error + 'static>(e: E) -> StorageError<NodeId> {
    StorageIOError::write(&e).into()
}

pub struct VaultSnapshotBuilder {
    fsm: Arc<VaultStateMachine>,
    meta: Arc<Mutex<Meta>>,
}

impl RaftSnapshotBuilder<TypeConfig> for VaultSnapshotBuilder {
    async fn build_snapshot(&mut self) -> Result<Snapshot<TypeConfig>, StorageError<NodeId>> {
        let bytes = self.fsm.snapshot().map_err(store_err)?;
        let (last_log_id, last_membership) = self.meta.lock().unwrap().clone();
        let snapshot_id = format!("snapshot-{}", last_log_id.map_or(0, |l| l.index));
        Ok(Snapshot {
            meta: SnapshotMeta { last_log_id, last_membership, snapshot_id },
            snapshot: Box::new(Cursor::new(bytes)),
        })
    }
}

/// Wires `VaultStateMachine` into openraft: applies committed entries,
/// tracks applied-log-id/membership, and builds/installs whole-store
/// snapshots via `MetaStore::snapshot`/`restore`.
pub struct VaultStateMachineStore {
    fsm: Arc<VaultStateMachine>,
    db: Arc<Database>,
    meta: Arc<Mutex<Meta>>,
}

impl VaultStateMachineStore {
    pub fn open(fsm: Arc<VaultStateMachine>, path: impl AsRef<Path>) -> Result<Self, redb::Error> {
        let db = Database::create(path)?;
        {
            let txn = db.begin_write()?;
            txn.open_table(SM_STATE)?;
            txn.commit()?;
        }
        let meta = {
            let txn = db.begin_read()?;
            let table = txn.open_table(SM_STATE)?;
            let applied = table
                .get(KEY_APPLIED)?
                .and_then(|g| serde_json::from_slice(g.value()).ok());
            let membership = table
                .get(KEY_MEMBERSHIP)?
                .and_then(|g| serde_json::from_slice(g.value()).ok())
                .unwrap_or_default();
            (applied, membership)
        };
        Ok(Self { fsm, db: Arc::new(db), meta: Arc::new(Mutex::new(meta)) })
    }

    fn persist_meta(&self) -> Result<(), StorageError<NodeId>> {
        let (applied, membership) = self.meta.lock().unwrap().clone();
        let txn = self.db.begin_write().map_err(store_err)?;
        {
            let mut table = txn.open_table(SM_STATE).map_err(store_err)?;
            if let Some(log_id) = applied {
                let bytes = serde_json::to_vec(&log_id).map_err(store_err)?;
                table.insert(KEY_APPLIED, bytes.as_slice()).map_err(store_err)?;
            }
            let bytes = serde_json::to_vec(&membership).map_err(store_err)?;
            table.insert(KEY_MEMBERSHIP, bytes.as_slice()).map_err(store_err)?;
        }
        txn.commit().map_err(store_err)?;
        Ok(())
    }
}

impl RaftStateMachine<TypeConfig> for VaultStateMachineStore {
    type SnapshotBuilder = VaultSnapshotBuilder;

    async fn applied_state(&mut self) -> Result<Meta, StorageError<NodeId>> {
        Ok(self.meta.lock().unwrap().clone())
    }

    async fn apply<I>(&mut self, entries: I) -> Result<Vec<CommandResponse>, StorageError<NodeId>>
    where
        I: IntoIterator<Item = Entry<TypeConfig>> + OptionalSend,
    {
        let mut responses = Vec::new();
        for entry in entries {
            {
                let mut guard = self.meta.lock().unwrap();
                guard.0 = Some(entry.log_id);
            }
            let response = match entry.payload {
                EntryPayload::Blank => CommandResponse::Ok,
                EntryPayload::Normal(command) => self.fsm.apply(command).map_err(store_err)?,
                EntryPayload::Membership(membership) => {
                    let mut guard = self.meta.lock().unwrap();
                    guard.1 = StoredMembership::new(Some(entry.log_id), membership);
                    CommandResponse::Ok
                }
            };
            responses.push(response);
        }
        self.persist_meta()?;
        Ok(responses)
    }

    async fn get_snapshot_builder(&mut self) -> Self::SnapshotBuilder {
        VaultSnapshotBuilder { fsm: self.fsm.clone(), meta: self.meta.clone() }
    }

    async fn begin_receiving_snapshot(&mut self) -> Result<Box<Cursor<Vec<u8>>>, StorageError<NodeId>> {
        Ok(Box::new(Cursor::new(Vec::new())))
    }

    async fn install_snapshot(
        &mut self,
        meta: &SnapshotMeta<TypeConfig>,
        snapshot: Box<Cursor<Vec<u8>>>,
    ) -> Result<(), StorageError<NodeId>> {
        self.fsm.restore(snapshot.get_ref()).map_err(store_err)?;
        {
            let mut guard = self.meta.lock().unwrap();
            guard.0 = meta.last_log_id;
            guard.1 = meta.last_membership.clone();
        }
        self.persist_meta()?;
        Ok(())
    }

    async fn get_current_snapshot(&mut self) -> Result<Option<Snapshot<TypeConfig>>, StorageError<NodeId>> {
        let mut builder = self.get_snapshot_builder().await;
        Ok(Some(builder.build_snapshot().await?))
    }
}
