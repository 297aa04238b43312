//! The deterministic half of Raft (spec §4.7): decode a logged `Command`
//! and dispatch it to `vaults3_meta::MetaStore`. No clocks, randomness, or
//! map-iteration order may enter here — every value that could differ
//! between replicas must already be baked into the `Command`.

use crate::command::Command;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use vaults3_common::{Error, Result};
use vaults3_meta::MetaStore;

/// What applying one logged command yields back to the proposer. Most
/// commands just succeed; a few can fail for a reason that isn't a
/// storage/consensus fault (a duplicate `CreateBucket`) and still need to
/// reach the original caller as an ordinary error rather than aborting the
/// whole apply loop.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum CommandResponse {
    Ok,
    AlreadyExists(String),
}

fn ok(_: ()) -> CommandResponse {
    CommandResponse::Ok
}

/// Wraps a `MetaStore` and applies decoded commands to it one at a time.
/// This is the piece openraft's `RaftStateMachine` calls into; kept
/// separate from the openraft trait plumbing in `state_machine.rs` so it
/// can be exercised directly in tests without standing up a raft group.
pub struct VaultStateMachine {
    store: Arc<MetaStore>,
}

impl VaultStateMachine {
    #[must_use]
    pub const fn new(store: Arc<MetaStore>) -> Self {
        Self { store }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<MetaStore> {
        &self.store
    }

    /// Decode and apply one logged command.
    pub fn apply_bytes(&self, bytes: &[u8]) -> Result<CommandResponse> {
        self.apply(Command::decode(bytes)?)
    }

    /// Applies one command, returning `Err` only for genuine storage
    /// faults. A command that fails for a reason the proposer needs to see
    /// (`CreateBucket` naming an existing bucket) resolves `Ok` with that
    /// outcome carried in the `CommandResponse` instead, so a faulty write
    /// never looks like a broken state machine to openraft.
    pub fn apply(&self, command: Command) -> Result<CommandResponse> {
        match command {
            Command::CreateBucket(b) => match self.store.create_bucket(&b) {
                Ok(()) => Ok(CommandResponse::Ok),
                Err(Error::BucketAlreadyExists(name)) => Ok(CommandResponse::AlreadyExists(name)),
                Err(e) => Err(e),
            },
            Command::DeleteBucket(p) => self.store.delete_bucket(&p.name).map(ok),
            Command::SetBucketConfig(p) => self
                .store
                .set_bucket_config(&p.bucket, &p.kind, &p.body)
                .map(ok),
            Command::DeleteBucketConfig(p) => {
                self.store.delete_bucket_config(&p.bucket, &p.kind).map(ok)
            }
            Command::PutObjectMeta(o) => self.store.put_object_meta(&o).map(ok),
            Command::DeleteObjectMeta(p) => {
                self.store.delete_object_meta(&p.bucket, &p.key).map(ok)
            }
            Command::PutObjectVersion(v) => self.store.put_object_version(&v).map(ok),
            Command::DeleteObjectVersion(p) => self
                .store
                .delete_object_version(&p.bucket, &p.key, &p.version_id)
                .map(ok),
            Command::CreateUser(u) => self.store.create_user(&u).map(ok),
            Command::DeleteUser(p) => self.store.delete_user(&p.user_id).map(ok),
            Command::CreateGroup(g) => self.store.create_group(&g).map(ok),
            Command::DeleteGroup(p) => self.store.delete_group(&p.group_id).map(ok),
            Command::PutPolicy(policy) => self.store.put_policy(&policy).map(ok),
            Command::DeletePolicy(p) => self.store.delete_policy(&p.policy_id).map(ok),
            Command::CreateAccessKey(k) => self.store.create_access_key(&k).map(ok),
            Command::DeleteAccessKey(p) => self.store.delete_access_key(&p.access_key_id).map(ok),
            Command::RecordAudit(r) => self.store.record_audit(r).map(|_| CommandResponse::Ok),
            Command::AppendChangeLog(entry) => {
                self.store.append_change_log(entry).map(|_| CommandResponse::Ok)
            }
            Command::TrimChangeLog(p) => self.store.trim_change_log(p.before_seq).map(ok),
            Command::EnqueueReplication(e) => self.store.enqueue_replication(&e).map(ok),
            Command::AckReplication(p) => self.store.ack_replication_event(&p.event_id).map(ok),
            Command::NackReplication(p) => self
                .store
                .nack_replication_event(&p.event_id, p.next_retry_at)
                .map(ok),
            Command::UpdateReplicationStatus(p) => self
                .store
                .update_replication_status(&p.peer, &p.status)
                .map(ok),
        }
    }

    /// Whole-store snapshot for openraft's snapshot transfer (spec §4.7).
    pub fn snapshot(&self) -> Result<Vec<u8>> {
        self.store.snapshot()
    }

    /// Replace this replica's entire state from a peer's snapshot.
    pub fn restore(&self, bytes: &[u8]) -> Result<()> {
        self.store.restore(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{DeleteBucketPayload, DeleteObjectMetaPayload};
    use tempfile::tempdir;
    use vaults3_common::{VectorClock, VersioningState};
    use vaults3_meta::StoredObject;

    fn fsm() -> (tempfile::TempDir, VaultStateMachine) {
        let dir = tempdir().unwrap();
        let store = Arc::new(MetaStore::open(dir.path().join("meta.redb")).unwrap());
        (dir, VaultStateMachine::new(store))
    }

    #[test]
    fn create_then_delete_bucket_commands_apply_in_order() {
        let (_dir, fsm) = fsm();
        fsm.apply(Command::CreateBucket(vaults3_meta::StoredBucket {
            name: "b".into(),
            created_at: 0,
            versioning: VersioningState::Disabled,
            object_lock_enabled: false,
        }))
        .unwrap();
        assert!(fsm.store().get_bucket("b").unwrap().is_some());

        fsm.apply(Command::DeleteBucket(DeleteBucketPayload { name: "b".into() }))
            .unwrap();
        assert!(fsm.store().get_bucket("b").unwrap().is_none());
    }

    #[test]
    fn duplicate_create_bucket_resolves_to_already_exists_without_erroring_the_apply() {
        let (_dir, fsm) = fsm();
        let cmd = || {
            Command::CreateBucket(vaults3_meta::StoredBucket {
                name: "b".into(),
                created_at: 0,
                versioning: VersioningState::Disabled,
                object_lock_enabled: false,
            })
        };
        assert!(matches!(fsm.apply(cmd()).unwrap(), CommandResponse::Ok));
        match fsm.apply(cmd()).unwrap() {
            CommandResponse::AlreadyExists(name) => assert_eq!(name, "b"),
            CommandResponse::Ok => panic!("expected AlreadyExists on the second create"),
        }
    }

    #[test]
    fn apply_bytes_round_trips_through_the_wire_format() {
        let (_dir, fsm) = fsm();
        let cmd = Command::PutObjectMeta(StoredObject {
            bucket: "b".into(),
            key: "k".into(),
            version_id: None,
            size: 3,
            etag: "\"x\"".into(),
            content_type: "text/plain".into(),
            last_modified: 0,
            vector_clock: VectorClock::new(),
            delete_marker: false,
        });
        fsm.apply_bytes(&cmd.encode().unwrap()).unwrap();
        assert!(fsm.store().get_object_meta("b", "k").unwrap().is_some());

        fsm.apply(Command::DeleteObjectMeta(DeleteObjectMetaPayload {
            bucket: "b".into(),
            key: "k".into(),
        }))
        .unwrap();
        assert!(fsm.store().get_object_meta("b", "k").unwrap().is_none());
    }

    #[test]
    fn snapshot_and_restore_transfer_full_state() {
        let (_dir, fsm) = fsm();
        fsm.apply(Command::CreateBucket(vaults3_meta::StoredBucket {
            name: "b".into(),
            created_at: 0,
            versioning: VersioningState::Disabled,
            object_lock_enabled: false,
        }))
        .unwrap();
        let bytes = fsm.snapshot().unwrap();

        let (_dir2, fresh) = fsm();
        fresh.restore(&bytes).unwrap();
        assert!(fresh.store().get_bucket("b").unwrap().is_some());
    }
}
