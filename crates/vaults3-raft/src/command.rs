//! Replicated command envelope (spec §4.7). Every mutating `MetaStore`
//! method is represented by exactly one `Command` variant, tagged with a
//! stable numeric type so that a command logged by one binary version can
//! still be rejected cleanly (`ProtocolError`) by an older one instead of
//! panicking on an unrecognized JSON shape.

use serde::{Deserialize, Serialize};
use vaults3_common::{Error, Result};
use vaults3_meta::{
    AuditRecord, ChangeEntry, PeerReplicationStatus, ReplicationEvent, StoredAccessKey,
    StoredBucket, StoredGroup, StoredObject, StoredObjectVersion, StoredPolicy, StoredUser,
};

pub const CMD_CREATE_BUCKET: u16 = 1;
pub const CMD_DELETE_BUCKET: u16 = 2;
pub const CMD_SET_BUCKET_CONFIG: u16 = 3;
pub const CMD_DELETE_BUCKET_CONFIG: u16 = 4;
pub const CMD_PUT_OBJECT_META: u16 = 5;
pub const CMD_DELETE_OBJECT_META: u16 = 6;
pub const CMD_PUT_OBJECT_VERSION: u16 = 7;
pub const CMD_DELETE_OBJECT_VERSION: u16 = 8;
pub const CMD_CREATE_USER: u16 = 9;
pub const CMD_DELETE_USER: u16 = 10;
pub const CMD_CREATE_GROUP: u16 = 11;
pub const CMD_DELETE_GROUP: u16 = 12;
pub const CMD_PUT_POLICY: u16 = 13;
pub const CMD_DELETE_POLICY: u16 = 14;
pub const CMD_CREATE_ACCESS_KEY: u16 = 15;
pub const CMD_DELETE_ACCESS_KEY: u16 = 16;
pub const CMD_RECORD_AUDIT: u16 = 17;
pub const CMD_APPEND_CHANGE_LOG: u16 = 18;
pub const CMD_TRIM_CHANGE_LOG: u16 = 19;
pub const CMD_ENQUEUE_REPLICATION: u16 = 20;
pub const CMD_ACK_REPLICATION: u16 = 21;
pub const CMD_NACK_REPLICATION: u16 = 22;
pub const CMD_UPDATE_REPLICATION_STATUS: u16 = 23;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeleteBucketPayload {
    pub name: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SetBucketConfigPayload {
    pub bucket: String,
    pub kind: String,
    pub body: Vec<u8>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeleteBucketConfigPayload {
    pub bucket: String,
    pub kind: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeleteObjectMetaPayload {
    pub bucket: String,
    pub key: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeleteObjectVersionPayload {
    pub bucket: String,
    pub key: String,
    pub version_id: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeleteUserPayload {
    pub user_id: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeleteGroupPayload {
    pub group_id: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeletePolicyPayload {
    pub policy_id: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeleteAccessKeyPayload {
    pub access_key_id: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TrimChangeLogPayload {
    pub before_seq: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AckReplicationPayload {
    pub event_id: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NackReplicationPayload {
    pub event_id: String,
    pub next_retry_at: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UpdateReplicationStatusPayload {
    pub peer: String,
    pub status: PeerReplicationStatus,
}

/// A single replicated mutation. Carries no timestamps or randomness of its
/// own; every field that could vary between replicas is precomputed by the
/// proposer before the command enters the log.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Command {
    CreateBucket(StoredBucket),
    DeleteBucket(DeleteBucketPayload),
    SetBucketConfig(SetBucketConfigPayload),
    DeleteBucketConfig(DeleteBucketConfigPayload),
    PutObjectMeta(StoredObject),
    DeleteObjectMeta(DeleteObjectMetaPayload),
    PutObjectVersion(StoredObjectVersion),
    DeleteObjectVersion(DeleteObjectVersionPayload),
    CreateUser(StoredUser),
    DeleteUser(DeleteUserPayload),
    CreateGroup(StoredGroup),
    DeleteGroup(DeleteGroupPayload),
    PutPolicy(StoredPolicy),
    DeletePolicy(DeletePolicyPayload),
    CreateAccessKey(StoredAccessKey),
    DeleteAccessKey(DeleteAccessKeyPayload),
    RecordAudit(AuditRecord),
    AppendChangeLog(ChangeEntry),
    TrimChangeLog(TrimChangeLogPayload),
    EnqueueReplication(ReplicationEvent),
    AckReplication(AckReplicationPayload),
    NackReplication(NackReplicationPayload),
    UpdateReplicationStatus(UpdateReplicationStatusPayload),
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    type_id: u16,
    payload: serde_json::Value,
}

impl Command {
    #[must_use]
    pub const fn type_id(&self) -> u16 {
        match self {
            Self::CreateBucket(_) => CMD_CREATE_BUCKET,
            Self::DeleteBucket(_) => CMD_DELETE_BUCKET,
            Self::SetBucketConfig(_) => CMD_SET_BUCKET_CONFIG,
            Self::DeleteBucketConfig(_) => CMD_DELETE_BUCKET_CONFIG,
            Self::PutObjectMeta(_) => CMD_PUT_OBJECT_META,
            Self::DeleteObjectMeta(_) => CMD_DELETE_OBJECT_META,
            Self::PutObjectVersion(_) => CMD_PUT_OBJECT_VERSION,
            Self::DeleteObjectVersion(_) => CMD_DELETE_OBJECT_VERSION,
            Self::CreateUser(_) => CMD_CREATE_USER,
            Self::DeleteUser(_) => CMD_DELETE_USER,
            Self::CreateGroup(_) => CMD_CREATE_GROUP,
            Self::DeleteGroup(_) => CMD_DELETE_GROUP,
            Self::PutPolicy(_) => CMD_PUT_POLICY,
            Self::DeletePolicy(_) => CMD_DELETE_POLICY,
            Self::CreateAccessKey(_) => CMD_CREATE_ACCESS_KEY,
            Self::DeleteAccessKey(_) => CMD_DELETE_ACCESS_KEY,
            Self::RecordAudit(_) => CMD_RECORD_AUDIT,
            Self::AppendChangeLog(_) => CMD_APPEND_CHANGE_LOG,
            Self::TrimChangeLog(_) => CMD_TRIM_CHANGE_LOG,
            Self::EnqueueReplication(_) => CMD_ENQUEUE_REPLICATION,
            Self::AckReplication(_) => CMD_ACK_REPLICATION,
            Self::NackReplication(_) => CMD_NACK_REPLICATION,
            Self::UpdateReplicationStatus(_) => CMD_UPDATE_REPLICATION_STATUS,
        }
    }

    fn to_json(&self) -> serde_json::Result<serde_json::Value> {
        match self {
            Self::CreateBucket(v) => serde_json::to_value(v),
            Self::DeleteBucket(v) => serde_json::to_value(v),
            Self::SetBucketConfig(v) => serde_json::to_value(v),
            Self::DeleteBucketConfig(v) => serde_json::to_value(v),
            Self::PutObjectMeta(v) => serde_json::to_value(v),
            Self::DeleteObjectMeta(v) => serde_json::to_value(v),
            Self::PutObjectVersion(v) => serde_json::to_value(v),
            Self::DeleteObjectVersion(v) => serde_json::to_value(v),
            Self::CreateUser(v) => serde_json::to_value(v),
            Self::DeleteUser(v) => serde_json::to_value(v),
            Self::CreateGroup(v) => serde_json::to_value(v),
            Self::DeleteGroup(v) => serde_json::to_value(v),
            Self::PutPolicy(v) => serde_json::to_value(v),
            Self::DeletePolicy(v) => serde_json::to_value(v),
            Self::CreateAccessKey(v) => serde_json::to_value(v),
            Self::DeleteAccessKey(v) => serde_json::to_value(v),
            Self::RecordAudit(v) => serde_json::to_value(v),
            Self::AppendChangeLog(v) => serde_json::to_value(v),
            Self::TrimChangeLog(v) => serde_json::to_value(v),
            Self::EnqueueReplication(v) => serde_json::to_value(v),
            Self::AckReplication(v) => serde_json::to_value(v),
            Self::NackReplication(v) => serde_json::to_value(v),
            Self::UpdateReplicationStatus(v) => serde_json::to_value(v),
        }
    }

    /// Serialize to the `{type, payload}` wire form stored in the Raft log.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let payload = self.to_json().map_err(|e| Error::Serialization(e.to_string()))?;
        let envelope = Envelope { type_id: self.type_id(), payload };
        serde_json::to_vec(&envelope).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Decode a log entry back into a `Command`. An unrecognized `type_id`
    /// (a command newer than this binary knows about) is a `ProtocolError`,
    /// not a panic.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let envelope: Envelope =
            serde_json::from_slice(bytes).map_err(|e| Error::Serialization(e.to_string()))?;
        let from = |v: serde_json::Value| -> Result<_> {
            serde_json::from_value(v).map_err(|e| Error::Serialization(e.to_string()))
        };
        Ok(match envelope.type_id {
            CMD_CREATE_BUCKET => Self::CreateBucket(from(envelope.payload)?),
            CMD_DELETE_BUCKET => Self::DeleteBucket(from(envelope.payload)?),
            CMD_SET_BUCKET_CONFIG => Self::SetBucketConfig(from(envelope.payload)?),
            CMD_DELETE_BUCKET_CONFIG => Self::DeleteBucketConfig(from(envelope.payload)?),
            CMD_PUT_OBJECT_META => Self::PutObjectMeta(from(envelope.payload)?),
            CMD_DELETE_OBJECT_META => Self::DeleteObjectMeta(from(envelope.payload)?),
            CMD_PUT_OBJECT_VERSION => Self::PutObjectVersion(from(envelope.payload)?),
            CMD_DELETE_OBJECT_VERSION => Self::DeleteObjectVersion(from(envelope.payload)?),
            CMD_CREATE_USER => Self::CreateUser(from(envelope.payload)?),
            CMD_DELETE_USER => Self::DeleteUser(from(envelope.payload)?),
            CMD_CREATE_GROUP => Self::CreateGroup(from(envelope.payload)?),
            CMD_DELETE_GROUP => Self::DeleteGroup(from(envelope.payload)?),
            CMD_PUT_POLICY => Self::PutPolicy(from(envelope.payload)?),
            CMD_DELETE_POLICY => Self::DeletePolicy(from(envelope.payload)?),
            CMD_CREATE_ACCESS_KEY => Self::CreateAccessKey(from(envelope.payload)?),
            CMD_DELETE_ACCESS_KEY => Self::DeleteAccessKey(from(envelope.payload)?),
            CMD_RECORD_AUDIT => Self::RecordAudit(from(envelope.payload)?),
            CMD_APPEND_CHANGE_LOG => Self::AppendChangeLog(from(envelope.payload)?),
            CMD_TRIM_CHANGE_LOG => Self::TrimChangeLog(from(envelope.payload)?),
            CMD_ENQUEUE_REPLICATION => Self::EnqueueReplication(from(envelope.payload)?),
            CMD_ACK_REPLICATION => Self::AckReplication(from(envelope.payload)?),
            CMD_NACK_REPLICATION => Self::NackReplication(from(envelope.payload)?),
            CMD_UPDATE_REPLICATION_STATUS => Self::UpdateReplicationStatus(from(envelope.payload)?),
            other => return Err(Error::ProtocolError(other.to_string())),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vaults3_common::VersioningState;

    #[test]
    fn round_trips_through_the_wire_envelope() {
        let cmd = Command::CreateBucket(StoredBucket {
            name: "b".into(),
            created_at: 0,
            versioning: VersioningState::Disabled,
            object_lock_enabled: false,
        });
        let bytes = cmd.encode().unwrap();
        match Command::decode(&bytes).unwrap() {
            Command::CreateBucket(b) => assert_eq!(b.name, "b"),
            other => panic!("wrong variant decoded: {other:?}"),
        }
    }

    #[test]
    fn unknown_command_type_is_a_protocol_error() {
        let bytes = serde_json::to_vec(&Envelope {
            type_id: 9999,
            payload: serde_json::json!({}),
        })
        .unwrap();
        let err = Command::decode(&bytes).unwrap_err();
        assert!(matches!(err, Error::ProtocolError(_)));
    }

    #[test]
    fn delete_bucket_carries_the_bucket_name() {
        let cmd = Command::DeleteBucket(DeleteBucketPayload { name: "b".into() });
        assert_eq!(cmd.type_id(), CMD_DELETE_BUCKET);
        let bytes = cmd.encode().unwrap();
        match Command::decode(&bytes).unwrap() {
            Command::DeleteBucket(p) => assert_eq!(p.name, "b"),
            other => panic!("wrong variant decoded: {other:?}"),
        }
    }
}
