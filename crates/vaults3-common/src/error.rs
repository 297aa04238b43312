//! Error types for VaultS3
//!
//! This module defines the error kinds shared across the storage engine,
//! metadata store, Raft FSM, placement, and replication subsystems.

use crate::types::{BucketNameError, ObjectKeyError};
use thiserror::Error;

/// Common result type for VaultS3 operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for VaultS3
#[derive(Debug, Error)]
pub enum Error {
    // Not found / already exists
    #[error("bucket not found: {0}")]
    BucketNotFound(String),

    #[error("bucket already exists: {0}")]
    BucketAlreadyExists(String),

    #[error("object not found: {bucket}/{key}")]
    ObjectNotFound { bucket: String, key: String },

    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("node not found: {0}")]
    NodeNotFound(String),

    // Validation
    #[error("invalid bucket name: {0}")]
    InvalidBucketName(#[from] BucketNameError),

    #[error("invalid object key: {0}")]
    InvalidObjectKey(#[from] ObjectKeyError),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    // Conflict
    #[error("bucket not empty: {0}")]
    BucketNotEmpty(String),

    #[error("concurrent modification: {0}")]
    Conflict(String),

    // Raft / leadership
    #[error("not the leader; current leader is {leader:?}")]
    NotLeader { leader: Option<String> },

    #[error("unknown raft command type: {0}")]
    ProtocolError(String),

    // Quota
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    // Auth
    #[error("authentication failed: {0}")]
    AuthFail(String),

    // Erasure coding / decode
    #[error("insufficient shards for reconstruction: have {available}, need {required}")]
    InsufficientShards { available: usize, required: usize },

    #[error("unrecoverable: {0}")]
    Unrecoverable(String),

    #[error("erasure coding error: {0}")]
    ErasureCoding(String),

    // Networking / peers
    #[error("transient error: {0}")]
    Transient(String),

    #[error("request timed out")]
    Timeout,

    // I/O
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    // Serialization
    #[error("serialization error: {0}")]
    Serialization(String),

    // Generic
    #[error("internal error: {0}")]
    Internal(String),

    #[error("not implemented: {0}")]
    NotImplemented(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl Error {
    /// Create a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Create an invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Check whether this error kind should be retried with backoff by a
    /// background worker (§7: Transient errors).
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Timeout)
    }

    /// Check if this is a not-found error
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::BucketNotFound(_) | Self::ObjectNotFound { .. } | Self::NodeNotFound(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors_are_retryable() {
        assert!(Error::Transient("peer unreachable".into()).is_transient());
        assert!(Error::Timeout.is_transient());
        assert!(!Error::BucketNotFound("x".into()).is_transient());
    }

    #[test]
    fn not_found_classification() {
        assert!(Error::BucketNotFound("b".into()).is_not_found());
        assert!(
            Error::ObjectNotFound {
                bucket: "b".into(),
                key: "k".into()
            }
            .is_not_found()
        );
        assert!(!Error::QuotaExceeded("x".into()).is_not_found());
    }
}
