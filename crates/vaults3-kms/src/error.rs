//! Error types for KMS key providers

use thiserror::Error;

/// Errors returned by a `KeyProvider`
#[derive(Debug, Error)]
pub enum KmsError {
    #[error("key not found: {0}")]
    KeyNotFound(String),

    #[error("request to KMS backend timed out")]
    Timeout,

    #[error("KMS backend unavailable: {0}")]
    Unavailable(String),

    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}
