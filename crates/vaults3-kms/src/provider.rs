//! Pluggable key provider trait
//!
//! This module defines the abstraction implemented by each KMS backend:
//! a remote Vault-compatible transit API (`VaultHttpProvider`) and a static
//! hex key for development/testing (`LocalHexProvider`).

use crate::error::KmsError;
use async_trait::async_trait;

/// A source of 32-byte data encryption keys, addressed by name.
#[async_trait]
pub trait KeyProvider: Send + Sync {
    /// Fetch the current data encryption key for `key_name`.
    async fn get_key(&self, key_name: &str) -> Result<[u8; 32], KmsError>;

    /// Rotate the key, i.e. mark the current version as retired so the next
    /// `get_key` call returns fresh material. Providers that don't support
    /// rotation (like `LocalHexProvider`) are a no-op.
    async fn rotate(&self, key_name: &str) -> Result<(), KmsError>;
}
