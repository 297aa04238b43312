//! Static hex-key provider for development and testing

use crate::error::KmsError;
use crate::provider::KeyProvider;
use async_trait::async_trait;

/// A `KeyProvider` backed by a single static hex-encoded key. Every key name
/// resolves to the same material; `rotate` is a no-op. Intended for
/// development and tests, never production (spec.md §4.4's KMS variant
/// exists precisely so production deployments don't need this one).
pub struct LocalHexProvider {
    key: [u8; 32],
}

impl LocalHexProvider {
    /// Parse a 64-character hex string into a 32-byte key.
    pub fn from_hex(hex_key: &str) -> Result<Self, KmsError> {
        let bytes = hex::decode(hex_key)
            .map_err(|e| KmsError::InvalidKey(format!("invalid hex: {e}")))?;
        let key: [u8; 32] = bytes
            .try_into()
            .map_err(|_| KmsError::InvalidKey("key must be 32 bytes".into()))?;
        Ok(Self { key })
    }
}

#[async_trait]
impl KeyProvider for LocalHexProvider {
    async fn get_key(&self, _key_name: &str) -> Result<[u8; 32], KmsError> {
        Ok(self.key)
    }

    async fn rotate(&self, _key_name: &str) -> Result<(), KmsError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn parses_valid_hex_key() {
        let hex_key = "00".repeat(32);
        let provider = LocalHexProvider::from_hex(&hex_key).unwrap();
        let key = provider.get_key("any-name").await.unwrap();
        assert_eq!(key, [0u8; 32]);
    }

    #[test]
    fn rejects_wrong_length() {
        let hex_key = "00".repeat(16);
        assert!(LocalHexProvider::from_hex(&hex_key).is_err());
    }
}
