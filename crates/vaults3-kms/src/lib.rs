//! VaultS3 KMS - Key management providers for the encryption decorator
//!
//! Implements the KMS variant of the encryption decorator described in
//! spec.md §4.4: a data encryption key is fetched from a `KeyProvider` and
//! cached in memory, keyed by key name; rotation evicts the cache entry so
//! the next fetch pulls fresh material.

pub mod cache;
pub mod error;
pub mod local;
pub mod provider;
pub mod vault_http;

pub use cache::KeyCache;
pub use error::KmsError;
pub use local::LocalHexProvider;
pub use provider::KeyProvider;
pub use vault_http::{VaultHttpConfig, VaultHttpProvider};

use std::sync::Arc;

/// A `KeyProvider` wrapped with an in-memory cache.
///
/// `get_key` checks the cache first and only calls through to the inner
/// provider on a miss. `rotate` evicts the cached entry in addition to
/// telling the provider to rotate, so the very next `get_key` re-fetches.
pub struct CachedKeyProvider {
    inner: Arc<dyn KeyProvider>,
    cache: KeyCache,
}

impl CachedKeyProvider {
    #[must_use]
    pub fn new(inner: Arc<dyn KeyProvider>) -> Self {
        Self {
            inner,
            cache: KeyCache::new(),
        }
    }

    pub async fn get_key(&self, key_name: &str) -> Result<[u8; 32], KmsError> {
        if let Some(key) = self.cache.get(key_name) {
            return Ok(key);
        }

        let key = self.inner.get_key(key_name).await?;
        self.cache.insert(key_name.to_string(), key);
        Ok(key)
    }

    pub async fn rotate(&self, key_name: &str) -> Result<(), KmsError> {
        self.inner.rotate(key_name).await?;
        self.cache.evict(key_name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cache_hides_repeat_fetches() {
        let provider: Arc<dyn KeyProvider> =
            Arc::new(LocalHexProvider::from_hex(&"11".repeat(32)).unwrap());
        let cached = CachedKeyProvider::new(provider);

        let first = cached.get_key("dek-a").await.unwrap();
        let second = cached.get_key("dek-a").await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn rotate_evicts_cache() {
        let provider: Arc<dyn KeyProvider> =
            Arc::new(LocalHexProvider::from_hex(&"22".repeat(32)).unwrap());
        let cached = CachedKeyProvider::new(provider);

        cached.get_key("dek-b").await.unwrap();
        cached.rotate("dek-b").await.unwrap();
        assert!(cached.cache.get("dek-b").is_none());
    }
}
