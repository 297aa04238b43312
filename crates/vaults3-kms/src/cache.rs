//! In-memory cache of resolved data encryption keys
//!
//! Keyed by key name, so rotation is just evicting one entry: the next
//! `get_key` call falls through to the provider and re-fetches.

use dashmap::DashMap;

/// Cache of resolved 32-byte data encryption keys, keyed by key name.
pub struct KeyCache {
    entries: DashMap<String, [u8; 32]>,
}

impl KeyCache {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<[u8; 32]> {
        self.entries.get(name).map(|entry| *entry.value())
    }

    pub fn insert(&self, name: String, key: [u8; 32]) {
        self.entries.insert(name, key);
    }

    /// Evict a key, forcing the next lookup to re-fetch from the provider.
    pub fn evict(&self, name: &str) {
        self.entries.remove(name);
    }
}

impl Default for KeyCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evict_forces_refetch() {
        let cache = KeyCache::new();
        cache.insert("dek-1".to_string(), [7u8; 32]);
        assert!(cache.get("dek-1").is_some());

        cache.evict("dek-1");
        assert!(cache.get("dek-1").is_none());
    }
}
