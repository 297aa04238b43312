//! Core type definitions for VaultS3
//!
//! Fundamental types shared across the storage engine, metadata store, Raft
//! FSM, placement, and replication subsystems: validated identifiers,
//! object/bucket metadata shapes, and the vector clock used for
//! active-active conflict resolution.

use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a cluster node
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(Uuid);

impl NodeId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier for a VaultS3 site participating in active-active replication.
///
/// Unlike `NodeId`, a site ID is a short operator-chosen string (e.g. `"A"`,
/// `"us-east"`) because it appears in vector clocks, change-log entries, and
/// tie-break comparisons where a human-readable, total-ordered value matters.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display)]
#[display("{_0}")]
pub struct SiteId(String);

impl SiteId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SiteId({:?})", self.0)
    }
}

/// Bucket name (unique, DNS-compatible S3 bucket naming rules)
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[display("{_0}")]
pub struct BucketName(String);

impl BucketName {
    pub fn new(name: impl Into<String>) -> Result<Self, BucketNameError> {
        let name = name.into();
        Self::validate(&name)?;
        Ok(Self(name))
    }

    #[must_use]
    pub fn new_unchecked(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(name: &str) -> Result<(), BucketNameError> {
        if name.len() < 3 {
            return Err(BucketNameError::TooShort);
        }
        if name.len() > 63 {
            return Err(BucketNameError::TooLong);
        }

        let first = name.chars().next().unwrap();
        if !first.is_ascii_lowercase() && !first.is_ascii_digit() {
            return Err(BucketNameError::InvalidStartChar);
        }

        let last = name.chars().last().unwrap();
        if !last.is_ascii_lowercase() && !last.is_ascii_digit() {
            return Err(BucketNameError::InvalidEndChar);
        }

        for c in name.chars() {
            if !c.is_ascii_lowercase() && !c.is_ascii_digit() && c != '-' && c != '.' {
                return Err(BucketNameError::InvalidChar(c));
            }
        }

        if name.contains("..") {
            return Err(BucketNameError::ConsecutivePeriods);
        }

        Ok(())
    }
}

impl fmt::Debug for BucketName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BucketName({:?})", self.0)
    }
}

/// Errors that can occur when creating a bucket name
#[derive(Debug, Clone, thiserror::Error)]
pub enum BucketNameError {
    #[error("bucket name must be at least 3 characters")]
    TooShort,
    #[error("bucket name must be at most 63 characters")]
    TooLong,
    #[error("bucket name must start with a lowercase letter or number")]
    InvalidStartChar,
    #[error("bucket name must end with a lowercase letter or number")]
    InvalidEndChar,
    #[error("bucket name contains invalid character: {0}")]
    InvalidChar(char),
    #[error("bucket name cannot contain consecutive periods")]
    ConsecutivePeriods,
}

/// Object key (path within a bucket)
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[display("{_0}")]
pub struct ObjectKey(String);

impl ObjectKey {
    pub fn new(key: impl Into<String>) -> Result<Self, ObjectKeyError> {
        let key = key.into();
        Self::validate(&key)?;
        Ok(Self(key))
    }

    #[must_use]
    pub fn new_unchecked(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(key: &str) -> Result<(), ObjectKeyError> {
        if key.is_empty() {
            return Err(ObjectKeyError::Empty);
        }
        if key.len() > 1024 {
            return Err(ObjectKeyError::TooLong);
        }
        if key.bytes().any(|b| b == 0) {
            return Err(ObjectKeyError::ContainsNul);
        }
        if key.split('/').any(|segment| segment == "..") {
            return Err(ObjectKeyError::DotDotSegment);
        }
        Ok(())
    }
}

impl fmt::Debug for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectKey({:?})", self.0)
    }
}

/// Errors that can occur when creating an object key
#[derive(Debug, Clone, thiserror::Error)]
pub enum ObjectKeyError {
    #[error("object key cannot be empty")]
    Empty,
    #[error("object key cannot exceed 1024 bytes")]
    TooLong,
    #[error("object key cannot contain a NUL byte")]
    ContainsNul,
    #[error("object key cannot contain a `..` path segment")]
    DotDotSegment,
}

/// Bucket versioning state
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum VersioningState {
    #[default]
    Disabled,
    Enabled,
    Suspended,
}

/// Storage tier hint for an object
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageTier {
    #[default]
    None,
    Hot,
    Cold,
}

/// Object lock retention
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Retention {
    pub mode: RetentionMode,
    /// Unix seconds after which the retention lock no longer applies
    pub until: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RetentionMode {
    Governance,
    Compliance,
}

/// Erasure coding configuration: `k` data shards, `m` parity shards
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErasureConfig {
    pub data_shards: u8,
    pub parity_shards: u8,
}

impl ErasureConfig {
    #[must_use]
    pub const fn new(data_shards: u8, parity_shards: u8) -> Self {
        Self {
            data_shards,
            parity_shards,
        }
    }

    #[must_use]
    pub fn total_shards(&self) -> u8 {
        self.data_shards + self.parity_shards
    }

    pub const EC_4_2: Self = Self::new(4, 2);
}

impl Default for ErasureConfig {
    fn default() -> Self {
        Self::EC_4_2
    }
}

/// Result of comparing two vector clocks (spec.md §3)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompareResult {
    Equal,
    HappenedBefore,
    HappenedAfter,
    Concurrent,
}

/// Vector clock: per-site logical counter map used to establish causality
/// across active-active replicated sites.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorClock(BTreeMap<SiteId, u64>);

impl VectorClock {
    #[must_use]
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    #[must_use]
    pub fn get(&self, site: &SiteId) -> u64 {
        self.0.get(site).copied().unwrap_or(0)
    }

    /// Increment this site's own counter. Per spec.md §3's invariant, a site
    /// increments its own counter on every local mutation before logging.
    pub fn increment(&mut self, site: &SiteId) -> u64 {
        let counter = self.0.entry(site.clone()).or_insert(0);
        *counter += 1;
        *counter
    }

    /// Merge two vector clocks, taking the per-site max (`a ⊔ b`).
    #[must_use]
    pub fn merge(&self, other: &Self) -> Self {
        let mut merged = self.0.clone();
        for (site, &count) in &other.0 {
            let entry = merged.entry(site.clone()).or_insert(0);
            *entry = (*entry).max(count);
        }
        Self(merged)
    }

    /// Compare two vector clocks for causal ordering.
    #[must_use]
    pub fn compare(&self, other: &Self) -> CompareResult {
        let mut self_greater = false;
        let mut other_greater = false;

        let sites = self.0.keys().chain(other.0.keys());
        let mut seen = std::collections::HashSet::new();
        for site in sites {
            if !seen.insert(site) {
                continue;
            }
            let a = self.get(site);
            let b = other.get(site);
            match a.cmp(&b) {
                Ordering::Greater => self_greater = true,
                Ordering::Less => other_greater = true,
                Ordering::Equal => {}
            }
        }

        match (self_greater, other_greater) {
            (false, false) => CompareResult::Equal,
            (false, true) => CompareResult::HappenedBefore,
            (true, false) => CompareResult::HappenedAfter,
            (true, true) => CompareResult::Concurrent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_name_valid() {
        assert!(BucketName::new("my-bucket").is_ok());
        assert!(BucketName::new("bucket123").is_ok());
        assert!(BucketName::new("a.b.c").is_ok());
    }

    #[test]
    fn bucket_name_invalid() {
        assert!(BucketName::new("ab").is_err());
        assert!(BucketName::new("-bucket").is_err());
        assert!(BucketName::new("bucket-").is_err());
        assert!(BucketName::new("Bucket").is_err());
        assert!(BucketName::new("bucket..name").is_err());
    }

    #[test]
    fn bucket_name_boundary_lengths() {
        assert!(BucketName::new("ab").is_err()); // 2
        assert!(BucketName::new("a".repeat(63)).is_ok()); // 63
        assert!(BucketName::new("a".repeat(64)).is_err()); // 64
    }

    #[test]
    fn object_key_rules() {
        assert!(ObjectKey::new("").is_err());
        assert!(ObjectKey::new("a").is_ok());
        assert!(ObjectKey::new("a".repeat(1024)).is_ok());
        assert!(ObjectKey::new("a".repeat(1025)).is_err());
        assert!(ObjectKey::new("a\0b").is_err());
        assert!(ObjectKey::new("a/../b").is_err());
    }

    #[test]
    fn vector_clock_compare_is_antisymmetric() {
        let site_a = SiteId::new("A");
        let site_b = SiteId::new("B");

        let mut a = VectorClock::new();
        a.increment(&site_a);
        let b = a.clone();
        let mut b2 = b.clone();
        b2.increment(&site_a);

        assert_eq!(a.compare(&b), CompareResult::Equal);
        assert_eq!(a.compare(&b2), CompareResult::HappenedBefore);
        assert_eq!(b2.compare(&a), CompareResult::HappenedAfter);

        let mut concurrent = a.clone();
        concurrent.increment(&site_b);
        let mut also_concurrent = a.clone();
        also_concurrent.increment(&site_a);
        assert_eq!(concurrent.compare(&also_concurrent), CompareResult::Concurrent);
    }

    #[test]
    fn merge_is_monotone() {
        let site_a = SiteId::new("A");
        let site_b = SiteId::new("B");
        let mut a = VectorClock::new();
        a.increment(&site_a);
        let mut b = VectorClock::new();
        b.increment(&site_b);

        let merged = a.merge(&b);
        assert!(matches!(
            a.compare(&merged),
            CompareResult::Equal | CompareResult::HappenedBefore
        ));
        assert!(matches!(
            b.compare(&merged),
            CompareResult::Equal | CompareResult::HappenedBefore
        ));
    }
}
