//! Erasure coding backend abstraction
//!
//! This module provides a trait-based abstraction over Reed-Solomon
//! implementations so the SIMD backend can be swapped without touching the
//! codec layer above it.
//!
//! # Backends
//!
//! - `rust_simd`: Pure Rust using reed-solomon-simd, portable

pub mod rust_simd;

use crate::ErasureError;

/// Result type for backend operations
pub type BackendResult<T> = Result<T, ErasureError>;

/// Capabilities of an erasure coding backend
#[derive(Clone, Debug, Default)]
pub struct BackendCapabilities {
    /// Backend name for identification
    pub name: &'static str,
    /// Supports SIMD acceleration
    pub supports_simd: bool,
    /// Maximum data shards supported
    pub max_data_shards: usize,
    /// Maximum parity shards supported
    pub max_parity_shards: usize,
}

/// Core trait for MDS (Maximum Distance Separable) erasure coding backends.
///
/// Any `k` of the `k + m` shards produced by `encode` suffice to reconstruct
/// the original data via `decode`.
pub trait ErasureBackend: Send + Sync {
    /// Get backend capabilities
    fn capabilities(&self) -> BackendCapabilities;

    /// Get the number of data shards (k)
    fn data_shards(&self) -> usize;

    /// Get the number of parity shards (m)
    fn parity_shards(&self) -> usize;

    /// Get total number of shards (k + m)
    fn total_shards(&self) -> usize {
        self.data_shards() + self.parity_shards()
    }

    /// Get minimum shards required for reconstruction (k)
    fn min_shards_for_decode(&self) -> usize {
        self.data_shards()
    }

    /// Encode data shards into parity shards
    ///
    /// Takes `k` data shards of equal size and produces `m` parity shards.
    /// Returns all shards (k data + m parity) in order.
    ///
    /// # Arguments
    /// * `data_shards` - Slice of k data shard references, all same size
    /// * `shard_size` - Size of each shard in bytes
    ///
    /// # Returns
    /// Vector of k+m shards (data shards copied, parity shards computed)
    fn encode(&self, data_shards: &[&[u8]], shard_size: usize) -> BackendResult<Vec<Vec<u8>>>;

    /// Decode/reconstruct missing shards
    ///
    /// Given available shards (some may be missing), reconstruct the
    /// missing data shards. Requires at least k shards to be present.
    ///
    /// # Arguments
    /// * `shards` - Slice of k+m optional shards, `None` for missing
    /// * `shard_size` - Size of each shard in bytes
    /// * `missing_indices` - Indices of shards to reconstruct
    ///
    /// # Returns
    /// Vector of k+m shards, data and reconstructed parity
    fn decode(
        &self,
        shards: &[Option<&[u8]>],
        shard_size: usize,
        missing_indices: &[usize],
    ) -> BackendResult<Vec<Vec<u8>>>;

    /// Verify that parity shards are consistent with data shards
    ///
    /// Re-encodes the data shards and compares with provided parity shards.
    fn verify(&self, shards: &[&[u8]]) -> BackendResult<bool>;
}

pub use rust_simd::RustSimdBackend;

/// Create the default Reed-Solomon backend for a given (k, m) split.
pub fn create(data_shards: u8, parity_shards: u8) -> Result<RustSimdBackend, ErasureError> {
    RustSimdBackend::new(data_shards, parity_shards)
}
