//! Reed-Solomon encoder/decoder
//!
//! This module provides the high-level `ErasureCodec` API used by the
//! storage engine's erasure-coding decorator. For lower-level control, use
//! the `backend` module directly.
//!
//! ```
//! use vaults3_erasure::ErasureCodec;
//! use vaults3_common::ErasureConfig;
//!
//! let codec = ErasureCodec::new(ErasureConfig::new(4, 2)).unwrap();
//! let data = b"Hello, World!";
//! let shards = codec.encode(data).unwrap();
//! ```

use crate::backend::{self, ErasureBackend, RustSimdBackend};
use thiserror::Error;
use vaults3_common::{Error as CommonError, ErasureConfig, Result};

/// Errors specific to erasure coding operations
#[derive(Debug, Error)]
pub enum ErasureError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("encoding failed: {0}")]
    EncodingFailed(String),

    #[error("decoding failed: {0}")]
    DecodingFailed(String),

    #[error("insufficient shards: have {available}, need {required}")]
    InsufficientShards { available: usize, required: usize },

    #[error("shard size mismatch")]
    ShardSizeMismatch,
}

impl From<ErasureError> for CommonError {
    fn from(e: ErasureError) -> Self {
        CommonError::ErasureCoding(e.to_string())
    }
}

/// Erasure codec implementing Reed-Solomon MDS coding.
///
/// Any `k` of the `k + m` shards produced by `encode` are sufficient to
/// reconstruct the original data via `decode`.
pub struct ErasureCodec {
    config: ErasureConfig,
    backend: RustSimdBackend,
}

impl ErasureCodec {
    /// Create a new erasure codec with the given configuration
    pub fn new(config: ErasureConfig) -> Result<Self> {
        if config.data_shards == 0 {
            return Err(ErasureError::InvalidConfig("data_shards must be > 0".into()).into());
        }
        if config.parity_shards == 0 {
            return Err(ErasureError::InvalidConfig("parity_shards must be > 0".into()).into());
        }

        let backend = backend::create(config.data_shards, config.parity_shards)?;

        Ok(Self { config, backend })
    }

    /// Get the configuration
    #[must_use]
    pub const fn config(&self) -> ErasureConfig {
        self.config
    }

    /// Get the number of data shards
    #[must_use]
    pub fn data_shards(&self) -> usize {
        self.backend.data_shards()
    }

    /// Get the number of parity shards
    #[must_use]
    pub fn parity_shards(&self) -> usize {
        self.backend.parity_shards()
    }

    /// Get the total number of shards (data + parity)
    #[must_use]
    pub fn total_shards(&self) -> usize {
        self.backend.total_shards()
    }

    /// Encode data into k data shards and m parity shards
    ///
    /// The input data is split into k equal-sized chunks, then m parity
    /// shards are computed. Returns a vector of k+m shards.
    pub fn encode(&self, data: &[u8]) -> Result<Vec<Vec<u8>>> {
        let k = self.data_shards();

        // Pad to a multiple of k, minimum 64 bytes (reed-solomon-simd's floor)
        let shard_size = data.len().div_ceil(k).max(64);
        let padded_size = shard_size * k;

        let mut padded = vec![0u8; padded_size];
        padded[..data.len()].copy_from_slice(data);

        let data_shards: Vec<&[u8]> = (0..k)
            .map(|i| &padded[i * shard_size..(i + 1) * shard_size])
            .collect();

        let shards = self
            .backend
            .encode(&data_shards, shard_size)
            .map_err(|e| ErasureError::EncodingFailed(e.to_string()))?;

        Ok(shards)
    }

    /// Decode shards back to the original data
    ///
    /// Takes a slice of `Option<Vec<u8>>` where `None` represents a missing
    /// shard. At least k shards must be present to reconstruct the data.
    pub fn decode(&self, shards: &mut [Option<Vec<u8>>], original_size: usize) -> Result<Vec<u8>> {
        let k = self.data_shards();

        let available = shards.iter().filter(|s| s.is_some()).count();
        if available < k {
            return Err(ErasureError::InsufficientShards {
                available,
                required: k,
            }
            .into());
        }

        let shard_size = shards
            .iter()
            .find_map(|s| s.as_ref().map(|v| v.len()))
            .ok_or(ErasureError::ShardSizeMismatch)?;

        // Fast path: all data shards present, no reconstruction needed
        if shards[..k].iter().all(Option::is_some) {
            let mut result = Vec::with_capacity(k * shard_size);
            for shard in shards.iter().take(k).flatten() {
                result.extend_from_slice(shard);
            }
            result.truncate(original_size);
            return Ok(result);
        }

        let missing_indices: Vec<usize> = shards
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.is_none().then_some(i))
            .collect();

        let shard_refs: Vec<Option<&[u8]>> = shards
            .iter()
            .map(|s| s.as_ref().map(Vec::as_slice))
            .collect();

        let decoded = self
            .backend
            .decode(&shard_refs, shard_size, &missing_indices)
            .map_err(|e| ErasureError::DecodingFailed(e.to_string()))?;

        let mut output = Vec::with_capacity(k * shard_size);
        for shard in decoded.iter().take(k) {
            output.extend_from_slice(shard);
        }

        output.truncate(original_size);
        Ok(output)
    }

    /// Verify that shards are consistent by re-encoding and comparing parity.
    pub fn verify(&self, shards: &[Vec<u8>]) -> Result<bool> {
        if shards.len() != self.total_shards() {
            return Ok(false);
        }

        if let Some(first_len) = shards.first().map(Vec::len)
            && !shards.iter().all(|s| s.len() == first_len)
        {
            return Ok(false);
        }

        let shard_refs: Vec<&[u8]> = shards.iter().map(Vec::as_slice).collect();

        self.backend
            .verify(&shard_refs)
            .map_err(|e| ErasureError::EncodingFailed(e.to_string()).into())
    }
}

impl Default for ErasureCodec {
    fn default() -> Self {
        Self::new(ErasureConfig::default()).expect("default config is valid")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_roundtrip() {
        let codec = ErasureCodec::new(ErasureConfig::new(4, 2)).unwrap();
        let data = b"Hello, World! This is a test of erasure coding.";

        let shards = codec.encode(data).unwrap();
        assert_eq!(shards.len(), 6);

        let shard_size = shards[0].len();
        assert!(shards.iter().all(|s| s.len() == shard_size));

        let mut shard_opts: Vec<Option<Vec<u8>>> = shards.into_iter().map(Some).collect();
        let decoded = codec.decode(&mut shard_opts, data.len()).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn test_decode_with_missing_shards() {
        let codec = ErasureCodec::new(ErasureConfig::new(4, 2)).unwrap();
        let data = b"Hello, World! This is a test of erasure coding with recovery.";

        let shards = codec.encode(data).unwrap();

        let mut shard_opts: Vec<Option<Vec<u8>>> = shards.into_iter().map(Some).collect();
        shard_opts[1] = None; // one data shard missing
        shard_opts[4] = None; // one parity shard missing

        let decoded = codec.decode(&mut shard_opts, data.len()).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn test_insufficient_shards() {
        let codec = ErasureCodec::new(ErasureConfig::new(4, 2)).unwrap();

        let mut shards: Vec<Option<Vec<u8>>> = vec![
            Some(vec![0u8; 64]),
            Some(vec![0u8; 64]),
            Some(vec![0u8; 64]),
            None,
            None,
            None,
        ];

        let result = codec.decode(&mut shards, 64);
        assert!(result.is_err());
    }

    #[test]
    fn test_verify_roundtrip() {
        let codec = ErasureCodec::new(ErasureConfig::new(4, 2)).unwrap();
        let data = b"Data to verify with erasure coding.";

        let shards = codec.encode(data).unwrap();
        assert!(codec.verify(&shards).unwrap());

        let mut corrupted = shards.clone();
        corrupted[0][0] ^= 0xFF;
        assert!(!codec.verify(&corrupted).unwrap());
    }

    #[test]
    fn test_codec_helper_methods() {
        let codec = ErasureCodec::new(ErasureConfig::new(4, 2)).unwrap();
        assert_eq!(codec.data_shards(), 4);
        assert_eq!(codec.parity_shards(), 2);
        assert_eq!(codec.total_shards(), 6);
    }
}
