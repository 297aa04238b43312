//! VaultS3 Erasure Coding - Reed-Solomon MDS erasure coding
//!
//! This crate provides Maximum Distance Separable (Reed-Solomon) erasure
//! coding over a pluggable backend trait, so the SIMD implementation can be
//! swapped without touching callers.
//!
//! # Example
//!
//! ```
//! use vaults3_erasure::ErasureCodec;
//! use vaults3_common::ErasureConfig;
//!
//! let codec = ErasureCodec::new(ErasureConfig::new(4, 2)).unwrap();
//! let data = b"Hello, World!";
//! let shards = codec.encode(data).unwrap();
//! ```

pub mod backend;
pub mod codec;

pub use codec::{ErasureCodec, ErasureError};

pub use backend::{BackendCapabilities, ErasureBackend, RustSimdBackend};

/// Prelude for common imports
pub mod prelude {
    pub use super::{ErasureBackend, ErasureCodec, ErasureError};
}
