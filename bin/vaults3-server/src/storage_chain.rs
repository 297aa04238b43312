//! Assembles the configured storage engine chain (spec §4.1-§4.5):
//! filesystem backend at the bottom, optionally wrapped by erasure coding,
//! then encryption, then compression — each decorator sees genuine
//! plaintext from the caller above it, so whichever one is outermost is
//! the one whose etag the handler reports back (DESIGN.md's Open Question
//! #3).

use std::sync::Arc;

use vaults3_common::config::StorageConfig;
use vaults3_kms::{CachedKeyProvider, LocalHexProvider};
use vaults3_storage::compression::CompressionEngine;
use vaults3_storage::encryption::{KmsEncryptionEngine, StaticKeyEncryptionEngine};
use vaults3_storage::erasure::ErasureEngine;
use vaults3_storage::fs::FsEngine;
use vaults3_storage::StorageEngine;

fn static_key() -> [u8; 32] {
    match std::env::var("VAULTS3_ENCRYPTION_KEY") {
        Ok(hex_key) => {
            let bytes = hex::decode(&hex_key).unwrap_or_default();
            bytes.try_into().unwrap_or([0u8; 32])
        }
        Err(_) => [0u8; 32],
    }
}

/// The assembled chain, plus the concrete erasure decorator (if enabled) so
/// the healer can drive `.ec/` reconstruction directly instead of through
/// the `dyn StorageEngine` seam that hides its `list_ec_keys`/`shard_health`
/// methods.
pub struct Chain {
    pub engine: Arc<dyn StorageEngine>,
    pub erasure: Option<Arc<ErasureEngine>>,
}

#[must_use]
pub fn build(config: &StorageConfig, data_dir: &std::path::Path) -> Chain {
    let primary: Arc<dyn StorageEngine> = Arc::new(FsEngine::new(data_dir.join("data")));

    let mut erasure = None;
    let mut engine: Arc<dyn StorageEngine> = primary;
    if config.erasure_enabled {
        let mut backends = vec![engine];
        for aux in &config.aux_dirs {
            backends.push(Arc::new(FsEngine::new(aux.clone())));
        }
        let erasure_engine = Arc::new(ErasureEngine::new(backends, config.default_ec, config.ec_block_size));
        erasure = Some(erasure_engine.clone());
        engine = erasure_engine;
    }

    if config.encryption_enabled {
        engine = if config.kms_enabled {
            let provider = Arc::new(CachedKeyProvider::new(Arc::new(
                LocalHexProvider::from_hex(&hex::encode(static_key()))
                    .expect("static key hex is always 64 valid hex chars"),
            )));
            Arc::new(KmsEncryptionEngine::new(engine, provider, "vaults3-default"))
        } else {
            Arc::new(StaticKeyEncryptionEngine::new(engine, static_key()))
        };
    }

    if config.compression_enabled {
        engine = Arc::new(CompressionEngine::new(engine));
    }

    Chain { engine, erasure }
}
