//! Remote key provider backed by a Vault-compatible transit HTTP API

use crate::error::KmsError;
use crate::provider::KeyProvider;
use async_trait::async_trait;
use base64::Engine as _;
use serde::Deserialize;
use std::time::Duration;

/// Configuration for a Vault transit-backed `KeyProvider`
#[derive(Clone, Debug)]
pub struct VaultHttpConfig {
    /// Base URL of the Vault server, e.g. "https://vault.internal:8200"
    pub url: String,
    /// Token used to authenticate to Vault's transit engine
    pub token: String,
    /// Request timeout
    pub timeout: Duration,
}

#[derive(Deserialize)]
struct DataKeyResponse {
    data: DataKeyData,
}

#[derive(Deserialize)]
struct DataKeyData {
    plaintext: String,
}

/// `KeyProvider` backed by Vault's transit `datakey/plaintext` endpoint.
pub struct VaultHttpProvider {
    config: VaultHttpConfig,
    http_client: reqwest::Client,
}

impl VaultHttpProvider {
    pub fn new(config: VaultHttpConfig) -> Result<Self, KmsError> {
        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| KmsError::Configuration(e.to_string()))?;

        Ok(Self {
            config,
            http_client,
        })
    }
}

#[async_trait]
impl KeyProvider for VaultHttpProvider {
    async fn get_key(&self, key_name: &str) -> Result<[u8; 32], KmsError> {
        let url = format!(
            "{}/v1/transit/datakey/plaintext/{}",
            self.config.url, key_name
        );

        let response = self
            .http_client
            .get(&url)
            .header("X-Vault-Token", &self.config.token)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    KmsError::Timeout
                } else {
                    KmsError::Unavailable(e.to_string())
                }
            })?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(KmsError::KeyNotFound(key_name.to_string()));
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(KmsError::Unavailable(format!(
                "vault returned {status}: {body}"
            )));
        }

        let parsed: DataKeyResponse = response
            .json()
            .await
            .map_err(|e| KmsError::Unavailable(e.to_string()))?;

        let raw = base64::engine::general_purpose::STANDARD
            .decode(parsed.data.plaintext)
            .map_err(|e| KmsError::InvalidKey(e.to_string()))?;

        raw.try_into()
            .map_err(|_| KmsError::InvalidKey("key must be 32 bytes".into()))
    }

    async fn rotate(&self, key_name: &str) -> Result<(), KmsError> {
        let url = format!("{}/v1/transit/keys/{}/rotate", self.config.url, key_name);

        let response = self
            .http_client
            .post(&url)
            .header("X-Vault-Token", &self.config.token)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    KmsError::Timeout
                } else {
                    KmsError::Unavailable(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(KmsError::Unavailable(format!(
                "vault rotate returned {status}"
            )));
        }

        Ok(())
    }
}
