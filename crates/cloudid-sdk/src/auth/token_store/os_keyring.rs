//! Durable token store backed by the OS credential store
//!
//! - macOS: Keychain
//! - Linux: kernel keyutils / Secret Service
//! - Windows: Credential Manager
//!
//! One credential per [`TokenKey`], under service `cloudid`, holding the token
//! serialized as JSON.

use super::TokenStore;
use crate::auth::error::{ProviderError, ProviderResult};
use crate::auth::types::{Token, TokenKey};
use async_trait::async_trait;
use keyring::Entry;
use tracing::instrument;

const SERVICE_NAME: &str = "cloudid";

#[derive(Debug, Clone)]
pub struct KeyringTokenStore {
    service: String,
}

impl Default for KeyringTokenStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyringTokenStore {
    pub fn new() -> Self {
        Self::with_service(SERVICE_NAME)
    }

    /// Use a custom service name, e.g. to keep test credentials apart
    pub fn with_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    fn entry(&self, key: &TokenKey) -> ProviderResult<Entry> {
        Entry::new(&self.service, &key.storage_id())
            .map_err(|e| ProviderError::Storage(format!("Failed to create keyring entry: {e}")))
    }
}

#[async_trait]
impl TokenStore for KeyringTokenStore {
    #[instrument(skip(self, key), fields(key = %key))]
    async fn get(&self, key: &TokenKey) -> ProviderResult<Option<Token>> {
        let entry = self.entry(key)?;

        let result = tokio::task::spawn_blocking(move || entry.get_password())
            .await
            .map_err(|e| ProviderError::Storage(format!("Keyring task failed: {e}")))?;

        match result {
            Ok(secret) => {
                let token: Token = serde_json::from_str(&secret).map_err(|e| {
                    ProviderError::Storage(format!("Failed to parse token from keyring: {e}"))
                })?;
                Ok(Some(token))
            }
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(ProviderError::Storage(format!("Keyring read failed: {e}"))),
        }
    }

    #[instrument(skip(self, key, token), fields(key = %key))]
    async fn put(&self, key: &TokenKey, token: &Token) -> ProviderResult<()> {
        let entry = self.entry(key)?;
        let secret = serde_json::to_string(token)?;

        tokio::task::spawn_blocking(move || entry.set_password(&secret))
            .await
            .map_err(|e| ProviderError::Storage(format!("Keyring task failed: {e}")))?
            .map_err(|e| ProviderError::Storage(format!("Keyring write failed: {e}")))
    }

    fn name(&self) -> &str {
        "keyring"
    }
}
