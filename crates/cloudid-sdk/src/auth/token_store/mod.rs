//! Token storage contract and implementations
//!
//! Two roles share one contract:
//! - the volatile access-token cache ([`MemoryTokenStore`]), process-local
//! - the durable refresh-token cache ([`FileTokenStore`], [`KeyringTokenStore`]),
//!   shared by every local process of the same user and only touched while the
//!   process lock is held

mod file;
mod memory;
mod os_keyring;

pub use file::FileTokenStore;
pub use memory::MemoryTokenStore;
pub use os_keyring::KeyringTokenStore;

use super::error::ProviderResult;
use super::types::{Token, TokenKey};
use async_trait::async_trait;

/// Key-value store for tokens
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Token stored under `key`, if any
    async fn get(&self, key: &TokenKey) -> ProviderResult<Option<Token>>;

    /// Store `token` under `key`, replacing any previous value
    async fn put(&self, key: &TokenKey, token: &Token) -> ProviderResult<()>;

    /// Backend name for logging
    fn name(&self) -> &str;
}
