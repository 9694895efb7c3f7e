use super::TokenStore;
use crate::auth::error::ProviderResult;
use crate::auth::types::{Token, TokenKey};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Process-lifetime token cache
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    tokens: RwLock<HashMap<TokenKey, Token>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.tokens.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tokens.read().await.is_empty()
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn get(&self, key: &TokenKey) -> ProviderResult<Option<Token>> {
        Ok(self.tokens.read().await.get(key).cloned())
    }

    async fn put(&self, key: &TokenKey, token: &Token) -> ProviderResult<()> {
        self.tokens.write().await.insert(key.clone(), token.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
