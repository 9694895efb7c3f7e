//! Authentication module for the CloudID SDK
//!
//! This module provides the token acquisition engine and the capabilities it
//! is built on:
//! - Volatile and durable token stores
//! - Machine-wide process lock around the durable store
//! - OAuth 2.0 authorization code flow with PKCE
//! - Local HTTP callback server for browser sign in

pub mod callback_server;
pub mod engine;
pub mod error;
pub mod lock;
pub mod oauth_flow;
pub mod provider;
pub mod token_store;
pub mod types;

// Re-export commonly used types
pub use callback_server::BrowserAuthorizer;
pub use engine::{EngineBuilder, EngineOptions, TokenAcquisitionEngine};
pub use error::{AuthError, AuthResult, ProviderError, ProviderResult};
pub use lock::{NamedLock, NamedLockGuard};
pub use oauth_flow::Auth0Client;
pub use provider::{AuthorizationStart, AuthorizationState, InteractiveAuthorizer, OAuthClient};
pub use token_store::{FileTokenStore, KeyringTokenStore, MemoryTokenStore, TokenStore};
pub use types::{AuthorizationOptions, Identity, Token, TokenGrant, TokenKey};
