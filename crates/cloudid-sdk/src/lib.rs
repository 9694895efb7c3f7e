//! CloudID SDK
//!
//! Acquires OAuth 2.0 / OpenID Connect bearer tokens for a single identity:
//! cached tokens are reused, expiring ones are renewed silently with the
//! stored refresh token, and the user is sent through the browser sign in
//! only when nothing else works. Acquisitions are serialised machine-wide so
//! concurrent processes never race on the stored refresh token.
//!
//! # Usage
//!
//! ```rust,no_run
//! use cloudid_sdk::{Identity, TokenAcquisitionEngine};
//!
//! # async fn example() -> cloudid_sdk::AuthResult<()> {
//! let identity = Identity::new("my-client-id", "https://api.example.com")
//!     .with_domain("id.example.com");
//!
//! let engine = TokenAcquisitionEngine::builder(identity).build()?;
//! let token = engine.get_token().await?;
//! println!("Authorization: Bearer {token}");
//! # Ok(())
//! # }
//! ```

pub mod auth;

pub use auth::{
    Auth0Client, AuthError, AuthResult, AuthorizationOptions, BrowserAuthorizer, EngineBuilder,
    EngineOptions, FileTokenStore, Identity, InteractiveAuthorizer, KeyringTokenStore,
    MemoryTokenStore, NamedLock, OAuthClient, ProviderError, ProviderResult, Token,
    TokenAcquisitionEngine, TokenKey, TokenStore,
};
