//! Capabilities the token engine is built on
//!
//! The engine never talks HTTP or opens a browser itself. It drives an
//! [`OAuthClient`] for token-endpoint work and an [`InteractiveAuthorizer`]
//! for the user-facing step of the authorization code flow.

use super::error::ProviderResult;
use super::types::{AuthorizationOptions, Token, TokenGrant, TokenKey};
use async_trait::async_trait;
use oauth2::PkceCodeVerifier;
use std::fmt;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Client-side secrets of one in-flight authorization code flow
pub struct AuthorizationState {
    csrf_state: String,
    pkce_verifier: PkceCodeVerifier,
    redirect_uri: Url,
}

impl AuthorizationState {
    pub fn new(csrf_state: String, pkce_verifier: PkceCodeVerifier, redirect_uri: Url) -> Self {
        Self {
            csrf_state,
            pkce_verifier,
            redirect_uri,
        }
    }

    pub fn csrf_state(&self) -> &str {
        &self.csrf_state
    }

    pub fn pkce_verifier(&self) -> &PkceCodeVerifier {
        &self.pkce_verifier
    }

    pub fn redirect_uri(&self) -> &Url {
        &self.redirect_uri
    }
}

impl fmt::Debug for AuthorizationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorizationState")
            .field("csrf_state", &self.csrf_state)
            .field("pkce_verifier", &"<redacted>")
            .field("redirect_uri", &self.redirect_uri.as_str())
            .finish()
    }
}

/// Where to send the user, and what to remember until they come back
#[derive(Debug)]
pub struct AuthorizationStart {
    pub start_url: Url,
    pub state: AuthorizationState,
}

/// Token-endpoint operations against the identity provider
#[async_trait]
pub trait OAuthClient: Send + Sync {
    /// Exchange a refresh token for a new access token
    async fn refresh(&self, refresh_token: &Token, key: &TokenKey) -> ProviderResult<TokenGrant>;

    /// Build the authorization URL for `audience`
    async fn begin_authorization(
        &self,
        audience: &str,
        options: &AuthorizationOptions,
    ) -> ProviderResult<AuthorizationStart>;

    /// Complete the flow from the redirect the browser landed on
    async fn end_authorization(
        &self,
        state: &AuthorizationState,
        redirect_url: &Url,
        key: &TokenKey,
    ) -> ProviderResult<TokenGrant>;
}

/// The user-facing leg of the authorization code flow
#[async_trait]
pub trait InteractiveAuthorizer: Send + Sync {
    /// Show `start_url` to the user and return the URL the provider redirected
    /// back to.
    ///
    /// Must return [`ProviderError::Cancelled`](super::ProviderError::Cancelled)
    /// when the user abandons the flow or `cancel` fires.
    async fn navigate(&self, start_url: &Url, cancel: CancellationToken) -> ProviderResult<Url>;
}
