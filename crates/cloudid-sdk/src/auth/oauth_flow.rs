//! OAuth 2.0 authorization code flow with PKCE against an Auth0-style provider
//!
//! Endpoints are derived from the provider domain (`/authorize` and
//! `/oauth/token`). No client secret is used; the flow relies on PKCE.

use super::error::{ProviderError, ProviderResult};
use super::provider::{AuthorizationStart, AuthorizationState, OAuthClient};
use super::types::{AuthorizationOptions, Identity, Token, TokenGrant, TokenKey};
use async_trait::async_trait;
use cloudid_common::{DEFAULT_REDIRECT_URI, OPENID_SCOPE};
use oauth2::{
    basic::{BasicClient, BasicErrorResponse, BasicTokenResponse},
    reqwest::async_http_client,
    AuthUrl, AuthorizationCode, ClientId, CsrfToken, PkceCodeChallenge, PkceCodeVerifier,
    RedirectUrl, RefreshToken, RequestTokenError, Scope, TokenResponse, TokenUrl,
};
use std::collections::HashMap;
use tracing::{debug, info, instrument};
use url::Url;

/// Error code the provider returns when the user declines the consent screen
const ACCESS_DENIED: &str = "access_denied";

/// OAuth client for a single application registration
#[derive(Debug, Clone)]
pub struct Auth0Client {
    client_id: String,
    auth_endpoint: Url,
    token_endpoint: Url,
    redirect_uri: Url,
}

impl Auth0Client {
    /// Client for the provider at `domain` with the default loopback redirect.
    ///
    /// A bare host name means `https://`.
    pub fn new(domain: &str, client_id: impl Into<String>) -> ProviderResult<Self> {
        let base = if domain.contains("://") {
            domain.trim_end_matches('/').to_string()
        } else {
            format!("https://{}", domain.trim_end_matches('/'))
        };

        let auth_endpoint = parse_url(&format!("{base}/authorize"), "authorization endpoint")?;
        let token_endpoint = parse_url(&format!("{base}/oauth/token"), "token endpoint")?;
        let redirect_uri = parse_url(DEFAULT_REDIRECT_URI, "redirect URI")?;
        Ok(Self::with_endpoints(
            client_id,
            auth_endpoint,
            token_endpoint,
            redirect_uri,
        ))
    }

    pub fn for_identity(identity: &Identity) -> ProviderResult<Self> {
        Self::new(identity.domain(), identity.client_id())
    }

    pub fn with_endpoints(
        client_id: impl Into<String>,
        auth_endpoint: Url,
        token_endpoint: Url,
        redirect_uri: Url,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            auth_endpoint,
            token_endpoint,
            redirect_uri,
        }
    }

    pub fn with_redirect_uri(mut self, redirect_uri: Url) -> Self {
        self.redirect_uri = redirect_uri;
        self
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn auth_endpoint(&self) -> &Url {
        &self.auth_endpoint
    }

    pub fn token_endpoint(&self) -> &Url {
        &self.token_endpoint
    }

    pub fn redirect_uri(&self) -> &Url {
        &self.redirect_uri
    }

    fn oauth_client(&self, redirect_uri: &Url) -> BasicClient {
        BasicClient::new(
            ClientId::new(self.client_id.clone()),
            None,
            AuthUrl::from_url(self.auth_endpoint.clone()),
            Some(TokenUrl::from_url(self.token_endpoint.clone())),
        )
        .set_redirect_uri(RedirectUrl::from_url(redirect_uri.clone()))
    }
}

#[async_trait]
impl OAuthClient for Auth0Client {
    #[instrument(skip(self, refresh_token, key), fields(key = %key))]
    async fn refresh(&self, refresh_token: &Token, key: &TokenKey) -> ProviderResult<TokenGrant> {
        debug!("Refreshing access token");

        let response = self
            .oauth_client(&self.redirect_uri)
            .exchange_refresh_token(&RefreshToken::new(refresh_token.raw().to_string()))
            .request_async(async_http_client)
            .await
            .map_err(map_token_error)?;

        info!("Token refresh completed successfully");
        // Keep the old refresh token if the provider did not rotate it.
        Ok(grant_from_response(&response, Some(refresh_token)))
    }

    async fn begin_authorization(
        &self,
        audience: &str,
        options: &AuthorizationOptions,
    ) -> ProviderResult<AuthorizationStart> {
        debug!("Building authorization URL");

        let client = self.oauth_client(&self.redirect_uri);
        let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();

        let mut request = client
            .authorize_url(CsrfToken::new_random)
            .set_pkce_challenge(pkce_challenge);

        for scope in OPENID_SCOPE.split_whitespace() {
            request = request.add_scope(Scope::new(scope.to_string()));
        }

        request = request.add_extra_param("audience", audience.to_string());

        if options.force_interactive {
            request = request.add_extra_param("prompt", "login");
        }

        let (start_url, csrf_token) = request.url();

        Ok(AuthorizationStart {
            start_url,
            state: AuthorizationState::new(
                csrf_token.secret().clone(),
                pkce_verifier,
                self.redirect_uri.clone(),
            ),
        })
    }

    #[instrument(skip(self, state, redirect_url, key), fields(key = %key))]
    async fn end_authorization(
        &self,
        state: &AuthorizationState,
        redirect_url: &Url,
        key: &TokenKey,
    ) -> ProviderResult<TokenGrant> {
        let params: HashMap<String, String> = redirect_url.query_pairs().into_owned().collect();

        // Error redirects count only when they answer our own request.
        let received_state = params.get("state").cloned().unwrap_or_default();
        if received_state != state.csrf_state() {
            return Err(ProviderError::StateMismatch {
                expected: state.csrf_state().to_string(),
                actual: received_state,
            });
        }

        if let Some(error) = params.get("error") {
            let description = params.get("error_description").cloned();
            if error == ACCESS_DENIED {
                return Err(ProviderError::Cancelled(
                    description.unwrap_or_else(|| "Access denied by user".to_string()),
                ));
            }
            return Err(ProviderError::Rejected {
                error: error.clone(),
                description,
            });
        }

        let code = params.get("code").ok_or_else(|| {
            ProviderError::InvalidResponse("Redirect carried no authorization code".to_string())
        })?;

        debug!("Exchanging authorization code for tokens");
        let response = self
            .oauth_client(state.redirect_uri())
            .exchange_code(AuthorizationCode::new(code.clone()))
            .set_pkce_verifier(PkceCodeVerifier::new(
                state.pkce_verifier().secret().clone(),
            ))
            .request_async(async_http_client)
            .await
            .map_err(map_token_error)?;

        info!("Token exchange completed successfully");
        Ok(grant_from_response(&response, None))
    }
}

fn parse_url(value: &str, what: &str) -> ProviderResult<Url> {
    Url::parse(value).map_err(|e| ProviderError::Config(format!("Invalid {what} '{value}': {e}")))
}

fn grant_from_response(response: &BasicTokenResponse, previous_refresh: Option<&Token>) -> TokenGrant {
    let access = response.access_token().secret().clone();
    let access_token = match response.expires_in() {
        Some(expires_in) => Token::expiring_in(access, expires_in),
        None => Token::new(access),
    };

    let refresh_token = response
        .refresh_token()
        .map(|rt| Token::new(rt.secret().clone()))
        .or_else(|| previous_refresh.cloned());

    TokenGrant {
        access_token,
        refresh_token,
    }
}

fn map_token_error<RE>(err: RequestTokenError<RE, BasicErrorResponse>) -> ProviderError
where
    RE: std::error::Error + 'static,
{
    match err {
        RequestTokenError::ServerResponse(response) => ProviderError::Rejected {
            error: response.error().to_string(),
            description: response.error_description().cloned(),
        },
        RequestTokenError::Request(e) => ProviderError::Network(e.to_string()),
        RequestTokenError::Parse(e, _) => ProviderError::InvalidResponse(e.to_string()),
        RequestTokenError::Other(message) => ProviderError::InvalidResponse(message),
    }
}
