//! Authentication-related types and data structures
//!
//! Tokens, the identity they are issued for, and the cache key derived from
//! that identity.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use cloudid_common::{normalize_domain, OPENID_SCOPE};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::error::{AuthError, AuthResult};

/// An opaque bearer credential.
///
/// The raw value is never printed by `Debug` and is wiped from memory when the
/// token is dropped. The expiry, when present, is the one reported by the
/// token endpoint alongside the token; the token value itself is never parsed.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct Token {
    #[serde(rename = "token")]
    raw: String,
    #[zeroize(skip)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expires_at: Option<DateTime<Utc>>,
}

impl Token {
    /// Wrap a raw token with no known expiry
    pub fn new(raw: impl Into<String>) -> Self {
        Self {
            raw: raw.into(),
            expires_at: None,
        }
    }

    /// Wrap a raw token with an absolute expiry
    pub fn with_expiry(raw: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            raw: raw.into(),
            expires_at: Some(expires_at),
        }
    }

    /// Wrap a raw token that expires `expires_in` from now
    pub fn expiring_in(raw: impl Into<String>, expires_in: Duration) -> Self {
        let expires_in = ChronoDuration::from_std(expires_in).unwrap_or(ChronoDuration::MAX);
        let expires_at = Utc::now()
            .checked_add_signed(expires_in)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self::with_expiry(raw, expires_at)
    }

    /// Give a token with no reported expiry one that ends `lifetime` from now
    pub fn or_expiring_in(self, lifetime: Duration) -> Self {
        if self.expires_at.is_some() {
            return self;
        }
        let raw = self.into_raw();
        Self::expiring_in(raw, lifetime)
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Move the raw value out, leaving an empty (and still zeroized) shell behind
    pub fn into_raw(mut self) -> String {
        std::mem::take(&mut self.raw)
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.expires_within(Duration::ZERO)
    }

    /// Whether the token expires within `margin` from now.
    ///
    /// Tokens without an expiry, such as refresh tokens, never expire here; the
    /// provider is the only judge of those.
    pub fn expires_within(&self, margin: Duration) -> bool {
        match self.expires_at {
            Some(expires_at) => {
                let margin = ChronoDuration::from_std(margin).unwrap_or(ChronoDuration::MAX);
                match Utc::now().checked_add_signed(margin) {
                    Some(threshold) => expires_at <= threshold,
                    None => true,
                }
            }
            None => false,
        }
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("raw", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl PartialEq for Token {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw && self.expires_at == other.expires_at
    }
}

impl Eq for Token {}

/// Cache identity of a token: `(client_id, scope, audience, partition)`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TokenKey {
    pub client_id: String,
    pub scope: String,
    pub audience: String,
    pub partition: String,
}

impl TokenKey {
    /// Stable string form used as the entry name by durable stores
    pub fn storage_id(&self) -> String {
        format!(
            "{}|{}|{}|{}",
            self.client_id, self.audience, self.scope, self.partition
        )
    }
}

impl fmt::Display for TokenKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.partition.is_empty() {
            write!(f, "{}@{}", self.client_id, self.audience)
        } else {
            write!(f, "{}@{}#{}", self.client_id, self.audience, self.partition)
        }
    }
}

/// The single logical identity a token engine acquires tokens for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    domain: String,
    client_id: String,
    audience: String,
    partition: String,
}

impl Identity {
    /// Identity on the default provider domain with the shared partition
    pub fn new(client_id: impl Into<String>, audience: impl Into<String>) -> Self {
        Self {
            domain: normalize_domain(""),
            client_id: client_id.into(),
            audience: audience.into(),
            partition: String::new(),
        }
    }

    /// Provider host; empty falls back to the default and trailing `/` is dropped
    pub fn with_domain(mut self, domain: impl AsRef<str>) -> Self {
        self.domain = normalize_domain(domain.as_ref());
        self
    }

    /// Cache sub-namespace; empty means shared
    pub fn with_partition(mut self, partition: impl Into<String>) -> Self {
        self.partition = partition.into();
        self
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn audience(&self) -> &str {
        &self.audience
    }

    /// Always the standard OpenID scope set
    pub fn scope(&self) -> &'static str {
        OPENID_SCOPE
    }

    pub fn partition(&self) -> &str {
        &self.partition
    }

    pub fn key(&self) -> TokenKey {
        TokenKey {
            client_id: self.client_id.clone(),
            scope: self.scope().to_string(),
            audience: self.audience.clone(),
            partition: self.partition.clone(),
        }
    }

    /// Client id and audience are mandatory before any acquisition
    pub fn validate(&self) -> AuthResult<()> {
        if self.client_id.trim().is_empty() || self.audience.trim().is_empty() {
            return Err(AuthError::Configuration(
                "Must provide client id and audience".to_string(),
            ));
        }
        Ok(())
    }
}

/// Options for one interactive authorization
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AuthorizationOptions {
    /// Ask the provider to prompt even if it holds a session for the user
    pub force_interactive: bool,
}

/// Tokens issued by one refresh or code exchange
#[derive(Debug, Clone)]
pub struct TokenGrant {
    pub access_token: Token,
    /// Absent when the provider did not issue (or rotate) a refresh token
    pub refresh_token: Option<Token>,
}
