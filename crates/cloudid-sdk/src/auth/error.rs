//! Error taxonomy and fault classification
//!
//! Capabilities (stores, lock, OAuth client, authorizer) report
//! [`ProviderError`]s. The engine classifies each fault explicitly and only
//! ever hands callers an [`AuthError`].

use thiserror::Error;

/// Result type for engine operations
pub type AuthResult<T> = Result<T, AuthError>;

/// Result type for capability calls
pub type ProviderResult<T> = Result<T, ProviderError>;

/// What a caller of the engine can observe
#[derive(Debug, Error)]
pub enum AuthError {
    /// Required identity fields are missing; never retried
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The interactive flow was cancelled by the user, a timeout or `cancel()`
    #[error("Authentication cancelled: {0}")]
    Cancelled(String),

    /// Every attempt failed until the logon deadline passed
    #[error("Authentication failed after {attempts} attempt(s): {source}")]
    Transient {
        attempts: u32,
        #[source]
        source: ProviderError,
    },
}

impl AuthError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, AuthError::Cancelled(_))
    }
}

/// A fault reported by a capability the engine depends on
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// The interactive flow did not complete because it was cancelled
    #[error("Authorization cancelled: {0}")]
    Cancelled(String),

    #[error("Network error: {0}")]
    Network(String),

    /// The provider answered with an OAuth error response
    #[error("Provider rejected the request: {error}{}", .description.as_deref().map(|d| format!(" ({d})")).unwrap_or_default())]
    Rejected {
        error: String,
        description: Option<String>,
    },

    #[error("Invalid OAuth response: {0}")]
    InvalidResponse(String),

    /// State parameter mismatch (CSRF protection)
    #[error("State mismatch: expected {expected}, got {actual}")]
    StateMismatch { expected: String, actual: String },

    #[error("Token storage error: {0}")]
    Storage(String),

    #[error("Process lock error: {0}")]
    Lock(String),

    #[error("Browser error: {0}")]
    Browser(String),

    /// Client-side configuration the capability could not use (bad URL, ...)
    #[error("Invalid client configuration: {0}")]
    Config(String),

    /// Several faults reported together; the first cause is the meaningful one
    #[error("{message}")]
    Batch {
        message: String,
        causes: Vec<ProviderError>,
    },
}

impl ProviderError {
    /// Unwrap batched faults down to the first cause.
    ///
    /// A batch without causes is its own root.
    pub fn root_cause(self) -> ProviderError {
        match self {
            ProviderError::Batch { message, causes } => {
                let mut causes = causes.into_iter();
                match causes.next() {
                    Some(first) => first.root_cause(),
                    None => ProviderError::Batch {
                        message,
                        causes: Vec::new(),
                    },
                }
            }
            other => other,
        }
    }
}

impl From<std::io::Error> for ProviderError {
    fn from(err: std::io::Error) -> Self {
        ProviderError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(err: serde_json::Error) -> Self {
        ProviderError::Storage(format!("Serialization error: {err}"))
    }
}

/// How the retry loop treats a fault
#[derive(Debug)]
pub enum FaultClass {
    /// Abort the acquisition, no retry
    Cancelled(String),
    /// Retry until the logon deadline
    Transient(ProviderError),
}

/// Classify a capability fault after unwrapping it to its root cause.
///
/// Only cancellation stops the retry loop. Everything else, including faults
/// that will never succeed such as an unknown client id, is retried until the
/// deadline.
pub fn classify(fault: ProviderError) -> FaultClass {
    match fault.root_cause() {
        ProviderError::Cancelled(reason) => FaultClass::Cancelled(reason),
        other => FaultClass::Transient(other),
    }
}
