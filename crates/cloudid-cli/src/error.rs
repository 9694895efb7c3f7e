//! Error types for the CloudID CLI

use color_eyre::eyre::{eyre, Report};
use thiserror::Error;

/// CLI error type with minimal variants
#[derive(Debug, Error)]
pub enum CliError {
    /// Configuration file or environment issues
    #[error("Configuration error: {0}")]
    Config(#[from] cloudid_common::ConfigurationError),

    /// Token acquisition failures
    #[error(transparent)]
    Auth(#[from] cloudid_sdk::AuthError),

    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    /// Everything else (using color-eyre's Report for rich errors)
    #[error(transparent)]
    Internal(#[from] Report),
}

impl CliError {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    pub fn internal(message: impl std::fmt::Display) -> Self {
        Self::Internal(eyre!("{message}"))
    }

    /// Process exit code for this error; 130 mirrors an interrupted command
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Auth(cloudid_sdk::AuthError::Cancelled(_)) => 130,
            CliError::Config(_)
            | CliError::InvalidArgument { .. }
            | CliError::Auth(cloudid_sdk::AuthError::Configuration(_)) => 2,
            _ => 1,
        }
    }
}

/// Result type alias for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;
