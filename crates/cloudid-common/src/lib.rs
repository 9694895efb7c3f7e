//! Core shared types and plumbing for the CloudID token tools
//!
//! Holds the compiled-in identity provider constants, the logging setup shared
//! by every binary, and the configuration loading contract.

pub mod config;
pub mod constants;
pub mod logging;

pub use config::{ConfigLoader, ConfigurationError};
pub use constants::*;
