//! # CloudID CLI
//!
//! Command-line front end for the CloudID token acquisition engine:
//! - `cloudid token` prints a valid access token, signing in when needed
//! - `cloudid login` / `cloudid logout` manage the sign in explicitly
//! - `cloudid config` inspects the effective configuration

pub mod cli;
pub mod config;
pub mod error;
pub mod output;

pub use cli::*;
pub use error::*;
