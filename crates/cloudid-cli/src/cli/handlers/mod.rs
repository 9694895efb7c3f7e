//! Command handlers for the CloudID CLI

pub mod auth;
pub mod config;
