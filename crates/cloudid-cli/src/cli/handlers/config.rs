//! Configuration command handlers

use crate::cli::commands::ConfigAction;
use crate::config::CloudIdConfig;
use crate::error::Result;
use crate::output::{compress_path, print_info};
use cloudid_common::config::to_toml;
use std::path::Path;

/// Handle `config` subcommands
pub fn handle_config(
    action: ConfigAction,
    config: &CloudIdConfig,
    config_path: Option<&Path>,
) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let path = match config_path {
                Some(path) => path.to_path_buf(),
                None => CloudIdConfig::default_path()?,
            };
            if path.exists() {
                print_info(&format!("Configuration file: {}", compress_path(&path)));
            } else {
                print_info(&format!(
                    "No configuration file at {}, showing defaults and environment",
                    compress_path(&path)
                ));
            }
            print!("{}", to_toml(config)?);
        }
        ConfigAction::Example => {
            print!("{}", to_toml(&CloudIdConfig::default())?);
        }
    }
    Ok(())
}
