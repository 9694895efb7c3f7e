//! Main entry point for the CloudID CLI

use clap::{CommandFactory, Parser};
use clap_complete::env::CompleteEnv;
use cloudid_cli::{cli::Args, output::print_error};
use color_eyre::eyre::{eyre, Result};

#[tokio::main]
async fn main() -> Result<()> {
    // Handle shell completions first (must be before argument parsing)
    CompleteEnv::with_factory(Args::command).complete();

    let args = Args::parse();

    color_eyre::config::HookBuilder::default()
        .display_location_section(false)
        .display_env_section(false)
        .install()?;

    let default_filter = format!("{}=warn,cloudid_sdk=warn", env!("CARGO_CRATE_NAME"));
    cloudid_common::logging::init_logging(&args.verbosity, &default_filter)
        .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;

    if let Err(e) = args.run().await {
        print_error(&e.to_string());
        std::process::exit(e.exit_code());
    }
    Ok(())
}
