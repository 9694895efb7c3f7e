use crate::cli::{commands::Commands, handlers};
use crate::config::CloudIdConfig;
use crate::error::Result;
use clap::{Args as ClapArgs, Parser};
use clap_verbosity_flag::{Verbosity, WarnLevel};
use cloudid_common::ConfigLoader;
use std::path::PathBuf;

/// CloudID CLI - OAuth bearer tokens for command-line tools
#[derive(Parser, Debug)]
#[command(
    name = "cloudid",
    author = "CloudID Team",
    version,
    about = "CloudID CLI - OAuth bearer tokens for command-line tools",
    long_about = "Acquire CloudID access tokens from the command line.

Tokens are cached and renewed silently with the stored refresh token; the
browser sign in only opens when nothing else works.

QUICK START:
  cloudid login                     # Sign in through the browser
  cloudid token                     # Print a valid access token
  cloudid token --bearer            # Print \"Bearer <token>\"

CONFIGURATION:
  cloudid config example            # Print a config template
  cloudid config show               # Show effective configuration"
)]
pub struct Args {
    /// Configuration file path (defaults to the platform config directory)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub identity: IdentityArgs,

    #[command(flatten)]
    pub verbosity: Verbosity<WarnLevel>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Per-invocation overrides of the configured identity
#[derive(ClapArgs, Debug, Default, Clone)]
pub struct IdentityArgs {
    /// Identity provider domain
    #[arg(long, global = true)]
    pub domain: Option<String>,

    /// OAuth client id
    #[arg(long, global = true)]
    pub client_id: Option<String>,

    /// API audience the token is issued for
    #[arg(long, global = true)]
    pub audience: Option<String>,

    /// Token cache partition
    #[arg(long, global = true)]
    pub partition: Option<String>,
}

impl IdentityArgs {
    pub fn apply(&self, config: &mut CloudIdConfig) {
        if let Some(domain) = &self.domain {
            config.auth.domain = domain.clone();
        }
        if let Some(client_id) = &self.client_id {
            config.auth.client_id = client_id.clone();
        }
        if let Some(audience) = &self.audience {
            config.auth.audience = audience.clone();
        }
        if let Some(partition) = &self.partition {
            config.auth.partition = partition.clone();
        }
    }
}

impl Args {
    /// Execute the CLI command
    pub async fn run(self) -> Result<()> {
        let mut config = CloudIdConfig::load(self.config.clone())?;
        self.identity.apply(&mut config);

        match self.command {
            Commands::Token { bearer } => handlers::auth::handle_token(&config, bearer).await,
            Commands::Login { force, silent } => {
                handlers::auth::handle_login(&config, force, silent).await
            }
            Commands::Logout => handlers::auth::handle_logout(&config),
            Commands::Config { action } => {
                handlers::config::handle_config(action, &config, self.config.as_deref())
            }
        }
    }
}
