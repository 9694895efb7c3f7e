use clap::Subcommand;

/// Main CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print a valid access token, signing in if necessary
    Token {
        /// Prefix the token with "Bearer ", ready for an Authorization header
        #[arg(long)]
        bearer: bool,
    },

    /// Sign in (prompts in the browser unless configured silent)
    Login {
        /// Always prompt, even if a silent renewal would succeed
        #[arg(long, conflicts_with = "silent")]
        force: bool,

        /// Try silent renewal first and prompt only if it fails
        #[arg(long)]
        silent: bool,
    },

    /// Sign out of this session; stored refresh tokens are kept
    Logout,

    /// Manage CLI configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Configuration subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show the effective configuration
    Show,

    /// Print an example configuration file
    Example,
}
