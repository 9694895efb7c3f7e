//! Authentication command handlers

use crate::config::{CloudIdConfig, StorageBackend};
use crate::error::Result;
use crate::output::{format_token, print_info, print_success};
use cloudid_sdk::{
    Auth0Client, AuthError, BrowserAuthorizer, FileTokenStore, KeyringTokenStore, NamedLock,
    TokenAcquisitionEngine, TokenStore,
};
use console::style;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;
use url::Url;

/// Build the engine described by `config`
pub fn build_engine(config: &CloudIdConfig) -> Result<TokenAcquisitionEngine> {
    let identity = config.identity();

    let oauth = Auth0Client::for_identity(&identity)
        .map_err(|e| AuthError::Configuration(e.to_string()))?
        .with_redirect_uri(config.redirect_uri()?);

    let refresh_tokens: Arc<dyn TokenStore> = match config.storage.backend {
        StorageBackend::File => Arc::new(FileTokenStore::in_dir(config.storage.data_dir()?)),
        StorageBackend::Keyring => Arc::new(KeyringTokenStore::new()),
    };

    let authorizer = BrowserAuthorizer::new()
        .with_timeout(config.callback_timeout())
        .with_opener(|url: &Url| {
            print_info("Opening browser for sign in...");
            print_info("Browser didn't open? Use the URL below to sign in:");
            eprintln!("{}", style(url.as_str()).dim());
            webbrowser::open(url.as_str())
        });

    debug!(
        "Using {} refresh token store and lock {}",
        refresh_tokens.name(),
        config.storage.lock_name
    );

    let engine = TokenAcquisitionEngine::builder(identity)
        .options(config.engine_options())
        .refresh_token_store(refresh_tokens)
        .lock(NamedLock::new(&config.storage.lock_name))
        .oauth_client(Arc::new(oauth))
        .authorizer(Arc::new(authorizer))
        .build()?;

    Ok(engine)
}

/// Run `operation` with Ctrl-C wired to cancel the browser sign in
async fn interruptible<F: Future>(engine: &Arc<TokenAcquisitionEngine>, operation: F) -> F::Output {
    let canceller = Arc::clone(engine);
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() && !canceller.cancel() {
            // Nothing interactive to cancel; stop like a plain Ctrl-C would.
            std::process::exit(130);
        }
    });

    let output = operation.await;
    interrupt.abort();
    output
}

/// Handle `token`: print a valid access token on stdout
pub async fn handle_token(config: &CloudIdConfig, bearer: bool) -> Result<()> {
    let engine = Arc::new(build_engine(config)?);
    let token = interruptible(&engine, engine.get_token()).await?;
    println!("{}", format_token(&token, bearer));
    Ok(())
}

/// Handle `login`
pub async fn handle_login(config: &CloudIdConfig, force: bool, silent: bool) -> Result<()> {
    let mut config = config.clone();
    if force {
        config.auth.is_silent = false;
    } else if silent {
        config.auth.is_silent = true;
    }

    let engine = Arc::new(build_engine(&config)?);
    interruptible(&engine, engine.logon()).await?;

    print_success(&format!("Signed in to {}", engine.identity().domain()));
    Ok(())
}

/// Handle `logout`
pub fn handle_logout(config: &CloudIdConfig) -> Result<()> {
    let engine = build_engine(config)?;
    engine.logoff();

    print_success("Signed out");
    print_info("The stored refresh token is kept; use `cloudid login --force` to sign in again.");
    Ok(())
}
