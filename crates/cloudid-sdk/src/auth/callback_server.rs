//! Browser-based interactive authorizer
//!
//! Opens the system browser on the authorization URL and runs a temporary
//! loopback HTTP server on the redirect URI to catch the provider's redirect.

use super::error::{ProviderError, ProviderResult};
use super::provider::InteractiveAuthorizer;
use async_trait::async_trait;
use axum::{
    extract::{OriginalUri, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse},
    routing::get,
    Router,
};
use cloudid_common::CALLBACK_TIMEOUT;
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

/// Opens a URL for the user; the system browser unless overridden
pub type BrowserOpener = Arc<dyn Fn(&Url) -> io::Result<()> + Send + Sync>;

/// Callback state shared between the server and the waiting flow
struct CallbackState {
    sender: mpsc::Sender<Url>,
    redirect_base: Url,
    /// CSRF state of the pending request; redirects carrying another are dropped
    expected_state: Option<String>,
}

/// Interactive authorizer that signs the user in through the system browser
#[derive(Clone)]
pub struct BrowserAuthorizer {
    timeout: Duration,
    opener: BrowserOpener,
}

impl Default for BrowserAuthorizer {
    fn default() -> Self {
        Self::new()
    }
}

impl BrowserAuthorizer {
    pub fn new() -> Self {
        Self {
            timeout: CALLBACK_TIMEOUT,
            opener: Arc::new(|url: &Url| webbrowser::open(url.as_str())),
        }
    }

    /// How long to wait for the user before treating the flow as abandoned
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_opener<F>(mut self, opener: F) -> Self
    where
        F: Fn(&Url) -> io::Result<()> + Send + Sync + 'static,
    {
        self.opener = Arc::new(opener);
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl std::fmt::Debug for BrowserAuthorizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrowserAuthorizer")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Aborts the callback server when the flow is over, however it ends
struct ServerGuard(JoinHandle<io::Result<()>>);

impl Drop for ServerGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

#[async_trait]
impl InteractiveAuthorizer for BrowserAuthorizer {
    async fn navigate(&self, start_url: &Url, cancel: CancellationToken) -> ProviderResult<Url> {
        let redirect = redirect_target(start_url)?;
        let port = redirect.port_or_known_default().ok_or_else(|| {
            ProviderError::Config(format!("Redirect URI '{redirect}' has no port"))
        })?;

        let (tx, mut rx) = mpsc::channel(1);
        let state = Arc::new(CallbackState {
            sender: tx,
            redirect_base: redirect.clone(),
            expected_state: query_param(start_url, "state"),
        });

        let app = Router::new()
            .route(redirect.path(), get(handle_callback))
            .with_state(state);

        let addr = SocketAddr::from(([127, 0, 0, 1], port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            ProviderError::Browser(format!("Failed to bind callback server to {addr}: {e}"))
        })?;
        debug!("Callback server listening on {}", addr);

        let _server = ServerGuard(tokio::spawn(async move { axum::serve(listener, app).await }));

        info!("Opening browser for sign in");
        if let Err(e) = (self.opener)(start_url) {
            warn!(
                "Failed to open browser ({}). Use this URL to sign in: {}",
                e, start_url
            );
        }

        tokio::select! {
            _ = cancel.cancelled() => {
                Err(ProviderError::Cancelled("Sign in was cancelled".to_string()))
            }
            _ = tokio::time::sleep(self.timeout) => {
                Err(ProviderError::Cancelled(format!(
                    "No sign in response within {} seconds",
                    self.timeout.as_secs()
                )))
            }
            received = rx.recv() => {
                received.ok_or_else(|| ProviderError::Browser("Callback server stopped".to_string()))
            }
        }
    }
}

/// The loopback address the provider will redirect to, taken from the start URL
fn redirect_target(start_url: &Url) -> ProviderResult<Url> {
    let redirect = query_param(start_url, "redirect_uri").ok_or_else(|| {
        ProviderError::Config("Authorization URL carries no redirect_uri".to_string())
    })?;

    let redirect = Url::parse(&redirect)
        .map_err(|e| ProviderError::Config(format!("Invalid redirect URI '{redirect}': {e}")))?;

    if redirect.scheme() != "http" {
        return Err(ProviderError::Config(format!(
            "Redirect URI '{redirect}' must use http on the loopback interface"
        )));
    }

    Ok(redirect)
}

fn query_param(url: &Url, name: &str) -> Option<String> {
    url.query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

/// Axum handler for the provider redirect
async fn handle_callback(
    State(state): State<Arc<CallbackState>>,
    OriginalUri(uri): OriginalUri,
) -> impl IntoResponse {
    let mut redirect = state.redirect_base.clone();
    redirect.set_query(uri.query());

    let params: HashMap<String, String> = redirect.query_pairs().into_owned().collect();

    let state_matches = match &state.expected_state {
        Some(expected) => params.get("state") == Some(expected),
        None => true,
    };

    let response_html = if !state_matches {
        warn!("Ignoring callback with unexpected state");
        generate_error_page("This sign in response does not belong to the pending request")
    } else if let Some(error) = params.get("error") {
        let error_msg = params.get("error_description").unwrap_or(error);
        let _ = state.sender.try_send(redirect.clone());
        generate_error_page(error_msg)
    } else if params.contains_key("code") {
        let _ = state.sender.try_send(redirect.clone());
        generate_success_page()
    } else {
        // Not a provider redirect; keep waiting for the real one.
        generate_error_page("Missing authorization code")
    };

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
        Html(response_html),
    )
}

const PAGE_STYLE: &str = r#"
        body {
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, 'Helvetica Neue', Arial, sans-serif;
            background: #F3F4F6;
            margin: 0;
            display: flex;
            justify-content: center;
            align-items: center;
            min-height: 100vh;
        }
        .container {
            background: #ffffff;
            padding: 48px;
            border-radius: 8px;
            box-shadow: 0 4px 6px rgba(0, 0, 0, 0.1);
            max-width: 440px;
            text-align: center;
        }
        h1 { margin: 0 0 16px 0; font-size: 24px; color: #111827; }
        p { margin: 0 0 8px 0; font-size: 16px; color: #6B7280; }
        .error-details {
            background: #F9FAFB;
            border: 1px solid #E5E7EB;
            padding: 12px;
            border-radius: 6px;
            font-family: 'SF Mono', Monaco, 'Courier New', monospace;
            color: #EF4444;
            word-break: break-word;
        }
"#;

/// Page shown to the user once the provider redirected back with a code
pub fn generate_success_page() -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <title>Signed in - CloudID</title>
    <style>{PAGE_STYLE}</style>
</head>
<body>
    <div class="container">
        <h1>Signed in</h1>
        <p>Authentication successful.</p>
        <p>You can close this window and return to the application.</p>
    </div>
</body>
</html>"#
    )
}

/// Page shown when the provider reported an error; `error` is HTML-escaped
pub fn generate_error_page(error: &str) -> String {
    let error = error
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;");

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <title>Authorization Failed - CloudID</title>
    <style>{PAGE_STYLE}</style>
</head>
<body>
    <div class="container">
        <h1>Authorization Failed</h1>
        <div class="error-details">{error}</div>
        <p>Close this window and try again.</p>
    </div>
</body>
</html>"#
    )
}
