//! Token acquisition with silent renewal and interactive fallback
//!
//! [`TokenAcquisitionEngine`] hands out a valid access token for one identity.
//! Every acquisition holds the machine-wide [`NamedLock`] for its whole
//! duration, including the interactive sign in, and runs a retry loop bounded
//! by the logon timeout:
//!
//! 1. volatile cache, unless the token expires within the refresh margin
//! 2. refresh token from the durable cache, exchanged at the token endpoint
//! 3. interactive authorization code flow in the browser
//!
//! Cancellation of the interactive flow ends the acquisition at once. Every
//! other fault is retried until the logon timeout has passed.

use super::callback_server::BrowserAuthorizer;
use super::error::{classify, AuthError, AuthResult, FaultClass, ProviderError, ProviderResult};
use super::lock::NamedLock;
use super::oauth_flow::Auth0Client;
use super::provider::{InteractiveAuthorizer, OAuthClient};
use super::token_store::{FileTokenStore, MemoryTokenStore, TokenStore};
use super::types::{AuthorizationOptions, Identity, Token, TokenGrant, TokenKey};
use cloudid_common::{DEFAULT_LOCK_NAME, LOGON_TIMEOUT, REFRESH_MARGIN, RETRY_DELAY};
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Timing and prompting policy of an engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOptions {
    /// Wall-clock bound of the retry loop, measured from its start
    pub logon_timeout: Duration,
    /// Pause between attempts; zero retries immediately
    pub retry_delay: Duration,
    /// Cached access tokens this close to expiry are renewed instead of returned
    pub refresh_margin: Duration,
    /// When set, `logon()` tries silent renewal before prompting
    pub is_silent: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            logon_timeout: LOGON_TIMEOUT,
            retry_delay: RETRY_DELAY,
            refresh_margin: REFRESH_MARGIN,
            is_silent: false,
        }
    }
}

/// Acquires, caches and renews the access token of a single identity
pub struct TokenAcquisitionEngine {
    identity: Identity,
    options: EngineOptions,
    access_tokens: Arc<dyn TokenStore>,
    refresh_tokens: Arc<dyn TokenStore>,
    lock: NamedLock,
    oauth: Arc<dyn OAuthClient>,
    authorizer: Arc<dyn InteractiveAuthorizer>,
    session: Mutex<Option<CancellationToken>>,
}

impl TokenAcquisitionEngine {
    pub fn builder(identity: Identity) -> EngineBuilder {
        EngineBuilder::new(identity)
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// A valid access token, prompting only when silent renewal is impossible
    pub async fn get_token(&self) -> AuthResult<String> {
        self.acquire(false).await.map(Token::into_raw)
    }

    /// Sign in; forces a fresh prompt unless the engine is configured silent
    pub async fn logon(&self) -> AuthResult<()> {
        self.acquire(!self.options.is_silent).await.map(|_| ())
    }

    /// Tokens stay cached; the provider session is left untouched.
    pub fn logoff(&self) {
        debug!("Logoff requested for {}", self.identity.key());
    }

    /// Cancel the interactive sign in currently in flight.
    ///
    /// Returns whether there was one to cancel.
    pub fn cancel(&self) -> bool {
        let session = self
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match session.as_ref() {
            Some(cancel) => {
                info!("Cancelling interactive sign in");
                cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Obtain a valid access token.
    ///
    /// With `reset` set the silent path is skipped and the provider is asked
    /// to prompt the user even if it still holds a session.
    #[instrument(skip(self), fields(identity = %self.identity.key()))]
    pub async fn acquire(&self, reset: bool) -> AuthResult<Token> {
        self.identity.validate()?;
        let key = self.identity.key();

        let _guard = self
            .lock
            .acquire()
            .await
            .map_err(|source| AuthError::Transient {
                attempts: 0,
                source,
            })?;

        let started = Instant::now();
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;

            let fault = match self.attempt(&key, reset).await {
                Ok(token) => {
                    info!(attempts, "Token acquired");
                    return Ok(token);
                }
                Err(fault) => fault,
            };

            match classify(fault) {
                FaultClass::Cancelled(reason) => {
                    info!("Authentication cancelled: {}", reason);
                    return Err(AuthError::Cancelled(reason));
                }
                FaultClass::Transient(source) => {
                    let elapsed = started.elapsed();
                    if elapsed > self.options.logon_timeout {
                        warn!(
                            attempts,
                            "Giving up after {:?}: {}", elapsed, source
                        );
                        return Err(AuthError::Transient { attempts, source });
                    }

                    warn!(attempts, "Token acquisition failed, retrying: {}", source);
                    if !self.options.retry_delay.is_zero() {
                        tokio::time::sleep(self.options.retry_delay).await;
                    }
                }
            }
        }
    }

    async fn attempt(&self, key: &TokenKey, reset: bool) -> ProviderResult<Token> {
        if !reset {
            if let Some(token) = self.get_token_silently(key).await? {
                return Ok(token);
            }
        }

        self.get_token_with_prompt(
            key,
            AuthorizationOptions {
                force_interactive: reset,
            },
        )
        .await
    }

    async fn get_token_silently(&self, key: &TokenKey) -> ProviderResult<Option<Token>> {
        if let Some(token) = self.access_tokens.get(key).await? {
            if !token.expires_within(self.options.refresh_margin) {
                debug!("Using cached access token");
                return Ok(Some(token));
            }
            debug!("Cached access token is about to expire, renewing");
        }

        let Some(refresh_token) = self.refresh_tokens.get(key).await? else {
            debug!("No refresh token in {} store", self.refresh_tokens.name());
            return Ok(None);
        };

        let grant = self.oauth.refresh(&refresh_token, key).await?;
        info!("Access token renewed silently");
        self.store_grant(key, grant).await.map(Some)
    }

    async fn get_token_with_prompt(
        &self,
        key: &TokenKey,
        options: AuthorizationOptions,
    ) -> ProviderResult<Token> {
        let session = self.begin_session();
        let cancel = session.token();

        info!(
            force_interactive = options.force_interactive,
            "Starting interactive sign in"
        );

        let start = until_cancelled(
            &cancel,
            self.oauth
                .begin_authorization(self.identity.audience(), &options),
        )
        .await?;

        let redirect_url = until_cancelled(
            &cancel,
            self.authorizer.navigate(&start.start_url, cancel.clone()),
        )
        .await?;

        let grant = until_cancelled(
            &cancel,
            self.oauth.end_authorization(&start.state, &redirect_url, key),
        )
        .await?;

        info!("Interactive sign in completed");
        self.store_grant(key, grant).await
    }

    /// Persist both tokens of a grant and hand back the access token
    async fn store_grant(&self, key: &TokenKey, grant: TokenGrant) -> ProviderResult<Token> {
        let TokenGrant {
            access_token,
            refresh_token,
        } = grant;

        if let Some(refresh_token) = &refresh_token {
            self.refresh_tokens.put(key, refresh_token).await?;
        }

        // Without a reported lifetime the cached token is served for one
        // refresh margin, then renewed.
        let access_token =
            access_token.or_expiring_in(self.options.refresh_margin.saturating_mul(2));
        self.access_tokens.put(key, &access_token).await?;

        Ok(access_token)
    }

    fn begin_session(&self) -> SessionGuard<'_> {
        let token = CancellationToken::new();
        *self
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(token.clone());
        SessionGuard {
            slot: &self.session,
            token,
        }
    }
}

impl std::fmt::Debug for TokenAcquisitionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenAcquisitionEngine")
            .field("identity", &self.identity)
            .field("options", &self.options)
            .field("access_tokens", &self.access_tokens.name())
            .field("refresh_tokens", &self.refresh_tokens.name())
            .field("lock", &self.lock.name())
            .finish_non_exhaustive()
    }
}

/// Registration of the interactive session; cleared when the attempt ends
struct SessionGuard<'a> {
    slot: &'a Mutex<Option<CancellationToken>>,
    token: CancellationToken,
}

impl SessionGuard<'_> {
    fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

async fn until_cancelled<T>(
    cancel: &CancellationToken,
    step: impl Future<Output = ProviderResult<T>>,
) -> ProviderResult<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ProviderError::Cancelled("Sign in was cancelled".to_string())),
        result = step => result,
    }
}

/// Builder for [`TokenAcquisitionEngine`].
///
/// Unset capabilities get the production defaults: an in-memory access token
/// cache, the refresh token file in the user data directory, the shared
/// process lock, an [`Auth0Client`] for the identity's domain and the system
/// browser.
pub struct EngineBuilder {
    identity: Identity,
    options: EngineOptions,
    access_tokens: Option<Arc<dyn TokenStore>>,
    refresh_tokens: Option<Arc<dyn TokenStore>>,
    lock: Option<NamedLock>,
    oauth: Option<Arc<dyn OAuthClient>>,
    authorizer: Option<Arc<dyn InteractiveAuthorizer>>,
}

impl EngineBuilder {
    pub fn new(identity: Identity) -> Self {
        Self {
            identity,
            options: EngineOptions::default(),
            access_tokens: None,
            refresh_tokens: None,
            lock: None,
            oauth: None,
            authorizer: None,
        }
    }

    pub fn options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn logon_timeout(mut self, timeout: Duration) -> Self {
        self.options.logon_timeout = timeout;
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.options.retry_delay = delay;
        self
    }

    pub fn refresh_margin(mut self, margin: Duration) -> Self {
        self.options.refresh_margin = margin;
        self
    }

    pub fn silent(mut self, is_silent: bool) -> Self {
        self.options.is_silent = is_silent;
        self
    }

    /// Volatile cache for access tokens
    pub fn access_token_store(mut self, store: Arc<dyn TokenStore>) -> Self {
        self.access_tokens = Some(store);
        self
    }

    /// Durable cache for refresh tokens; only touched while the lock is held
    pub fn refresh_token_store(mut self, store: Arc<dyn TokenStore>) -> Self {
        self.refresh_tokens = Some(store);
        self
    }

    pub fn lock(mut self, lock: NamedLock) -> Self {
        self.lock = Some(lock);
        self
    }

    pub fn oauth_client(mut self, client: Arc<dyn OAuthClient>) -> Self {
        self.oauth = Some(client);
        self
    }

    pub fn authorizer(mut self, authorizer: Arc<dyn InteractiveAuthorizer>) -> Self {
        self.authorizer = Some(authorizer);
        self
    }

    pub fn build(self) -> AuthResult<TokenAcquisitionEngine> {
        let refresh_tokens = match self.refresh_tokens {
            Some(store) => store,
            None => {
                let data_dir = cloudid_common::config::data_dir()
                    .map_err(|e| AuthError::Configuration(e.to_string()))?;
                Arc::new(FileTokenStore::in_dir(data_dir))
            }
        };

        let oauth = match self.oauth {
            Some(client) => client,
            None => Arc::new(
                Auth0Client::for_identity(&self.identity)
                    .map_err(|e| AuthError::Configuration(e.to_string()))?,
            ),
        };

        Ok(TokenAcquisitionEngine {
            identity: self.identity,
            options: self.options,
            access_tokens: self
                .access_tokens
                .unwrap_or_else(|| Arc::new(MemoryTokenStore::new())),
            refresh_tokens,
            lock: self
                .lock
                .unwrap_or_else(|| NamedLock::new(DEFAULT_LOCK_NAME)),
            oauth,
            authorizer: self
                .authorizer
                .unwrap_or_else(|| Arc::new(BrowserAuthorizer::new())),
            session: Mutex::new(None),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::provider::{AuthorizationStart, AuthorizationState};
    use async_trait::async_trait;
    use oauth2::PkceCodeVerifier;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
    use tempfile::{tempdir, TempDir};
    use url::Url;

    type Script = Box<dyn Fn(u32) -> ProviderResult<TokenGrant> + Send + Sync>;

    fn grant(access: &str, refresh: &str) -> ProviderResult<TokenGrant> {
        Ok(TokenGrant {
            access_token: Token::expiring_in(access, Duration::from_secs(3600)),
            refresh_token: Some(Token::new(refresh)),
        })
    }

    fn network_fault() -> ProviderError {
        ProviderError::Network("connection refused".to_string())
    }

    /// Scripted identity provider; call numbers start at 1
    struct FakeOAuth {
        on_refresh: Script,
        on_exchange: Script,
        refresh_delays: Vec<Duration>,
        refreshes: AtomicU32,
        begins: AtomicU32,
        exchanges: AtomicU32,
        forced: Mutex<Vec<bool>>,
        active: AtomicUsize,
        max_active: AtomicUsize,
    }

    impl FakeOAuth {
        fn new() -> Self {
            Self {
                on_refresh: Box::new(|n| grant(&format!("refreshed-{n}"), "rotated")),
                on_exchange: Box::new(|n| grant(&format!("interactive-{n}"), "issued")),
                refresh_delays: Vec::new(),
                refreshes: AtomicU32::new(0),
                begins: AtomicU32::new(0),
                exchanges: AtomicU32::new(0),
                forced: Mutex::new(Vec::new()),
                active: AtomicUsize::new(0),
                max_active: AtomicUsize::new(0),
            }
        }

        fn on_refresh(
            mut self,
            script: impl Fn(u32) -> ProviderResult<TokenGrant> + Send + Sync + 'static,
        ) -> Self {
            self.on_refresh = Box::new(script);
            self
        }

        fn on_exchange(
            mut self,
            script: impl Fn(u32) -> ProviderResult<TokenGrant> + Send + Sync + 'static,
        ) -> Self {
            self.on_exchange = Box::new(script);
            self
        }

        /// Delay of the n-th refresh call; the last entry repeats
        fn refresh_delays(mut self, delays: Vec<Duration>) -> Self {
            self.refresh_delays = delays;
            self
        }

        fn refreshes(&self) -> u32 {
            self.refreshes.load(Ordering::SeqCst)
        }

        fn begins(&self) -> u32 {
            self.begins.load(Ordering::SeqCst)
        }

        fn exchanges(&self) -> u32 {
            self.exchanges.load(Ordering::SeqCst)
        }

        fn forced(&self) -> Vec<bool> {
            self.forced.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl OAuthClient for FakeOAuth {
        async fn refresh(&self, _: &Token, _: &TokenKey) -> ProviderResult<TokenGrant> {
            let n = self.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);

            let delay = self
                .refresh_delays
                .get(n as usize - 1)
                .or(self.refresh_delays.last())
                .copied()
                .unwrap_or_default();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            self.active.fetch_sub(1, Ordering::SeqCst);
            (self.on_refresh)(n)
        }

        async fn begin_authorization(
            &self,
            _audience: &str,
            options: &AuthorizationOptions,
        ) -> ProviderResult<AuthorizationStart> {
            self.begins.fetch_add(1, Ordering::SeqCst);
            self.forced.lock().unwrap().push(options.force_interactive);
            Ok(AuthorizationStart {
                start_url: Url::parse("https://id.example.com/authorize").unwrap(),
                state: AuthorizationState::new(
                    "state".to_string(),
                    PkceCodeVerifier::new("verifier".to_string()),
                    Url::parse("http://127.0.0.1:8765/callback").unwrap(),
                ),
            })
        }

        async fn end_authorization(
            &self,
            _state: &AuthorizationState,
            _redirect_url: &Url,
            _key: &TokenKey,
        ) -> ProviderResult<TokenGrant> {
            let n = self.exchanges.fetch_add(1, Ordering::SeqCst) + 1;
            (self.on_exchange)(n)
        }
    }

    enum Navigation {
        Redirect,
        UserCancels,
        WaitForCancel,
    }

    struct FakeAuthorizer {
        navigation: Navigation,
        navigations: AtomicU32,
    }

    impl FakeAuthorizer {
        fn new(navigation: Navigation) -> Self {
            Self {
                navigation,
                navigations: AtomicU32::new(0),
            }
        }

        fn navigations(&self) -> u32 {
            self.navigations.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl InteractiveAuthorizer for FakeAuthorizer {
        async fn navigate(&self, _start_url: &Url, cancel: CancellationToken) -> ProviderResult<Url> {
            self.navigations.fetch_add(1, Ordering::SeqCst);
            match self.navigation {
                Navigation::Redirect => {
                    Ok(Url::parse("http://127.0.0.1:8765/callback?code=c&state=state").unwrap())
                }
                Navigation::UserCancels => Err(ProviderError::Cancelled(
                    "user closed the window".to_string(),
                )),
                Navigation::WaitForCancel => {
                    cancel.cancelled().await;
                    Err(ProviderError::Cancelled("cancelled".to_string()))
                }
            }
        }
    }

    struct Harness {
        dir: TempDir,
        lock_path: std::path::PathBuf,
        access: Arc<MemoryTokenStore>,
        refresh: Arc<MemoryTokenStore>,
        oauth: Arc<FakeOAuth>,
        authorizer: Arc<FakeAuthorizer>,
        key: TokenKey,
    }

    impl Harness {
        fn new(oauth: FakeOAuth, navigation: Navigation) -> Self {
            let dir = tempdir().unwrap();
            let lock_path = NamedLock::in_dir(dir.path(), "engine-test").path().to_path_buf();
            Self {
                dir,
                lock_path,
                access: Arc::new(MemoryTokenStore::new()),
                refresh: Arc::new(MemoryTokenStore::new()),
                oauth: Arc::new(oauth),
                authorizer: Arc::new(FakeAuthorizer::new(navigation)),
                key: identity().key(),
            }
        }

        fn builder(&self, identity: Identity) -> EngineBuilder {
            TokenAcquisitionEngine::builder(identity)
                .retry_delay(Duration::ZERO)
                .access_token_store(self.access.clone())
                .refresh_token_store(self.refresh.clone())
                .lock(NamedLock::in_dir(self.dir.path(), "engine-test"))
                .oauth_client(self.oauth.clone())
                .authorizer(self.authorizer.clone())
        }

        fn engine(&self) -> TokenAcquisitionEngine {
            self.builder(identity()).build().unwrap()
        }
    }

    fn identity() -> Identity {
        Identity::new("client", "https://api.example.com")
    }

    #[tokio::test]
    async fn test_missing_identity_fails_before_any_activity() {
        let harness = Harness::new(FakeOAuth::new(), Navigation::Redirect);
        let engine = harness
            .builder(Identity::new("", "https://api.example.com"))
            .build()
            .unwrap();

        let err = engine.get_token().await.unwrap_err();
        assert!(matches!(err, AuthError::Configuration(_)));
        assert_eq!(harness.oauth.refreshes() + harness.oauth.begins(), 0);
        assert_eq!(harness.authorizer.navigations(), 0);
        assert!(!harness.lock_path.exists());
    }

    #[tokio::test]
    async fn test_cached_token_returned_without_network() {
        let harness = Harness::new(FakeOAuth::new(), Navigation::Redirect);
        harness
            .access
            .put(&harness.key, &Token::expiring_in("cached", Duration::from_secs(3600)))
            .await
            .unwrap();

        let token = harness.engine().get_token().await.unwrap();
        assert_eq!(token, "cached");
        assert_eq!(harness.oauth.refreshes(), 0);
        assert_eq!(harness.oauth.begins(), 0);
    }

    #[tokio::test]
    async fn test_token_inside_refresh_margin_is_renewed() {
        let harness = Harness::new(FakeOAuth::new(), Navigation::Redirect);
        harness
            .access
            .put(&harness.key, &Token::expiring_in("stale", Duration::from_secs(60)))
            .await
            .unwrap();
        harness
            .refresh
            .put(&harness.key, &Token::new("refresh"))
            .await
            .unwrap();

        let token = harness.engine().get_token().await.unwrap();
        assert_eq!(token, "refreshed-1");
        assert_eq!(harness.oauth.refreshes(), 1);
    }

    #[tokio::test]
    async fn test_refresh_token_renews_once_and_updates_both_caches() {
        let harness = Harness::new(FakeOAuth::new(), Navigation::Redirect);
        harness
            .refresh
            .put(&harness.key, &Token::new("refresh"))
            .await
            .unwrap();

        let token = harness.engine().get_token().await.unwrap();

        assert_eq!(token, "refreshed-1");
        assert_eq!(harness.oauth.refreshes(), 1);
        assert_eq!(harness.oauth.begins(), 0);
        assert_eq!(
            harness.access.get(&harness.key).await.unwrap().unwrap().raw(),
            "refreshed-1"
        );
        assert_eq!(
            harness.refresh.get(&harness.key).await.unwrap().unwrap().raw(),
            "rotated"
        );
    }

    #[tokio::test]
    async fn test_prompts_when_nothing_is_cached() {
        let harness = Harness::new(FakeOAuth::new(), Navigation::Redirect);

        let token = harness.engine().get_token().await.unwrap();

        assert_eq!(token, "interactive-1");
        assert_eq!(harness.oauth.forced(), vec![false]);
        assert_eq!(harness.authorizer.navigations(), 1);
        assert_eq!(
            harness.refresh.get(&harness.key).await.unwrap().unwrap().raw(),
            "issued"
        );
    }

    #[tokio::test]
    async fn test_reset_skips_silent_path_and_forces_prompt() {
        let harness = Harness::new(FakeOAuth::new(), Navigation::Redirect);
        harness
            .access
            .put(&harness.key, &Token::new("cached"))
            .await
            .unwrap();

        let token = harness.engine().acquire(true).await.unwrap();

        assert_eq!(token.raw(), "interactive-1");
        assert_eq!(harness.oauth.refreshes(), 0);
        assert_eq!(harness.oauth.forced(), vec![true]);
    }

    #[tokio::test]
    async fn test_logon_honours_silent_flag() {
        let harness = Harness::new(FakeOAuth::new(), Navigation::Redirect);
        harness
            .access
            .put(&harness.key, &Token::new("cached"))
            .await
            .unwrap();

        let silent = harness.builder(identity()).silent(true).build().unwrap();
        silent.logon().await.unwrap();
        assert_eq!(harness.oauth.begins(), 0);

        harness.engine().logon().await.unwrap();
        assert_eq!(harness.oauth.forced(), vec![true]);
    }

    #[tokio::test]
    async fn test_user_cancellation_is_not_retried_and_releases_lock() {
        let harness = Harness::new(FakeOAuth::new(), Navigation::UserCancels);
        let engine = harness.engine();

        let err = engine.get_token().await.unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(harness.authorizer.navigations(), 1);

        let second = tokio::time::timeout(Duration::from_secs(5), engine.get_token())
            .await
            .expect("second acquisition must not deadlock");
        assert!(second.unwrap_err().is_cancelled());
        assert_eq!(harness.authorizer.navigations(), 2);
    }

    #[tokio::test]
    async fn test_cancel_aborts_pending_sign_in() {
        let harness = Harness::new(FakeOAuth::new(), Navigation::WaitForCancel);
        let engine = Arc::new(harness.engine());
        assert!(!engine.cancel());

        let pending = tokio::spawn({
            let engine = engine.clone();
            async move { engine.get_token().await }
        });

        while harness.authorizer.navigations() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(engine.cancel());

        let err = pending.await.unwrap().unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(harness.authorizer.navigations(), 1);
        assert!(!engine.cancel());
    }

    #[tokio::test]
    async fn test_cancellation_inside_batch_is_not_retried() {
        let oauth = FakeOAuth::new().on_exchange(|_| {
            Err(ProviderError::Batch {
                message: "one or more errors occurred".to_string(),
                causes: vec![ProviderError::Cancelled("consent withdrawn".to_string())],
            })
        });
        let harness = Harness::new(oauth, Navigation::Redirect);

        let err = harness.engine().get_token().await.unwrap_err();
        match err {
            AuthError::Cancelled(reason) => assert_eq!(reason, "consent withdrawn"),
            other => panic!("expected cancellation, got {other:?}"),
        }
        assert_eq!(harness.oauth.exchanges(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_faults_retried_until_deadline_passes() {
        let oauth = FakeOAuth::new()
            .refresh_delays(vec![Duration::from_secs(50)])
            .on_refresh(|_| {
                Err(ProviderError::Rejected {
                    error: "unauthorized_client".to_string(),
                    description: None,
                })
            });
        let harness = Harness::new(oauth, Navigation::Redirect);
        harness
            .refresh
            .put(&harness.key, &Token::new("refresh"))
            .await
            .unwrap();

        let err = harness.engine().get_token().await.unwrap_err();

        // Faults at 50s, 100s and 150s are retried; the one at 200s is final.
        match err {
            AuthError::Transient { attempts, source } => {
                assert_eq!(attempts, 4);
                assert!(matches!(source, ProviderError::Rejected { .. }));
            }
            other => panic!("expected transient failure, got {other:?}"),
        }
        assert_eq!(harness.oauth.refreshes(), 4);
        assert_eq!(harness.oauth.begins(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fault_just_before_deadline_is_retried() {
        let oauth = FakeOAuth::new()
            .refresh_delays(vec![
                LOGON_TIMEOUT - Duration::from_millis(1),
                Duration::ZERO,
            ])
            .on_refresh(|n| {
                if n == 1 {
                    Err(network_fault())
                } else {
                    grant("late", "rotated")
                }
            });
        let harness = Harness::new(oauth, Navigation::Redirect);
        harness
            .refresh
            .put(&harness.key, &Token::new("refresh"))
            .await
            .unwrap();

        let token = harness.engine().get_token().await.unwrap();
        assert_eq!(token, "late");
        assert_eq!(harness.oauth.refreshes(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fault_after_deadline_is_final() {
        let oauth = FakeOAuth::new()
            .refresh_delays(vec![LOGON_TIMEOUT + Duration::from_secs(1)])
            .on_refresh(|_| Err(network_fault()));
        let harness = Harness::new(oauth, Navigation::Redirect);
        harness
            .refresh
            .put(&harness.key, &Token::new("refresh"))
            .await
            .unwrap();

        let err = harness.engine().get_token().await.unwrap_err();
        assert!(matches!(err, AuthError::Transient { attempts: 1, .. }));
        assert_eq!(harness.oauth.refreshes(), 1);
    }

    #[tokio::test]
    async fn test_token_without_lifetime_is_renewed_after_margin() {
        let harness = Harness::new(
            FakeOAuth::new().on_refresh(|n| {
                Ok(TokenGrant {
                    access_token: Token::new(format!("unbounded-{n}")),
                    refresh_token: None,
                })
            }),
            Navigation::Redirect,
        );
        harness
            .refresh
            .put(&harness.key, &Token::new("refresh"))
            .await
            .unwrap();
        let engine = harness
            .builder(identity())
            .refresh_margin(Duration::from_millis(100))
            .build()
            .unwrap();

        assert_eq!(engine.get_token().await.unwrap(), "unbounded-1");
        assert_eq!(engine.get_token().await.unwrap(), "unbounded-1");
        assert_eq!(harness.oauth.refreshes(), 1);

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(engine.get_token().await.unwrap(), "unbounded-2");
        assert_eq!(harness.oauth.refreshes(), 2);
    }

    /// Durable store that checks every access happens under the process lock
    #[cfg(unix)]
    struct LockCheckedStore {
        inner: Arc<MemoryTokenStore>,
        lock_path: std::path::PathBuf,
        calls: AtomicU32,
        unguarded: AtomicU32,
        active: AtomicUsize,
        max_active: AtomicUsize,
    }

    #[cfg(unix)]
    impl LockCheckedStore {
        fn new(inner: Arc<MemoryTokenStore>, lock_path: std::path::PathBuf) -> Self {
            Self {
                inner,
                lock_path,
                calls: AtomicU32::new(0),
                unguarded: AtomicU32::new(0),
                active: AtomicUsize::new(0),
                max_active: AtomicUsize::new(0),
            }
        }

        /// Whether some file description currently holds the lock
        fn lock_is_held(&self) -> bool {
            use std::os::unix::io::AsRawFd;

            let file = std::fs::File::open(&self.lock_path).unwrap();
            let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
            if rc == 0 {
                unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_UN) };
                return false;
            }
            true
        }

        async fn enter(&self) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.lock_is_held() {
                self.unguarded.fetch_add(1, Ordering::SeqCst);
            }
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        fn exit(&self) {
            self.active.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[cfg(unix)]
    #[async_trait]
    impl TokenStore for LockCheckedStore {
        async fn get(&self, key: &TokenKey) -> ProviderResult<Option<Token>> {
            self.enter().await;
            let result = self.inner.get(key).await;
            self.exit();
            result
        }

        async fn put(&self, key: &TokenKey, token: &Token) -> ProviderResult<()> {
            self.enter().await;
            let result = self.inner.put(key, token).await;
            self.exit();
            result
        }

        fn name(&self) -> &str {
            "lock-checked"
        }
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_engines_never_overlap() {
        let harness = Harness::new(
            FakeOAuth::new().refresh_delays(vec![Duration::from_millis(50)]),
            Navigation::Redirect,
        );
        harness
            .refresh
            .put(&harness.key, &Token::new("refresh"))
            .await
            .unwrap();
        let durable = Arc::new(LockCheckedStore::new(
            harness.refresh.clone(),
            harness.lock_path.clone(),
        ));

        // Each engine has its own lock instance and volatile cache, as two
        // processes would; only the durable store is shared.
        let engines: Vec<_> = (0..2)
            .map(|_| {
                harness
                    .builder(identity())
                    .access_token_store(Arc::new(MemoryTokenStore::new()))
                    .refresh_token_store(durable.clone())
                    .build()
                    .unwrap()
            })
            .collect();

        let handles: Vec<_> = engines
            .into_iter()
            .map(|engine| tokio::spawn(async move { engine.get_token().await }))
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(harness.oauth.refreshes(), 2);
        assert_eq!(harness.oauth.max_active.load(Ordering::SeqCst), 1);
        // One read and one write per engine, each made while the lock was held.
        assert_eq!(durable.calls.load(Ordering::SeqCst), 4);
        assert_eq!(durable.unguarded.load(Ordering::SeqCst), 0);
        assert_eq!(durable.max_active.load(Ordering::SeqCst), 1);
    }
}
