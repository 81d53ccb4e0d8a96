use std::{sync::Arc, time::Duration};

use {
    outlook_config::AuthConfig,
    serde::Serialize,
    tokio::sync::{Mutex, OwnedMutexGuard},
    tracing::{info, warn},
};

use crate::{
    callback_server::{CallbackServer, START_PATH},
    error::AuthError,
    flow::OAuthFlow,
    storage::TokenStore,
    types::{AuthorizationRequest, PendingAuthorization, TokenRecord, unix_now},
};

/// Token state as seen without touching the network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AuthStatus {
    NoToken,
    Valid { expires_in_secs: u64 },
    Expired { refreshable: bool },
}

/// Owns the token store and decides whether a usable access token exists.
///
/// Concurrent callers share one refresh: the refresh lock is taken, the
/// store re-read, and only a caller that still finds an expired token
/// talks to the token endpoint.
pub struct SessionManager {
    config: Arc<AuthConfig>,
    store: TokenStore,
    flow: OAuthFlow,
    refresh_lock: Mutex<()>,
    login_slot: Arc<Mutex<()>>,
}

impl SessionManager {
    pub fn new(config: Arc<AuthConfig>) -> Self {
        let store = TokenStore::new(config.token_store_path.clone());
        Self::with_store(config, store)
    }

    pub fn with_store(config: Arc<AuthConfig>, store: TokenStore) -> Self {
        Self {
            flow: OAuthFlow::new(Arc::clone(&config)),
            config,
            store,
            refresh_lock: Mutex::new(()),
            login_slot: Arc::new(Mutex::new(())),
        }
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    fn margin(&self) -> u64 {
        self.config.refresh_margin_secs
    }

    /// Return a usable access token, refreshing it if needed.
    ///
    /// Fails with [`AuthError::AuthenticationRequired`] when only the
    /// interactive flow can produce a token.
    pub async fn ensure_authenticated(&self) -> Result<String, AuthError> {
        let record = self.store.load().ok_or(AuthError::AuthenticationRequired)?;
        if record.is_usable_at(unix_now(), self.margin()) {
            return Ok(record.access_token);
        }

        let _guard = self.refresh_lock.lock().await;

        // Another caller may have refreshed while we waited.
        let record = self.store.load().ok_or(AuthError::AuthenticationRequired)?;
        if record.is_usable_at(unix_now(), self.margin()) {
            return Ok(record.access_token);
        }
        if !record.has_refresh_token() {
            info!("access token expired and no refresh token is stored");
            return Err(AuthError::AuthenticationRequired);
        }

        info!("access token expired, refreshing");
        match self.flow.refresh(&record).await {
            Ok(fresh) => {
                self.store.save(&fresh)?;
                info!(expires_at = fresh.expires_at, "access token refreshed");
                Ok(fresh.access_token)
            },
            Err(e) if e.is_credential_rejected() => {
                warn!(
                    oauth_error = e.oauth_error_code().as_deref().unwrap_or("-"),
                    "refresh token rejected, clearing token cache"
                );
                self.store.clear()?;
                Err(AuthError::AuthenticationRequired)
            },
            Err(e) => {
                warn!(error = %e, "token refresh failed, keeping cached token");
                Err(e)
            },
        }
    }

    /// Describe the cached token without refreshing it.
    pub fn status(&self) -> AuthStatus {
        let Some(record) = self.store.load() else {
            return AuthStatus::NoToken;
        };
        let now = unix_now();
        if record.is_usable_at(now, self.margin()) {
            AuthStatus::Valid {
                expires_in_secs: record.expires_at.saturating_sub(now),
            }
        } else {
            AuthStatus::Expired {
                refreshable: record.has_refresh_token(),
            }
        }
    }

    /// Forget the cached token.
    pub async fn logout(&self) -> Result<(), AuthError> {
        let _guard = self.refresh_lock.lock().await;
        self.store.clear()?;
        info!("token cache cleared");
        Ok(())
    }

    /// Start an interactive login.
    ///
    /// The redirect listener is bound before the URL is handed out. Only one
    /// login may be pending; a second call fails with
    /// [`AuthError::AuthInProgress`] until the first completes or is dropped.
    pub async fn begin_login(self: &Arc<Self>) -> Result<PendingLogin, AuthError> {
        let slot = Arc::clone(&self.login_slot)
            .try_lock_owned()
            .map_err(|_| AuthError::AuthInProgress)?;

        self.config
            .validate()
            .map_err(|e| AuthError::Config(format!("{e:#}")))?;
        let target = self
            .config
            .redirect_target()
            .map_err(|e| AuthError::Config(format!("{e:#}")))?;

        let request = self.flow.start()?;
        let server =
            CallbackServer::bind(&target, request.state.clone(), request.url.clone()).await?;

        let pending = PendingAuthorization {
            state: request.state.clone(),
            created_at: unix_now(),
        };
        let start_url = format!(
            "{}{START_PATH}",
            self.config.auth_server_url.trim_end_matches('/')
        );

        Ok(PendingLogin {
            session: Arc::clone(self),
            request,
            pending,
            start_url,
            server,
            timeout: Duration::from_secs(self.config.callback_timeout_secs),
            _slot: slot,
        })
    }

    async fn store_login(&self, record: &TokenRecord) -> Result<(), AuthError> {
        let _guard = self.refresh_lock.lock().await;
        self.store.save(record)?;
        Ok(())
    }
}

/// An interactive login whose redirect listener is already accepting.
pub struct PendingLogin {
    session: Arc<SessionManager>,
    request: AuthorizationRequest,
    pending: PendingAuthorization,
    start_url: String,
    server: CallbackServer,
    timeout: Duration,
    _slot: OwnedMutexGuard<()>,
}

impl PendingLogin {
    /// Upstream authorization URL.
    pub fn authorization_url(&self) -> &str {
        &self.request.url
    }

    /// Local link that redirects to [`Self::authorization_url`].
    pub fn start_url(&self) -> &str {
        &self.start_url
    }

    pub fn pending(&self) -> &PendingAuthorization {
        &self.pending
    }

    /// Override the callback timeout for this login.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Wait for the callback, exchange the code and persist the tokens.
    ///
    /// The listener is released before the code exchange starts.
    pub async fn complete(self) -> Result<TokenRecord, AuthError> {
        let Self {
            session,
            request,
            pending,
            server,
            timeout,
            _slot,
            ..
        } = self;

        let code = server.wait(timeout).await?;
        let record = session.flow.exchange(&code, &request.pkce.verifier).await?;
        session.store_login(&record).await?;

        info!(
            created_at = pending.created_at,
            elapsed_secs = unix_now().saturating_sub(pending.created_at),
            scopes = record.scopes.len(),
            "interactive authentication complete"
        );
        Ok(record)
    }
}
