use super::browser_login::{BrowserLogin, InteractiveLogin};
use super::oauth_client::{OAuthClient, OAuthConfig};
use super::token_cache::{TokenCache, TokenCipher, TokenStore};
use crate::config::{EXPIRY_MARGIN, IDLE_TIMEOUT, LOGIN_TIMEOUT, TOUCH_DEBOUNCE};
use crate::error::{errors, ErrorCategory, SnResult};
use crate::project::{AuthMode, Credentials, Workspace};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Timing rules applied to the cached token
#[derive(Debug, Clone, Copy)]
struct TokenPolicy {
    /// Unused longer than this and the cache is thrown away
    idle_timeout: Duration,
    /// Minimum gap between two last-access writes
    touch_debounce: Duration,
    /// Tokens this close to expiry are refreshed first
    expiry_margin: Duration,
}

impl Default for TokenPolicy {
    fn default() -> Self {
        Self {
            idle_timeout: IDLE_TIMEOUT,
            touch_debounce: TOUCH_DEBOUNCE,
            expiry_margin: EXPIRY_MARGIN,
        }
    }
}

/// Owns the OAuth credential lifecycle for one project
pub struct CredentialManager {
    store: TokenStore,
    oauth: OAuthClient,
    mode: AuthMode,
    policy: TokenPolicy,
    login: Option<Arc<dyn InteractiveLogin>>,
    // One acquisition at a time, so at most one browser flow runs.
    lock: Mutex<()>,
}

impl CredentialManager {
    pub fn new(store: TokenStore, oauth: OAuthClient, mode: AuthMode) -> Self {
        Self {
            store,
            oauth,
            mode,
            policy: TokenPolicy::default(),
            login: None,
            lock: Mutex::new(()),
        }
    }

    /// Manager for a project: cache in the project root, browser login in
    /// OAuth-browser mode.
    pub fn for_workspace(workspace: &Workspace, credentials: &Credentials) -> Self {
        let store = TokenStore::new(
            workspace.token_cache_file(),
            TokenCipher::new(credentials.enc_secret.as_deref()),
        );
        let oauth = OAuthClient::new(OAuthConfig::for_instance(credentials));
        let mode = credentials.auth_mode();
        let manager = Self::new(store, oauth.clone(), mode);
        if mode == AuthMode::OAuthBrowser {
            manager.with_login(Arc::new(BrowserLogin::new(oauth, LOGIN_TIMEOUT)))
        } else {
            manager
        }
    }

    pub fn with_login(mut self, login: Arc<dyn InteractiveLogin>) -> Self {
        self.login = Some(login);
        self
    }

    pub fn store(&self) -> &TokenStore {
        &self.store
    }

    /// Return a usable access token, refreshing or logging in as needed.
    pub async fn get_valid_token(&self) -> SnResult<String> {
        let _guard = self.lock.lock().await;

        match self.cached_token().await {
            Ok(Some(token)) => return Ok(token),
            Ok(None) => debug!("No usable cached token"),
            Err(e) => warn!("Cached credential unusable: {}", e),
        }
        self.interactive_login().await
    }

    /// Forget the cached credential.
    pub fn logout(&self) -> SnResult<()> {
        self.store.discard()
    }

    async fn cached_token(&self) -> SnResult<Option<String>> {
        let now = Utc::now();
        let mut cache = match self.store.load() {
            Ok(Some(cache)) => cache,
            Ok(None) => return Ok(None),
            Err(e) if e.category() == ErrorCategory::Crypto => {
                warn!("Discarding unreadable token cache: {}", e);
                self.store.discard()?;
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        if cache.is_idle(now, self.policy.idle_timeout) {
            info!(
                "Token unused for more than {} minutes, login required",
                self.policy.idle_timeout.as_secs() / 60
            );
            self.store.discard()?;
            return Ok(None);
        }

        if cache.needs_touch(now, self.policy.touch_debounce) {
            cache.touch(now);
            if let Err(e) = self.store.save(&cache) {
                warn!("Failed to record token use: {}", e);
            }
        }

        if cache.is_fresh(now, self.policy.expiry_margin) {
            return Ok(Some(cache.access_token));
        }

        let refresh_token = cache
            .refresh_token
            .clone()
            .ok_or_else(|| errors::auth_error("Token expired and no refresh token is cached"))?;
        let response = self.oauth.refresh_access_token(&refresh_token).await?;

        let mut renewed = TokenCache::from_response(&response, Utc::now());
        if renewed.refresh_token.is_none() {
            renewed.refresh_token = Some(refresh_token);
        }
        if let Err(e) = self.store.save(&renewed) {
            warn!("Refreshed token could not be cached: {}", e);
        }
        info!("Access token refreshed");
        Ok(Some(renewed.access_token))
    }

    async fn interactive_login(&self) -> SnResult<String> {
        let login = match (&self.login, self.mode) {
            (Some(login), AuthMode::OAuthBrowser) => login,
            _ => {
                return Err(errors::auth_error(format!(
                    "No valid token and interactive login is unavailable in {} mode",
                    self.mode
                )))
            }
        };

        let response = login.login().await?;
        let cache = TokenCache::from_response(&response, Utc::now());
        match self.store.save(&cache) {
            Ok(()) => info!("Login successful, token cached"),
            Err(e) => warn!("Login successful but the token could not be cached: {}", e),
        }
        Ok(cache.access_token)
    }
}
