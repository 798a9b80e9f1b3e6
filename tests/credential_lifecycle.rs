//! Credential lifecycle against a mock token endpoint

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use pretty_assertions::assert_eq;
use snsync::auth::{
    CredentialManager, InteractiveLogin, OAuthClient, OAuthConfig, OAuthTokenResponse, TokenCache,
    TokenCipher, TokenStore,
};
use snsync::project::AuthMode;
use snsync::{ErrorCategory, SnResult};
use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

struct StubLogin {
    calls: AtomicUsize,
}

impl StubLogin {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InteractiveLogin for StubLogin {
    async fn login(&self) -> SnResult<OAuthTokenResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(OAuthTokenResponse {
            access_token: "browser-token".into(),
            refresh_token: Some("browser-refresh".into()),
            expires_in: 1800,
            token_type: Some("Bearer".into()),
            scope: None,
        })
    }
}

fn oauth(token_url: String) -> OAuthClient {
    OAuthClient::new(OAuthConfig {
        client_id: "client".into(),
        client_secret: "secret".into(),
        authorize_url: "http://127.0.0.1:9/oauth_auth.do".into(),
        token_url,
        redirect_uri: "http://localhost:3000/callback".into(),
    })
}

fn now_ms() -> DateTime<Utc> {
    DateTime::from_timestamp_millis(Utc::now().timestamp_millis()).unwrap()
}

fn cache(access: &str, expires_at: DateTime<Utc>, last_used_at: DateTime<Utc>) -> TokenCache {
    TokenCache {
        access_token: access.into(),
        refresh_token: Some("old-refresh".into()),
        expires_at,
        last_used_at,
    }
}

#[tokio::test]
async fn idle_cache_is_discarded_and_login_runs() {
    let dir = TempDir::new().unwrap();
    let store = TokenStore::new(dir.path().join(".token_cache.json"), TokenCipher::new(Some("k")));
    let now = now_ms();
    store
        .save(&cache("stale", now + Duration::hours(1), now - Duration::minutes(21)))
        .unwrap();

    let login = StubLogin::new();
    let manager = CredentialManager::new(
        store.clone(),
        oauth("http://127.0.0.1:9/oauth_token.do".into()),
        AuthMode::OAuthBrowser,
    )
    .with_login(login.clone());

    assert_eq!(manager.get_valid_token().await.unwrap(), "browser-token");
    assert_eq!(login.calls(), 1);
    let saved = store.load().unwrap().unwrap();
    assert_eq!(saved.access_token, "browser-token");
    assert_eq!(saved.refresh_token.as_deref(), Some("browser-refresh"));
}

#[tokio::test]
async fn expiring_token_is_refreshed_and_keeps_the_old_refresh_token() {
    let mut server = mockito::Server::new_async().await;
    let refresh = server
        .mock("POST", "/oauth_token.do")
        .match_body(mockito::Matcher::AllOf(vec![
            mockito::Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()),
            mockito::Matcher::UrlEncoded("refresh_token".into(), "old-refresh".into()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"access_token":"renewed","expires_in":1800}"#)
        .expect(1)
        .create_async()
        .await;

    let dir = TempDir::new().unwrap();
    let store = TokenStore::new(dir.path().join(".token_cache.json"), TokenCipher::plain());
    let now = now_ms();
    store
        .save(&cache("expiring", now + Duration::seconds(30), now - Duration::minutes(1)))
        .unwrap();

    let login = StubLogin::new();
    let manager = CredentialManager::new(
        store.clone(),
        oauth(format!("{}/oauth_token.do", server.url())),
        AuthMode::OAuthBrowser,
    )
    .with_login(login.clone());

    assert_eq!(manager.get_valid_token().await.unwrap(), "renewed");
    refresh.assert_async().await;
    assert_eq!(login.calls(), 0);

    let saved = store.load().unwrap().unwrap();
    assert_eq!(saved.access_token, "renewed");
    assert_eq!(saved.refresh_token.as_deref(), Some("old-refresh"));
    assert!(saved.expires_at > now + Duration::minutes(20));
}

#[tokio::test]
async fn rejected_refresh_falls_back_to_login() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/oauth_token.do")
        .with_status(400)
        .with_body(r#"{"error":"invalid_grant"}"#)
        .create_async()
        .await;

    let dir = TempDir::new().unwrap();
    let store = TokenStore::new(dir.path().join(".token_cache.json"), TokenCipher::plain());
    let now = now_ms();
    store
        .save(&cache("expired", now - Duration::minutes(1), now - Duration::minutes(2)))
        .unwrap();

    let login = StubLogin::new();
    let manager = CredentialManager::new(
        store,
        oauth(format!("{}/oauth_token.do", server.url())),
        AuthMode::OAuthBrowser,
    )
    .with_login(login.clone());

    assert_eq!(manager.get_valid_token().await.unwrap(), "browser-token");
    assert_eq!(login.calls(), 1);
}

#[tokio::test]
async fn cache_under_a_different_secret_is_discarded() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(".token_cache.json");
    let now = now_ms();
    TokenStore::new(&path, TokenCipher::new(Some("first-secret")))
        .save(&cache("old", now + Duration::hours(1), now))
        .unwrap();

    let store = TokenStore::new(&path, TokenCipher::new(Some("second-secret")));
    let login = StubLogin::new();
    let manager = CredentialManager::new(
        store.clone(),
        oauth("http://127.0.0.1:9/oauth_token.do".into()),
        AuthMode::OAuthBrowser,
    )
    .with_login(login.clone());

    assert_eq!(manager.get_valid_token().await.unwrap(), "browser-token");
    assert_eq!(login.calls(), 1);
    assert_eq!(store.load().unwrap().unwrap().access_token, "browser-token");
}

#[tokio::test]
async fn corrupt_cache_file_is_discarded() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(".token_cache.json");
    fs::write(&path, "not-a-cache").unwrap();

    let store = TokenStore::new(&path, TokenCipher::new(Some("k")));
    let manager = CredentialManager::new(
        store,
        oauth("http://127.0.0.1:9/oauth_token.do".into()),
        AuthMode::Unknown,
    );

    let err = manager.get_valid_token().await.unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Auth);
    assert!(!path.exists());
}

#[tokio::test]
async fn basic_mode_without_cache_never_prompts() {
    let dir = TempDir::new().unwrap();
    let store = TokenStore::new(dir.path().join(".token_cache.json"), TokenCipher::plain());
    let login = StubLogin::new();
    let manager = CredentialManager::new(
        store,
        oauth("http://127.0.0.1:9/oauth_token.do".into()),
        AuthMode::Basic,
    )
    .with_login(login.clone());

    let err = manager.get_valid_token().await.unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Auth);
    assert!(err.is_fatal());
    assert_eq!(login.calls(), 0);
}

#[tokio::test]
async fn logout_removes_the_cache() {
    let dir = TempDir::new().unwrap();
    let store = TokenStore::new(dir.path().join(".token_cache.json"), TokenCipher::plain());
    let now = now_ms();
    store.save(&cache("x", now + Duration::hours(1), now)).unwrap();

    let manager = CredentialManager::new(
        store.clone(),
        oauth("http://127.0.0.1:9/oauth_token.do".into()),
        AuthMode::OAuthBrowser,
    );
    manager.logout().unwrap();
    assert!(!store.exists());
}

#[tokio::test]
async fn login_token_is_used_even_when_the_cache_cannot_be_written() {
    let dir = TempDir::new().unwrap();
    let blocker = dir.path().join("not-a-dir");
    fs::write(&blocker, "file").unwrap();
    let store = TokenStore::new(blocker.join(".token_cache.json"), TokenCipher::plain());

    let login = StubLogin::new();
    let manager = CredentialManager::new(
        store.clone(),
        oauth("http://127.0.0.1:9/oauth_token.do".into()),
        AuthMode::OAuthBrowser,
    )
    .with_login(login.clone());

    assert_eq!(manager.get_valid_token().await.unwrap(), "browser-token");
    assert_eq!(login.calls(), 1);
    assert!(!store.exists());
}
