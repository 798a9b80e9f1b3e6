//! Interactive authorization-code login
//!
//! A throwaway HTTP listener on the redirect target receives exactly one
//! callback. The listener is shut down on every exit path: success, a
//! callback without a code, a failed exchange, or a timeout.

use super::oauth_client::{OAuthClient, OAuthTokenResponse};
use crate::error::{errors, SnResult};
use async_trait::async_trait;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

const SUCCESS_PAGE: &str =
    "<h1>Login successful!</h1><p>You can close this window and return to the terminal.</p>";
const MISSING_CODE_PAGE: &str = "Error: Code not received.";

/// Source of fresh tokens when the cache cannot provide one
#[async_trait]
pub trait InteractiveLogin: Send + Sync {
    async fn login(&self) -> SnResult<OAuthTokenResponse>;
}

/// Authorization-code flow through the system browser
pub struct BrowserLogin {
    oauth: OAuthClient,
    timeout: Duration,
    open_browser: bool,
}

impl BrowserLogin {
    pub fn new(oauth: OAuthClient, timeout: Duration) -> Self {
        Self {
            oauth,
            timeout,
            open_browser: true,
        }
    }

    /// Print the URL instead of launching a browser
    pub fn without_browser(mut self) -> Self {
        self.open_browser = false;
        self
    }

    async fn run(&self, server: &mut CallbackServer) -> SnResult<OAuthTokenResponse> {
        let url = self.oauth.authorization_url();
        println!("🚀 Opening browser for login: {}", url);
        if self.open_browser {
            if let Err(e) = open::that(&url) {
                warn!("Could not open a browser ({}); open the URL above manually", e);
            }
        }

        let code = match tokio::time::timeout(self.timeout, server.next_code()).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(errors::auth_error(format!(
                    "No login callback received within {}s",
                    self.timeout.as_secs()
                )))
            }
        };
        self.oauth.exchange_code(&code).await
    }
}

#[async_trait]
impl InteractiveLogin for BrowserLogin {
    async fn login(&self) -> SnResult<OAuthTokenResponse> {
        self.oauth.validate_config()?;
        let addr = callback_addr(&self.oauth.config().redirect_uri)?;

        info!("Starting local authentication server on {}", addr);
        let mut server = CallbackServer::bind(addr).await?;
        let outcome = self.run(&mut server).await;
        server.close().await;
        outcome
    }
}

/// Local address to listen on for a `http://localhost:<port>/callback` redirect
fn callback_addr(redirect_uri: &str) -> SnResult<SocketAddr> {
    let url = Url::parse(redirect_uri).map_err(|e| {
        errors::config_error_with_source(format!("Invalid redirect URI {}", redirect_uri), e)
    })?;
    let port = url
        .port_or_known_default()
        .ok_or_else(|| errors::config_error("Redirect URI has no port"))?;
    Ok(SocketAddr::from(([127, 0, 0, 1], port)))
}

type CodeSender = oneshot::Sender<Result<String, String>>;

#[derive(Clone)]
struct CallbackState {
    sender: Arc<Mutex<Option<CodeSender>>>,
}

/// One-shot callback listener
pub(crate) struct CallbackServer {
    local_addr: SocketAddr,
    code: Option<oneshot::Receiver<Result<String, String>>>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl CallbackServer {
    pub(crate) async fn bind(addr: SocketAddr) -> SnResult<Self> {
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            errors::auth_error(format!("Cannot listen for the login callback on {}: {}", addr, e))
        })?;
        let local_addr = listener.local_addr()?;

        let (code_tx, code_rx) = oneshot::channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let state = CallbackState {
            sender: Arc::new(Mutex::new(Some(code_tx))),
        };
        let app = Router::new()
            .route("/callback", get(handle_callback))
            .with_state(state);

        let task = tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            });
            if let Err(e) = server.await {
                warn!("Login callback server stopped: {}", e);
            }
        });

        Ok(Self {
            local_addr,
            code: Some(code_rx),
            shutdown: Some(shutdown_tx),
            task: Some(task),
        })
    }

    pub(crate) fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Wait for the single callback request.
    pub(crate) async fn next_code(&mut self) -> SnResult<String> {
        let receiver = self
            .code
            .take()
            .ok_or_else(|| errors::auth_error("Login callback already consumed"))?;
        match receiver.await {
            Ok(Ok(code)) => Ok(code),
            Ok(Err(reason)) => Err(errors::auth_error(format!("Login failed: {}", reason))),
            Err(_) => Err(errors::auth_error("Login callback server stopped unexpectedly")),
        }
    }

    /// Stop listening and release the port.
    pub(crate) async fn close(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        debug!("Login callback server on {} closed", self.local_addr);
    }
}

impl Drop for CallbackServer {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

async fn handle_callback(
    State(state): State<CallbackState>,
    Query(params): Query<HashMap<String, String>>,
) -> (StatusCode, Html<&'static str>) {
    let outcome = match params.get("code").filter(|code| !code.is_empty()) {
        Some(code) => Ok(code.clone()),
        None => Err(params
            .get("error_description")
            .or_else(|| params.get("error"))
            .cloned()
            .unwrap_or_else(|| "No code received".to_string())),
    };

    let response = match &outcome {
        Ok(_) => (StatusCode::OK, Html(SUCCESS_PAGE)),
        Err(_) => (StatusCode::BAD_REQUEST, Html(MISSING_CODE_PAGE)),
    };
    if let Some(sender) = state.sender.lock().await.take() {
        let _ = sender.send(outcome);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::oauth_client::OAuthConfig;

    async fn local_server() -> CallbackServer {
        CallbackServer::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn callback_with_code_resolves_and_port_is_released() {
        let mut server = local_server().await;
        let addr = server.local_addr();

        let hit = tokio::spawn(async move {
            reqwest::get(format!("http://{}/callback?code=abc123", addr))
                .await
                .unwrap()
                .status()
        });
        assert_eq!(server.next_code().await.unwrap(), "abc123");
        assert_eq!(hit.await.unwrap(), reqwest::StatusCode::OK);

        server.close().await;
        // The port can be bound again once the listener is gone.
        let rebound = TcpListener::bind(addr).await;
        assert!(rebound.is_ok());
    }

    #[tokio::test]
    async fn callback_without_code_fails_with_auth_error() {
        let mut server = local_server().await;
        let addr = server.local_addr();

        let hit = tokio::spawn(async move {
            reqwest::get(format!("http://{}/callback?error=access_denied", addr))
                .await
                .unwrap()
                .status()
        });
        let err = server.next_code().await.unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("access_denied"));
        assert_eq!(hit.await.unwrap(), reqwest::StatusCode::BAD_REQUEST);
        server.close().await;
        assert!(TcpListener::bind(addr).await.is_ok());
    }

    #[tokio::test]
    async fn login_times_out_and_releases_the_port() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let oauth = OAuthClient::new(OAuthConfig {
            client_id: "cid".into(),
            client_secret: String::new(),
            authorize_url: "http://127.0.0.1:9/oauth_auth.do".into(),
            token_url: "http://127.0.0.1:9/oauth_token.do".into(),
            redirect_uri: format!("http://localhost:{}/callback", port),
        });
        let login = BrowserLogin::new(oauth, Duration::from_millis(200)).without_browser();

        let err = login.login().await.unwrap_err();
        assert!(err.to_string().contains("No login callback"));
        assert!(TcpListener::bind(("127.0.0.1", port)).await.is_ok());
    }

    #[test]
    fn callback_addr_uses_the_redirect_port() {
        let addr = callback_addr("http://localhost:3000/callback").unwrap();
        assert_eq!(addr.port(), 3000);
        assert!(addr.ip().is_loopback());
    }
}
