use crate::config::REDIRECT_URI;
use crate::error::{errors, SnResult, SnSyncError};
use crate::project::Credentials;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

/// OAuth configuration
#[derive(Clone, Serialize, Deserialize)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub authorize_url: String,
    pub token_url: String,
    pub redirect_uri: String,
}

impl std::fmt::Debug for OAuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthConfig")
            .field("client_id", &self.client_id)
            .field("authorize_url", &self.authorize_url)
            .field("token_url", &self.token_url)
            .field("redirect_uri", &self.redirect_uri)
            .finish()
    }
}

impl OAuthConfig {
    /// Endpoints of the configured instance with the fixed local redirect
    pub fn for_instance(credentials: &Credentials) -> Self {
        Self {
            client_id: credentials.client_id.clone().unwrap_or_default(),
            client_secret: credentials.client_secret.clone().unwrap_or_default(),
            authorize_url: credentials.authorize_url(),
            token_url: credentials.token_url(),
            redirect_uri: REDIRECT_URI.to_string(),
        }
    }
}

/// OAuth token response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthTokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: u64,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

/// Token endpoint client for the authorization-code and refresh-token grants
#[derive(Debug, Clone)]
pub struct OAuthClient {
    config: OAuthConfig,
    http: reqwest::Client,
}

impl OAuthClient {
    pub fn new(config: OAuthConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    /// Get configuration reference
    pub fn config(&self) -> &OAuthConfig {
        &self.config
    }

    /// Validate configuration
    pub fn validate_config(&self) -> SnResult<()> {
        if self.config.client_id.is_empty() {
            return Err(errors::config_error(
                "Client ID is required for browser login. Set SN_CLIENT_ID in the project .env",
            ));
        }
        Ok(())
    }

    /// URL the user opens to grant access
    pub fn authorization_url(&self) -> String {
        format!(
            "{}?response_type=code&client_id={}&redirect_uri={}",
            self.config.authorize_url,
            urlencoding::encode(&self.config.client_id),
            urlencoding::encode(&self.config.redirect_uri)
        )
    }

    /// Exchange an authorization code for tokens
    pub async fn exchange_code(&self, code: &str) -> SnResult<OAuthTokenResponse> {
        info!("Authorization code received, exchanging for token...");
        let params = [
            ("grant_type", "authorization_code"),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("code", code),
            ("redirect_uri", self.config.redirect_uri.as_str()),
        ];
        self.token_request(&params).await
    }

    /// Refresh access token
    pub async fn refresh_access_token(&self, refresh_token: &str) -> SnResult<OAuthTokenResponse> {
        info!("Refreshing OAuth access token...");
        let params = [
            ("grant_type", "refresh_token"),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("refresh_token", refresh_token),
        ];
        self.token_request(&params).await
    }

    async fn token_request(&self, params: &[(&str, &str)]) -> SnResult<OAuthTokenResponse> {
        // Add timeout for network requests
        let timeout_duration = Duration::from_secs(15);
        let response = self
            .http
            .post(&self.config.token_url)
            .form(params)
            .timeout(timeout_duration)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        debug!("Token endpoint responded with {}", status);
        if status.is_success() {
            response
                .json::<OAuthTokenResponse>()
                .await
                .map_err(transport_error)
        } else {
            let error_text = response.text().await.unwrap_or_default();
            Err(errors::auth_error(format!(
                "Token endpoint rejected the request ({}): {}",
                status, error_text
            )))
        }
    }
}

/// Token endpoint failures are credential failures, whatever the transport says.
fn transport_error(err: reqwest::Error) -> SnSyncError {
    SnSyncError::Auth {
        message: format!("Token endpoint request failed: {err}"),
        source: Some(Box::new(err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(token_url: String) -> OAuthConfig {
        OAuthConfig {
            client_id: "client id".into(),
            client_secret: "secret".into(),
            authorize_url: "https://dev1.service-now.com/oauth_auth.do".into(),
            token_url,
            redirect_uri: REDIRECT_URI.into(),
        }
    }

    #[test]
    fn authorization_url_encodes_parameters() {
        let client = OAuthClient::new(config("http://unused".into()));
        assert_eq!(
            client.authorization_url(),
            "https://dev1.service-now.com/oauth_auth.do?response_type=code&client_id=client%20id&redirect_uri=http%3A%2F%2Flocalhost%3A3000%2Fcallback"
        );
    }

    #[test]
    fn test_config_validation() {
        let mut cfg = config("http://unused".into());
        assert!(OAuthClient::new(cfg.clone()).validate_config().is_ok());
        cfg.client_id.clear();
        assert!(OAuthClient::new(cfg).validate_config().is_err());
    }

    #[tokio::test]
    async fn rejected_refresh_is_an_auth_error() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/oauth_token.do")
            .with_status(401)
            .with_body(r#"{"error":"invalid_grant"}"#)
            .create_async()
            .await;

        let client = OAuthClient::new(config(format!("{}/oauth_token.do", server.url())));
        let err = client.refresh_access_token("stale").await.unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("invalid_grant"));
    }

    #[tokio::test]
    async fn code_exchange_posts_the_grant() {
        let mut server = mockito::Server::new_async().await;
        let m = server
            .mock("POST", "/oauth_token.do")
            .match_body(mockito::Matcher::AllOf(vec![
                mockito::Matcher::UrlEncoded("grant_type".into(), "authorization_code".into()),
                mockito::Matcher::UrlEncoded("code".into(), "xyz".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"access_token":"at","refresh_token":"rt","expires_in":1799}"#)
            .create_async()
            .await;

        let client = OAuthClient::new(config(format!("{}/oauth_token.do", server.url())));
        let tokens = client.exchange_code("xyz").await.unwrap();
        assert_eq!(tokens.access_token, "at");
        assert_eq!(tokens.refresh_token.as_deref(), Some("rt"));
        assert_eq!(tokens.expires_in, 1799);
        m.assert_async().await;
    }
}
