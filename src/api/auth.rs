//! Request authorization seam

use crate::auth::CredentialManager;
use crate::error::{errors, SnResult};
use crate::project::{AuthMode, Credentials, Workspace};
use async_trait::async_trait;
use reqwest::RequestBuilder;
use std::sync::Arc;

/// Adds credentials to an outgoing request
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authorize(&self, request: RequestBuilder) -> SnResult<RequestBuilder>;
}

#[async_trait]
impl Authenticator for CredentialManager {
    async fn authorize(&self, request: RequestBuilder) -> SnResult<RequestBuilder> {
        let token = self.get_valid_token().await?;
        Ok(request.bearer_auth(token))
    }
}

/// HTTP basic authentication
#[derive(Clone)]
pub struct BasicAuth {
    user: String,
    password: Option<String>,
}

impl BasicAuth {
    pub fn new(user: impl Into<String>, password: Option<String>) -> Self {
        Self {
            user: user.into(),
            password,
        }
    }
}

#[async_trait]
impl Authenticator for BasicAuth {
    async fn authorize(&self, request: RequestBuilder) -> SnResult<RequestBuilder> {
        Ok(request.basic_auth(&self.user, self.password.as_ref()))
    }
}

/// Neither OAuth nor basic credentials are configured
pub struct NoCredentials;

#[async_trait]
impl Authenticator for NoCredentials {
    async fn authorize(&self, _request: RequestBuilder) -> SnResult<RequestBuilder> {
        Err(errors::auth_error(
            "No credentials configured. Set SN_CLIENT_ID for browser login or SN_USER and SN_PASSWORD",
        ))
    }
}

/// Pick the authenticator matching the configured auth mode.
pub fn authenticator_for(workspace: &Workspace, credentials: &Credentials) -> Arc<dyn Authenticator> {
    match credentials.auth_mode() {
        AuthMode::OAuthBrowser => Arc::new(CredentialManager::for_workspace(workspace, credentials)),
        AuthMode::Basic => Arc::new(BasicAuth::new(
            credentials.user.clone().unwrap_or_default(),
            credentials.password.clone(),
        )),
        AuthMode::Unknown => Arc::new(NoCredentials),
    }
}
