//! Instance credentials (the project's `.env` document, already loaded into
//! the process environment by the binary)

use crate::config::{
    CLIENT_ID_ENV, CLIENT_SECRET_ENV, ENC_SECRET_ENV, INSTANCE_ENV, PASSWORD_ENV, USER_ENV,
};
use crate::error::{errors, SnResult};
use std::fmt;
use url::Url;

/// How requests are authorized
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    /// Client id present, no password: authorization-code flow in the browser
    OAuthBrowser,
    /// User and password: HTTP basic auth
    Basic,
    Unknown,
}

impl fmt::Display for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AuthMode::OAuthBrowser => "OAUTH_BROWSER",
            AuthMode::Basic => "BASIC",
            AuthMode::Unknown => "UNKNOWN",
        })
    }
}

#[derive(Clone, Default)]
pub struct Credentials {
    pub instance: String,
    pub user: Option<String>,
    pub password: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    /// Secret used to encrypt the token cache at rest
    pub enc_secret: Option<String>,
}

// Secrets stay out of logs.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("instance", &self.instance)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "***"))
            .field("enc_secret", &self.enc_secret.as_ref().map(|_| "***"))
            .finish()
    }
}

impl Credentials {
    /// Read credentials from the process environment
    pub fn from_env() -> SnResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build credentials from any key lookup; empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> SnResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let instance = get(INSTANCE_ENV).ok_or_else(|| {
            errors::config_error(format!(
                "{} is not set. Add it to the project's .env file",
                INSTANCE_ENV
            ))
        })?;
        let parsed = Url::parse(&instance).map_err(|e| {
            errors::config_error_with_source(format!("Invalid {}: {}", INSTANCE_ENV, instance), e)
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(errors::config_error(format!(
                "{} must be an http(s) URL, got {}",
                INSTANCE_ENV, instance
            )));
        }

        Ok(Self {
            instance: instance.trim_end_matches('/').to_string(),
            user: get(USER_ENV),
            password: get(PASSWORD_ENV),
            client_id: get(CLIENT_ID_ENV),
            client_secret: get(CLIENT_SECRET_ENV),
            enc_secret: get(ENC_SECRET_ENV),
        })
    }

    pub fn auth_mode(&self) -> AuthMode {
        if self.client_id.is_some() && self.password.is_none() {
            AuthMode::OAuthBrowser
        } else if self.user.is_some() {
            AuthMode::Basic
        } else {
            AuthMode::Unknown
        }
    }

    pub fn token_url(&self) -> String {
        format!("{}/oauth_token.do", self.instance)
    }

    pub fn authorize_url(&self) -> String {
        format!("{}/oauth_auth.do", self.instance)
    }
}
