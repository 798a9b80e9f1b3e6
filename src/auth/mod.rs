//! Credential lifecycle: token cache, refresh, idle timeout and browser login

pub mod browser_login;
pub mod credential_manager;
pub mod oauth_client;
pub mod token_cache;

pub use browser_login::{BrowserLogin, InteractiveLogin};
pub use credential_manager::CredentialManager;
pub use oauth_client::{OAuthClient, OAuthConfig, OAuthTokenResponse};
pub use token_cache::{TokenCache, TokenCipher, TokenStore};
