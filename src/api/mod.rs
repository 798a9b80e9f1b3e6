//! Authenticated Table API access

pub mod auth;
pub mod client;
pub mod types;

pub use auth::{authenticator_for, Authenticator, BasicAuth, NoCredentials};
pub use client::{record_url, TableClient};
pub use types::{value_text, DisplayValue, ListQuery, Record};
