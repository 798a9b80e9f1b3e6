//! snsync library
//!
//! Bidirectional sync between a local file tree and ServiceNow table
//! records: pull, push with optimistic-concurrency checks, schema context
//! capture and an OAuth credential lifecycle with an encrypted token cache.

pub mod api;
pub mod auth;
pub mod commands;
pub mod config;
pub mod error;
pub mod project;
pub mod sync;
pub mod utils;

pub use error::{ErrorCategory, SnResult, SnSyncError};
pub use project::{Credentials, Workspace};
