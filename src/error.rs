//! Unified error handling for snsync
//!
//! Every failure surfaced by the sync engine or the credential manager is a
//! [`SnSyncError`]. Bulk operations keep going past most of them; an
//! [`SnSyncError::Auth`] stops the whole run because no further
//! authenticated request can succeed.

use std::fmt;
use std::io;
use thiserror::Error;

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum SnSyncError {
    /// Invalid or missing mapping document / credentials
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// No usable credential path
    #[error("Authentication error: {message}")]
    Auth {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Local version marker disagrees with the remote record
    #[error("Version conflict on {table}/{sys_id}: local {local_version}, remote {remote_version}")]
    Conflict {
        table: String,
        sys_id: String,
        local_version: String,
        remote_version: String,
        updated_by: Option<String>,
    },

    /// Unmapped table, missing marker, unknown record
    #[error("Not found: {message}")]
    NotFound { message: String, what: String },

    /// Non-success response or transport failure talking to the instance
    #[error("Remote error: {message}")]
    Remote {
        message: String,
        status: Option<u16>,
        url: Option<String>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Filesystem errors
    #[error("Filesystem error: {message} (path: {path})")]
    Filesystem {
        message: String,
        path: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Token cache cannot be decrypted with the configured secret
    #[error("Crypto error: {message}")]
    Crypto { message: String },

    /// Input rejected before any remote call
    #[error("Validation error: {message}")]
    Validation {
        message: String,
        field: Option<String>,
        value: Option<String>,
    },
}

/// Error categories
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Config,
    Auth,
    Conflict,
    NotFound,
    Remote,
    Filesystem,
    Crypto,
    Validation,
}

impl ErrorCategory {
    pub fn display_name(&self) -> &'static str {
        match self {
            ErrorCategory::Config => "Configuration",
            ErrorCategory::Auth => "Authentication",
            ErrorCategory::Conflict => "Conflict",
            ErrorCategory::NotFound => "Not Found",
            ErrorCategory::Remote => "Remote",
            ErrorCategory::Filesystem => "Filesystem",
            ErrorCategory::Crypto => "Crypto",
            ErrorCategory::Validation => "Validation",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl SnSyncError {
    /// Get error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            SnSyncError::Config { .. } => ErrorCategory::Config,
            SnSyncError::Auth { .. } => ErrorCategory::Auth,
            SnSyncError::Conflict { .. } => ErrorCategory::Conflict,
            SnSyncError::NotFound { .. } => ErrorCategory::NotFound,
            SnSyncError::Remote { .. } => ErrorCategory::Remote,
            SnSyncError::Filesystem { .. } => ErrorCategory::Filesystem,
            SnSyncError::Crypto { .. } => ErrorCategory::Crypto,
            SnSyncError::Validation { .. } => ErrorCategory::Validation,
        }
    }

    /// True for errors that must abort the whole operation.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SnSyncError::Auth { .. })
    }

    /// Version mismatch between the local markers and the instance
    pub fn is_conflict(&self) -> bool {
        matches!(self, SnSyncError::Conflict { .. })
    }

    /// HTTP status of a remote failure, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            SnSyncError::Remote { status, .. } => *status,
            _ => None,
        }
    }

    /// Get user-friendly message
    pub fn user_message(&self) -> String {
        match self {
            SnSyncError::Config { message, .. } => {
                format!("Configuration problem: {}", message)
            }
            SnSyncError::Auth { message, .. } => {
                format!("Authentication failed: {}", message)
            }
            SnSyncError::Conflict {
                table,
                sys_id,
                local_version,
                remote_version,
                updated_by,
            } => {
                let by = updated_by
                    .as_deref()
                    .map(|user| format!(" (by {})", user))
                    .unwrap_or_default();
                format!(
                    "BLOCKED: version conflict on {}/{}.\n   Local:    {}\n   Server:   {}{}\n   Solution: save your changes elsewhere, pull again and re-apply them.",
                    table, sys_id, local_version, remote_version, by
                )
            }
            SnSyncError::NotFound { message, .. } => message.clone(),
            SnSyncError::Remote {
                message, status, ..
            } => match status {
                Some(code) => format!("Instance returned HTTP {}: {}", code, message),
                None => format!("Request failed: {}", message),
            },
            SnSyncError::Filesystem { message, .. } => {
                format!("File system problem: {}", message)
            }
            SnSyncError::Crypto { message } => {
                format!("Token cache unreadable: {}", message)
            }
            SnSyncError::Validation { message, .. } => {
                format!("Input validation failed: {}", message)
            }
        }
    }
}

impl From<io::Error> for SnSyncError {
    fn from(err: io::Error) -> Self {
        SnSyncError::Filesystem {
            message: format!("I/O error: {err}"),
            path: "<io>".to_string(),
            source: Some(Box::new(err)),
        }
    }
}

impl From<reqwest::Error> for SnSyncError {
    fn from(err: reqwest::Error) -> Self {
        SnSyncError::Remote {
            message: format!("HTTP request failed: {err}"),
            status: err.status().map(|s| s.as_u16()),
            url: err.url().map(|u| u.to_string()),
            source: Some(Box::new(err)),
        }
    }
}

/// Result type alias for convenience
pub type SnResult<T> = Result<T, SnSyncError>;

/// Convenience functions for creating common errors
pub mod errors {
    use super::*;
    use std::path::Path;

    pub fn config_error(message: impl Into<String>) -> SnSyncError {
        SnSyncError::Config {
            message: message.into(),
            source: None,
        }
    }

    pub fn config_error_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> SnSyncError {
        SnSyncError::Config {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn auth_error(message: impl Into<String>) -> SnSyncError {
        SnSyncError::Auth {
            message: message.into(),
            source: None,
        }
    }

    pub fn not_found(what: impl Into<String>, message: impl Into<String>) -> SnSyncError {
        SnSyncError::NotFound {
            message: message.into(),
            what: what.into(),
        }
    }

    pub fn remote_error(
        status: Option<u16>,
        url: Option<String>,
        message: impl Into<String>,
    ) -> SnSyncError {
        SnSyncError::Remote {
            message: message.into(),
            status,
            url,
            source: None,
        }
    }

    pub fn filesystem_error(path: &Path, err: io::Error) -> SnSyncError {
        SnSyncError::Filesystem {
            message: err.to_string(),
            path: path.display().to_string(),
            source: Some(Box::new(err)),
        }
    }

    pub fn crypto_error(message: impl Into<String>) -> SnSyncError {
        SnSyncError::Crypto {
            message: message.into(),
        }
    }

    pub fn validation_error(
        message: impl Into<String>,
        field: Option<String>,
        value: Option<String>,
    ) -> SnSyncError {
        SnSyncError::Validation {
            message: message.into(),
            field,
            value,
        }
    }
}

/// Attach a path to `std::io` failures.
pub trait IoContext<T> {
    fn with_path(self, path: &std::path::Path) -> SnResult<T>;
}

impl<T> IoContext<T> for io::Result<T> {
    fn with_path(self, path: &std::path::Path) -> SnResult<T> {
        self.map_err(|err| errors::filesystem_error(path, err))
    }
}
