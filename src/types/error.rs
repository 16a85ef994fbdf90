//! Unified error type for the sync core
//!
//! Every error is `Clone` so a single outcome can be handed to all callers
//! that were coalesced onto one remote command, and serializable so it can
//! travel inside a [`SyncEvent`](crate::sync::SyncEvent).

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "type", content = "message")]
pub enum SyncError {
    /// Transport, socket or TLS failure.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Credentials were rejected by the remote side.
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// A message or folder vanished server-side between enumeration and fetch.
    #[error("Remote object missing: {0}")]
    RemoteObjectMissing(String),

    /// A protocol invariant was violated (malformed or out-of-order response).
    #[error("Core error: {0}")]
    Core(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Credential error: {0}")]
    Credential(String),

    #[error("Operation cancelled")]
    Cancelled,
}

impl SyncError {
    /// Connection and authentication failures end the current sync run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Authentication(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<rusqlite::Error> for SyncError {
    fn from(err: rusqlite::Error) -> Self {
        SyncError::Database(err.to_string())
    }
}

impl From<r2d2::Error> for SyncError {
    fn from(err: r2d2::Error) -> Self {
        SyncError::Database(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::Config(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Core(err.to_string())
    }
}

/// Result type alias using SyncError
pub type Result<T> = std::result::Result<T, SyncError>;
