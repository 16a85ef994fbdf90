//! Remote endpoint contract
//!
//! The wire protocols (IMAP, decentralized storage, proprietary web APIs)
//! live outside this crate. They plug in by implementing [`RemoteEndpoint`]
//! and mapping their transport failures onto the [`SyncError`] kinds.
//!
//! Callers never use an endpoint directly: every request goes through the
//! [`Coordinator`](crate::coordinator::Coordinator), which holds the
//! endpoint's priority gate and makes sure the session is connected and
//! authenticated first.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::config::AccountConfig;
use crate::credentials::Credentials;
use crate::types::{FolderKey, Message, Result, SequenceId};

/// Kind of remote mail service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServiceKind {
    #[default]
    Imap,
    Decentralized,
    WebApi,
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Imap => write!(f, "imap"),
            Self::Decentralized => write!(f, "decentralized"),
            Self::WebApi => write!(f, "web-api"),
        }
    }
}

/// Identity of one remote mail service instance: service kind + account.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EndpointKey {
    pub kind: ServiceKind,
    pub account_id: String,
}

impl EndpointKey {
    pub fn new(kind: ServiceKind, account_id: impl Into<String>) -> Self {
        Self {
            kind,
            account_id: account_id.into(),
        }
    }
}

impl fmt::Display for EndpointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.account_id)
    }
}

/// Flag mutation requested by the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlagChange {
    Read(bool),
    Flagged(bool),
}

impl FlagChange {
    pub fn apply(self, message: &mut Message) {
        match self {
            Self::Read(value) => message.is_read = value,
            Self::Flagged(value) => message.is_flagged = value,
        }
    }
}

#[async_trait]
pub trait RemoteEndpoint: Send + Sync {
    fn key(&self) -> &EndpointKey;

    /// Whether a live, authenticated session exists.
    async fn is_connected(&self) -> bool;

    async fn connect(&self) -> Result<()>;

    async fn authenticate(&self, credentials: &Credentials) -> Result<()>;

    /// Tear down the current session, if any. Best effort.
    async fn disconnect(&self);

    /// Up to `max_count` messages with ids strictly below `from_exclusive`,
    /// newest first.
    async fn fetch_older_than(
        &self,
        folder: &FolderKey,
        from_exclusive: SequenceId,
        max_count: usize,
    ) -> Result<Vec<Message>>;

    /// Messages with ids in `[from, from + count)`. Ids that no longer exist
    /// are simply absent from the result.
    async fn fetch_range(
        &self,
        folder: &FolderKey,
        from: SequenceId,
        count: usize,
    ) -> Result<Vec<Message>>;

    async fn store_flags(
        &self,
        folder: &FolderKey,
        ids: &[SequenceId],
        change: FlagChange,
    ) -> Result<()>;
}

/// Builds the endpoint for a configured account. Protocol crates register
/// one of these with the [`SyncManager`](crate::state::SyncManager).
pub trait EndpointFactory: Send + Sync {
    fn endpoint(&self, account: &AccountConfig) -> Result<Arc<dyn RemoteEndpoint>>;
}

impl<F> EndpointFactory for F
where
    F: Fn(&AccountConfig) -> Result<Arc<dyn RemoteEndpoint>> + Send + Sync,
{
    fn endpoint(&self, account: &AccountConfig) -> Result<Arc<dyn RemoteEndpoint>> {
        self(account)
    }
}
