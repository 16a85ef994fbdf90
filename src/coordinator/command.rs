use futures::future::BoxFuture;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::backend::{EndpointKey, RemoteEndpoint};
use crate::types::{FolderKey, Priority, Result};

pub type CommandFuture<T> = BoxFuture<'static, Result<T>>;

/// Body of a command. It may be invoked twice when the first attempt hits a
/// dropped connection and the session is re-established.
pub type CommandBody<T> = Arc<dyn Fn(Arc<dyn RemoteEndpoint>) -> CommandFuture<T> + Send + Sync>;

/// Deduplication key: `kind:service:account[:folder][:param...]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CommandIdentity(String);

impl CommandIdentity {
    pub fn new(kind: &str, endpoint: &EndpointKey) -> Self {
        Self(format!("{}:{}:{}", kind, endpoint.kind, endpoint.account_id))
    }

    pub fn folder(mut self, folder: &FolderKey) -> Self {
        self.0.push(':');
        self.0.push_str(&folder.folder);
        self
    }

    pub fn param(mut self, param: impl fmt::Display) -> Self {
        self.0.push(':');
        self.0.push_str(&param.to_string());
        self
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CommandIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<CommandIdentity> for String {
    fn from(identity: CommandIdentity) -> Self {
        identity.0
    }
}

/// A unit of remote work bound to an identity, a priority and a body.
pub struct Command<T> {
    pub(crate) identity: Option<String>,
    pub(crate) priority: Priority,
    pub(crate) body: CommandBody<T>,
}

impl<T: Send + 'static> Command<T> {
    /// Command coalesced with concurrent commands of the same identity. An
    /// empty identity disables coalescing.
    pub fn new<F, Fut>(identity: impl Into<String>, priority: Priority, body: F) -> Self
    where
        F: Fn(Arc<dyn RemoteEndpoint>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let identity: String = identity.into();
        Self {
            identity: (!identity.is_empty()).then_some(identity),
            priority,
            body: Arc::new(move |endpoint| Box::pin(body(endpoint))),
        }
    }

    /// Command that always runs on its own.
    pub fn uncoalesced<F, Fut>(priority: Priority, body: F) -> Self
    where
        F: Fn(Arc<dyn RemoteEndpoint>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        Self::new(String::new(), priority, body)
    }

    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }
}
