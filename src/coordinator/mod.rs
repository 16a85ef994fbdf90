//! Remote-access coordination
//!
//! Every remote operation (sync batch, fetch-by-id, flag store) runs as a
//! [`Command`] through the [`Coordinator`]:
//!
//! 1. Commands with the same identity that overlap in time are coalesced:
//!    one leader runs the body, everyone else receives the leader's outcome.
//! 2. The leader takes the endpoint's [`PriorityGate`] at the command's
//!    priority, makes sure the session is connected and authenticated, and
//!    runs the body. A body that fails with a connection error gets exactly
//!    one reconnect-and-retry.
//! 3. The body runs on its own task, so a caller that cancels its wait
//!    (leader included) never cancels work other waiters depend on.

pub mod coalesce;
pub mod command;
pub mod gate;

use dashmap::DashMap;
use std::any::Any;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::{EndpointKey, RemoteEndpoint};
use crate::credentials::CredentialProvider;
use crate::types::{Priority, Result, SyncError};

pub use coalesce::{CoalescingRegistry, Joined, Publication, SharedOutcome};
pub use command::{Command, CommandBody, CommandFuture, CommandIdentity};
pub use gate::{GateGuard, PriorityGate};

/// Process-wide coordination state, owned by the composition root.
pub struct Coordinator {
    gates: DashMap<EndpointKey, Arc<PriorityGate>>,
    inflight: CoalescingRegistry,
    credentials: Arc<dyn CredentialProvider>,
}

impl Coordinator {
    pub fn new(credentials: Arc<dyn CredentialProvider>) -> Self {
        Self {
            gates: DashMap::new(),
            inflight: CoalescingRegistry::new(),
            credentials,
        }
    }

    /// The gate for an endpoint. Gates are created on first use and live as
    /// long as the coordinator.
    pub fn gate(&self, key: &EndpointKey) -> Arc<PriorityGate> {
        self.gates
            .entry(key.clone())
            .or_insert_with(|| {
                debug!(endpoint = %key, "creating priority gate");
                Arc::new(PriorityGate::new())
            })
            .clone()
    }

    pub fn gate_count(&self) -> usize {
        self.gates.len()
    }

    pub fn inflight(&self) -> &CoalescingRegistry {
        &self.inflight
    }

    /// Run a command against `endpoint`.
    ///
    /// Cancelling `cancel` abandons this caller's wait only; the command
    /// itself keeps running for whoever else needs it.
    pub async fn run<T>(
        &self,
        endpoint: &Arc<dyn RemoteEndpoint>,
        command: Command<T>,
        cancel: &CancellationToken,
    ) -> Result<Arc<T>>
    where
        T: Send + Sync + 'static,
    {
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        let Command {
            identity,
            priority,
            body,
        } = command;

        let execution = Execution {
            gate: self.gate(endpoint.key()),
            endpoint: endpoint.clone(),
            credentials: self.credentials.clone(),
            priority,
            body,
        };

        match identity {
            Some(identity) => self.coalesce(&identity, cancel, execution.run()).await,
            None => {
                let handle = tokio::spawn(execution.run());
                wait_for(handle, cancel).await?.map(Arc::new)
            }
        }
    }

    /// Share one execution of `work` among all concurrent callers with the
    /// same identity. `work` runs on its own task and takes no gate; a waiter
    /// drops its `work` unpolled.
    pub async fn coalesce<T, F>(
        &self,
        identity: &str,
        cancel: &CancellationToken,
        work: F,
    ) -> Result<Arc<T>>
    where
        T: Send + Sync + 'static,
        F: Future<Output = Result<T>> + Send + 'static,
    {
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        match self.inflight.join(identity) {
            Joined::Waiter(rx) => {
                debug!(identity, "waiting on in-flight command");
                let outcome = tokio::select! {
                    outcome = rx => outcome.map_err(|_| {
                        SyncError::Core(format!("command {} vanished", identity))
                    })?,
                    _ = cancel.cancelled() => return Err(SyncError::Cancelled),
                };
                downcast(outcome?, identity)
            }
            Joined::Leader(publication) => {
                debug!(identity, "leading command");
                let handle = tokio::spawn(async move {
                    let outcome: SharedOutcome = work
                        .await
                        .map(|value| Arc::new(value) as Arc<dyn Any + Send + Sync>);
                    publication.publish(outcome.clone());
                    outcome
                });
                let outcome = wait_for(handle, cancel).await?;
                downcast(outcome?, identity)
            }
        }
    }
}

struct Execution<T> {
    gate: Arc<PriorityGate>,
    endpoint: Arc<dyn RemoteEndpoint>,
    credentials: Arc<dyn CredentialProvider>,
    priority: Priority,
    body: CommandBody<T>,
}

impl<T> Execution<T> {
    async fn run(self) -> Result<T> {
        let _guard = self.gate.acquire(self.priority).await?;

        ensure_session(self.endpoint.as_ref(), self.credentials.as_ref()).await?;

        match (self.body)(self.endpoint.clone()).await {
            Err(SyncError::Connection(reason)) => {
                warn!(
                    endpoint = %self.endpoint.key(),
                    %reason,
                    "connection lost, reconnecting once"
                );
                self.endpoint.disconnect().await;
                ensure_session(self.endpoint.as_ref(), self.credentials.as_ref()).await?;
                (self.body)(self.endpoint.clone()).await
            }
            other => other,
        }
    }
}

/// Connect and authenticate unless a live session already exists.
async fn ensure_session(
    endpoint: &dyn RemoteEndpoint,
    credentials: &dyn CredentialProvider,
) -> Result<()> {
    if endpoint.is_connected().await {
        return Ok(());
    }

    info!(endpoint = %endpoint.key(), "connecting");
    endpoint.connect().await?;
    let creds = credentials.credentials(endpoint.key()).await?;
    endpoint.authenticate(&creds).await?;
    debug!(endpoint = %endpoint.key(), "session ready");
    Ok(())
}

async fn wait_for<R>(handle: JoinHandle<R>, cancel: &CancellationToken) -> Result<R> {
    tokio::select! {
        joined = handle => joined.map_err(|e| SyncError::Core(format!("command task failed: {}", e))),
        _ = cancel.cancelled() => Err(SyncError::Cancelled),
    }
}

fn downcast<T>(value: Arc<dyn Any + Send + Sync>, identity: &str) -> Result<Arc<T>>
where
    T: Send + Sync + 'static,
{
    value.downcast::<T>().map_err(|_| {
        SyncError::Core(format!(
            "command {} shared with a different result type",
            identity
        ))
    })
}
