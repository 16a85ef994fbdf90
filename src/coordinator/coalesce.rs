//! In-flight command registry
//!
//! Maps a command identity to the callers waiting on its outcome. The first
//! caller for an identity becomes the leader and runs the work; every later
//! caller parks on a oneshot channel until the leader publishes. An entry
//! lives exactly as long as one execution.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::any::Any;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::types::{Result, SyncError};

/// Type-erased command result shared by the leader and all waiters.
pub type SharedOutcome = Result<Arc<dyn Any + Send + Sync>>;

#[derive(Clone, Default)]
pub struct CoalescingRegistry {
    inflight: Arc<DashMap<String, Vec<oneshot::Sender<SharedOutcome>>>>,
}

/// Role assigned to a caller by [`CoalescingRegistry::join`].
pub enum Joined {
    Leader(Publication),
    Waiter(oneshot::Receiver<SharedOutcome>),
}

impl CoalescingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register as leader for `identity`, or as a waiter if another caller
    /// already leads it. Check and insert happen as one step on the map shard.
    pub fn join(&self, identity: &str) -> Joined {
        match self.inflight.entry(identity.to_string()) {
            Entry::Occupied(mut entry) => {
                let (tx, rx) = oneshot::channel();
                entry.get_mut().push(tx);
                debug!(identity, waiters = entry.get().len(), "joined in-flight command");
                Joined::Waiter(rx)
            }
            Entry::Vacant(entry) => {
                entry.insert(Vec::new());
                Joined::Leader(Publication {
                    registry: self.clone(),
                    identity: identity.to_string(),
                    published: false,
                })
            }
        }
    }

    pub fn is_inflight(&self, identity: &str) -> bool {
        self.inflight.contains_key(identity)
    }

    pub fn len(&self) -> usize {
        self.inflight.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inflight.is_empty()
    }

    fn complete(&self, identity: &str, outcome: SharedOutcome) {
        let waiters = self
            .inflight
            .remove(identity)
            .map(|(_, waiters)| waiters)
            .unwrap_or_default();

        if !waiters.is_empty() {
            debug!(identity, waiters = waiters.len(), "publishing coalesced outcome");
        }
        for waiter in waiters {
            // A waiter that was cancelled has dropped its receiver.
            let _ = waiter.send(outcome.clone());
        }
    }
}

/// Leader's obligation to publish an outcome for its identity.
///
/// Dropped without publishing (panic or abort of the leader's task), it
/// releases every waiter with a `Core` error instead of leaving them hanging.
pub struct Publication {
    registry: CoalescingRegistry,
    identity: String,
    published: bool,
}

impl Publication {
    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn publish(mut self, outcome: SharedOutcome) {
        self.published = true;
        self.registry.complete(&self.identity, outcome);
    }
}

impl Drop for Publication {
    fn drop(&mut self) {
        if !self.published {
            warn!(identity = %self.identity, "command abandoned before publishing");
            self.registry.complete(
                &self.identity,
                Err(SyncError::Core(format!(
                    "command {} abandoned before completion",
                    self.identity
                ))),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_leader_then_waiters() {
        let registry = CoalescingRegistry::new();

        let leader = match registry.join("fetch-folders:acct1") {
            Joined::Leader(p) => p,
            Joined::Waiter(_) => panic!("first caller must lead"),
        };
        let waiter = match registry.join("fetch-folders:acct1") {
            Joined::Waiter(rx) => rx,
            Joined::Leader(_) => panic!("second caller must wait"),
        };
        assert!(registry.is_inflight("fetch-folders:acct1"));

        let value: Arc<dyn Any + Send + Sync> = Arc::new(vec!["INBOX".to_string()]);
        leader.publish(Ok(value.clone()));

        let received = waiter.await.unwrap().unwrap();
        assert!(Arc::ptr_eq(&received, &value));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_abandoned_leader_fails_waiters() {
        let registry = CoalescingRegistry::new();

        let leader = registry.join("sync:acct1:INBOX");
        let waiter = match registry.join("sync:acct1:INBOX") {
            Joined::Waiter(rx) => rx,
            Joined::Leader(_) => panic!("second caller must wait"),
        };

        drop(leader);

        let outcome = waiter.await.unwrap();
        assert!(matches!(outcome, Err(SyncError::Core(_))));
        assert!(!registry.is_inflight("sync:acct1:INBOX"));
    }

    #[test]
    fn test_identity_reusable_after_completion() {
        let registry = CoalescingRegistry::new();

        match registry.join("a") {
            Joined::Leader(p) => p.publish(Err(SyncError::Cancelled)),
            Joined::Waiter(_) => panic!("expected leader"),
        }
        assert!(matches!(registry.join("a"), Joined::Leader(_)));
    }
}
