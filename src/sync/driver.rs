//! Per-account sync driver
//!
//! Turns folder syncs, single-message fetches and flag changes into
//! coordinated commands against the account's endpoint, writes the results
//! to the local cache, and publishes what changed as [`SyncEvent`]s.

use async_trait::async_trait;
use flume::{Receiver, Sender};
use futures::future::join_all;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::events::SyncEvent;
use super::reconcile::{ReconcileObserver, ReconcileReport, Reconciler, RemoteBatches, Window};
use crate::adapters::LocalStore;
use crate::backend::{FlagChange, RemoteEndpoint};
use crate::config::{AccountConfig, SyncConfig};
use crate::coordinator::{Command, CommandIdentity, Coordinator};
use crate::types::{FolderKey, Message, Priority, Result, SequenceId, SyncError};

pub struct AccountSync {
    account_id: String,
    folders: Vec<FolderKey>,
    endpoint: Arc<dyn RemoteEndpoint>,
    store: Arc<dyn LocalStore>,
    coordinator: Arc<Coordinator>,
    reconciler: Reconciler,
    events: Sender<SyncEvent>,
    shutdown: CancellationToken,
}

impl fmt::Debug for AccountSync {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountSync")
            .field("account_id", &self.account_id)
            .field("folders", &self.folders)
            .field("endpoint", self.endpoint.key())
            .field("shutdown", &self.shutdown.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl AccountSync {
    pub fn new(
        account: &AccountConfig,
        endpoint: Arc<dyn RemoteEndpoint>,
        store: Arc<dyn LocalStore>,
        coordinator: Arc<Coordinator>,
        config: &SyncConfig,
    ) -> (Self, Receiver<SyncEvent>) {
        let (tx, rx) = flume::unbounded();

        let driver = Self {
            account_id: account.id.clone(),
            folders: account
                .folders
                .iter()
                .map(|f| FolderKey::new(account.id.clone(), f.clone()))
                .collect(),
            endpoint,
            store,
            coordinator,
            reconciler: Reconciler::from_config(config),
            events: tx,
            shutdown: CancellationToken::new(),
        };

        (driver, rx)
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    pub fn folders(&self) -> &[FolderKey] {
        &self.folders
    }

    pub fn endpoint(&self) -> &Arc<dyn RemoteEndpoint> {
        &self.endpoint
    }

    /// Stop shared folder syncs at their next iteration.
    pub fn shutdown(&self) {
        info!("Shutting down sync driver for account: {}", self.account_id);
        self.shutdown.cancel();
    }

    /// Reconcile one folder at `Normal` priority.
    ///
    /// Concurrent calls for the same folder share one run. `cancel` abandons
    /// this caller's wait; the run itself stops only on [`shutdown`](Self::shutdown).
    pub async fn sync_folder(
        self: &Arc<Self>,
        folder: &FolderKey,
        cancel: &CancellationToken,
    ) -> Result<ReconcileReport> {
        let identity = CommandIdentity::new("sync-folder", self.endpoint.key()).folder(folder);
        let driver = self.clone();
        let target = folder.clone();

        let report = self
            .coordinator
            .coalesce(identity.as_str(), cancel, async move {
                driver.reconcile_folder(&target).await
            })
            .await?;
        Ok(*report)
    }

    /// Sync every configured folder concurrently.
    pub async fn sync_account(
        self: &Arc<Self>,
        cancel: &CancellationToken,
    ) -> Vec<(FolderKey, Result<ReconcileReport>)> {
        info!(
            "Syncing {} folders for account: {}",
            self.folders.len(),
            self.account_id
        );
        let results = join_all(self.folders.iter().map(|f| self.sync_folder(f, cancel))).await;
        self.folders.iter().cloned().zip(results).collect()
    }

    /// One timer-driven sync. Failures go to the event channel as a single
    /// `ExceptionOccurred`, preferring a lost session or rejected login over
    /// folder-level errors; cancellation is not reported.
    pub async fn background_tick(self: &Arc<Self>) -> bool {
        let results = self.sync_account(&self.shutdown).await;

        let failures: Vec<(FolderKey, SyncError)> = results
            .into_iter()
            .filter_map(|(folder, result)| result.err().map(|e| (folder, e)))
            .filter(|(_, e)| !e.is_cancelled())
            .collect();

        let Some((folder, reported)) = reported_failure(failures) else {
            return true;
        };
        if reported.is_fatal() {
            error!("Background sync of {} lost the endpoint: {}", folder, reported);
        } else {
            warn!("Background sync failed for {}: {}", folder, reported);
        }
        self.publish_exception(Some(&folder), reported);
        false
    }

    /// Fetch one message at `High` priority and refresh the cached copy.
    ///
    /// A message the remote no longer has is removed locally and reported as
    /// `RemoteObjectMissing`.
    pub async fn fetch_message(
        &self,
        folder: &FolderKey,
        id: SequenceId,
        cancel: &CancellationToken,
    ) -> Result<Message> {
        let identity = CommandIdentity::new("fetch-message", self.endpoint.key())
            .folder(folder)
            .param(id);
        let target = folder.clone();
        let command = Command::new(identity, Priority::High, move |endpoint| {
            let folder = target.clone();
            async move {
                endpoint
                    .fetch_range(&folder, id, 1)
                    .await?
                    .into_iter()
                    .find(|m| m.id == id)
                    .ok_or_else(|| {
                        SyncError::RemoteObjectMissing(format!("message {} in {}", id, folder))
                    })
            }
        });

        match self.coordinator.run(&self.endpoint, command, cancel).await {
            Ok(message) => {
                let message = Message::clone(&message);
                let cached = !self
                    .store
                    .messages_in_range(folder, id, id.saturating_next())
                    .await?
                    .is_empty();
                self.store.apply_adds(std::slice::from_ref(&message)).await?;
                if !cached {
                    self.emit(SyncEvent::MessagesAdded {
                        folder: folder.folder.clone(),
                        ids: vec![id],
                    });
                }
                Ok(message)
            }
            Err(SyncError::RemoteObjectMissing(reason)) => {
                debug!("Message {} vanished from {}, dropping cached copy", id, folder);
                self.store.apply_deletes(&[Message::new(folder.clone(), id)]).await?;
                self.emit(SyncEvent::MessagesDeleted {
                    folder: folder.folder.clone(),
                    ids: vec![id],
                });
                Err(SyncError::RemoteObjectMissing(reason))
            }
            Err(e) => Err(e),
        }
    }

    pub async fn set_read(
        &self,
        folder: &FolderKey,
        ids: &[SequenceId],
        read: bool,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.store_flags(folder, ids, FlagChange::Read(read), cancel).await
    }

    pub async fn set_flagged(
        &self,
        folder: &FolderKey,
        ids: &[SequenceId],
        flagged: bool,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.store_flags(folder, ids, FlagChange::Flagged(flagged), cancel).await
    }

    /// Report a failure that has no synchronous caller. Cancellation is
    /// never reported.
    pub fn publish_exception(&self, folder: Option<&FolderKey>, error: SyncError) {
        if error.is_cancelled() {
            return;
        }
        self.emit(SyncEvent::ExceptionOccurred {
            account_id: self.account_id.clone(),
            folder: folder.map(|f| f.folder.clone()),
            error,
        });
    }

    async fn store_flags(
        &self,
        folder: &FolderKey,
        ids: &[SequenceId],
        change: FlagChange,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }

        let mut sorted = ids.to_vec();
        sorted.sort_unstable();
        sorted.dedup();

        let (name, value) = match change {
            FlagChange::Read(v) => ("read", v),
            FlagChange::Flagged(v) => ("flagged", v),
        };
        let id_list = sorted.iter().map(|id| id.to_string()).collect::<Vec<_>>().join(",");
        let identity = CommandIdentity::new("store-flags", self.endpoint.key())
            .folder(folder)
            .param(format!("{}={}", name, value))
            .param(id_list);

        let target = folder.clone();
        let remote_ids = sorted.clone();
        let command = Command::new(identity, Priority::High, move |endpoint| {
            let folder = target.clone();
            let ids = remote_ids.clone();
            async move { endpoint.store_flags(&folder, &ids, change).await }
        });
        self.coordinator.run(&self.endpoint, command, cancel).await?;

        let (Some(&min), Some(&max)) = (sorted.first(), sorted.last()) else {
            return Ok(());
        };
        let wanted: HashSet<SequenceId> = sorted.iter().copied().collect();
        let mut cached: Vec<Message> = self
            .store
            .messages_in_range(folder, min, max.saturating_next())
            .await?
            .into_iter()
            .filter(|m| wanted.contains(&m.id))
            .collect();
        if cached.is_empty() {
            return Ok(());
        }

        for message in &mut cached {
            change.apply(message);
        }
        self.store.apply_updates(&cached).await?;
        self.emit(SyncEvent::MessagesUpdated {
            folder: folder.folder.clone(),
            ids: cached.iter().map(|m| m.id).collect(),
        });
        Ok(())
    }

    async fn reconcile_folder(&self, folder: &FolderKey) -> Result<ReconcileReport> {
        let cancel = self.shutdown.child_token();
        let window = self.window(folder, &cancel).await?;
        info!("Syncing {} (window {} to {})", folder, window.earliest, window.latest);

        let batches = CommandBatches {
            coordinator: &self.coordinator,
            endpoint: &self.endpoint,
            folder,
            cancel: &cancel,
        };
        let observer = EventObserver {
            folder: &folder.folder,
            events: &self.events,
        };

        let report = self
            .reconciler
            .run(folder, window, &batches, self.store.as_ref(), &observer, &cancel)
            .await?;

        self.emit(SyncEvent::FolderSynced {
            folder: folder.folder.clone(),
            report,
        });
        Ok(report)
    }

    /// `[local earliest, max(local latest, remote head)]`. An empty cache
    /// starts from id 1.
    async fn window(&self, folder: &FolderKey, cancel: &CancellationToken) -> Result<Window> {
        let earliest = self
            .store
            .earliest_message(folder)
            .await?
            .map(|m| m.id)
            .unwrap_or(SequenceId(1));
        let local_latest = self.store.latest_message(folder).await?.map(|m| m.id);
        let remote_head = self.remote_head(folder, cancel).await?;

        let latest = local_latest.max(remote_head).unwrap_or(SequenceId::UNASSIGNED);
        Ok(Window::new(earliest, latest))
    }

    async fn remote_head(
        &self,
        folder: &FolderKey,
        cancel: &CancellationToken,
    ) -> Result<Option<SequenceId>> {
        let identity = CommandIdentity::new("fetch-head", self.endpoint.key()).folder(folder);
        let target = folder.clone();
        let command = Command::new(identity, Priority::Normal, move |endpoint| {
            let folder = target.clone();
            async move { endpoint.fetch_older_than(&folder, SequenceId::MAX, 1).await }
        });

        let head = self.coordinator.run(&self.endpoint, command, cancel).await?;
        Ok(head.first().map(|m| m.id))
    }

    fn emit(&self, event: SyncEvent) {
        if let Err(e) = self.events.send(event) {
            debug!("No listener for sync event: {}", e);
        }
    }
}

/// The failure a background tick reports: the first fatal one if any,
/// else the first. The rest are only logged.
fn reported_failure(
    mut failures: Vec<(FolderKey, SyncError)>,
) -> Option<(FolderKey, SyncError)> {
    if failures.is_empty() {
        return None;
    }
    let pick = failures.iter().position(|(_, e)| e.is_fatal()).unwrap_or(0);
    let reported = failures.remove(pick);
    for (other, e) in &failures {
        debug!("Background sync of {} also failed: {}", other, e);
    }
    Some(reported)
}

/// Reconciliation batches loaded through the coordinator at `Normal`
/// priority, so interactive commands can cut in between them.
struct CommandBatches<'a> {
    coordinator: &'a Coordinator,
    endpoint: &'a Arc<dyn RemoteEndpoint>,
    folder: &'a FolderKey,
    cancel: &'a CancellationToken,
}

#[async_trait]
impl RemoteBatches for CommandBatches<'_> {
    async fn load_older_than(
        &self,
        from_exclusive: SequenceId,
        max_count: usize,
    ) -> Result<Vec<Message>> {
        let identity = CommandIdentity::new("fetch-older", self.endpoint.key())
            .folder(self.folder)
            .param(from_exclusive)
            .param(max_count);
        let folder = self.folder.clone();
        let command = Command::new(identity, Priority::Normal, move |endpoint| {
            let folder = folder.clone();
            async move {
                endpoint
                    .fetch_older_than(&folder, from_exclusive, max_count)
                    .await
            }
        });

        let batch = self.coordinator.run(self.endpoint, command, self.cancel).await?;
        Ok(Arc::try_unwrap(batch).unwrap_or_else(|shared| shared.as_ref().clone()))
    }

    async fn load_range(&self, from: SequenceId, count: usize) -> Result<Vec<Message>> {
        let identity = CommandIdentity::new("fetch-range", self.endpoint.key())
            .folder(self.folder)
            .param(from)
            .param(count);
        let folder = self.folder.clone();
        let command = Command::new(identity, Priority::Normal, move |endpoint| {
            let folder = folder.clone();
            async move { endpoint.fetch_range(&folder, from, count).await }
        });

        let batch = self.coordinator.run(self.endpoint, command, self.cancel).await?;
        Ok(Arc::try_unwrap(batch).unwrap_or_else(|shared| shared.as_ref().clone()))
    }
}

struct EventObserver<'a> {
    folder: &'a str,
    events: &'a Sender<SyncEvent>,
}

impl EventObserver<'_> {
    fn send(&self, event: SyncEvent) {
        if let Err(e) = self.events.send(event) {
            debug!("No listener for sync event: {}", e);
        }
    }
}

impl ReconcileObserver for EventObserver<'_> {
    fn deleted(&self, ids: &[SequenceId]) {
        self.send(SyncEvent::MessagesDeleted {
            folder: self.folder.to_string(),
            ids: ids.to_vec(),
        });
    }

    fn updated(&self, ids: &[SequenceId]) {
        self.send(SyncEvent::MessagesUpdated {
            folder: self.folder.to_string(),
            ids: ids.to_vec(),
        });
    }

    fn added(&self, ids: &[SequenceId]) {
        self.send(SyncEvent::MessagesAdded {
            folder: self.folder.to_string(),
            ids: ids.to_vec(),
        });
    }
}
