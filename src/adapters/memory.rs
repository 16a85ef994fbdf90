//! In-process store and loopback endpoint
//!
//! `MemoryStore` is a complete [`LocalStore`] over ordered maps.
//! `MemoryRemote` behaves like a remote mailbox without a wire: it tracks
//! session state, enforces the configured password and records the size of
//! every listing request so batching limits can be verified.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock};
use tracing::debug;

use super::LocalStore;
use crate::backend::{EndpointKey, FlagChange, RemoteEndpoint};
use crate::credentials::Credentials;
use crate::types::{FolderKey, Message, Result, SequenceId, SyncError};

type FolderMap = HashMap<FolderKey, BTreeMap<SequenceId, Message>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
pub struct MemoryStore {
    folders: tokio::sync::RwLock<FolderMap>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a folder, newest first.
    pub async fn messages(&self, folder: &FolderKey) -> Vec<Message> {
        let folders = self.folders.read().await;
        folders
            .get(folder)
            .map(|m| m.values().rev().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn len(&self, folder: &FolderKey) -> usize {
        let folders = self.folders.read().await;
        folders.get(folder).map(|m| m.len()).unwrap_or(0)
    }
}

#[async_trait]
impl LocalStore for MemoryStore {
    async fn latest_message(&self, folder: &FolderKey) -> Result<Option<Message>> {
        let folders = self.folders.read().await;
        Ok(folders
            .get(folder)
            .and_then(|m| m.range(SequenceId(1)..).next_back().map(|(_, v)| v.clone())))
    }

    async fn earliest_message(&self, folder: &FolderKey) -> Result<Option<Message>> {
        let folders = self.folders.read().await;
        Ok(folders.get(folder).and_then(|m| {
            m.range(SequenceId(1)..)
                .next()
                .map(|(_, message)| message.clone())
        }))
    }

    async fn messages_in_range(
        &self,
        folder: &FolderKey,
        min: SequenceId,
        max_exclusive: SequenceId,
    ) -> Result<Vec<Message>> {
        if max_exclusive <= min {
            return Ok(Vec::new());
        }
        let folders = self.folders.read().await;
        Ok(folders
            .get(folder)
            .map(|m| m.range(min..max_exclusive).map(|(_, v)| v.clone()).collect())
            .unwrap_or_default())
    }

    async fn apply_adds(&self, messages: &[Message]) -> Result<()> {
        let mut folders = self.folders.write().await;
        for message in messages {
            folders
                .entry(message.folder.clone())
                .or_default()
                .insert(message.id, message.clone());
        }
        Ok(())
    }

    async fn apply_updates(&self, messages: &[Message]) -> Result<()> {
        let mut folders = self.folders.write().await;
        for message in messages {
            if let Some(cached) = folders
                .get_mut(&message.folder)
                .and_then(|m| m.get_mut(&message.id))
            {
                cached.is_read = message.is_read;
                cached.is_flagged = message.is_flagged;
            }
        }
        Ok(())
    }

    async fn apply_deletes(&self, messages: &[Message]) -> Result<()> {
        let mut folders = self.folders.write().await;
        for message in messages {
            if let Some(m) = folders.get_mut(&message.folder) {
                m.remove(&message.id);
            }
        }
        Ok(())
    }
}

pub struct MemoryRemote {
    key: EndpointKey,
    password: Option<String>,
    folders: RwLock<FolderMap>,
    connected: AtomicBool,
    authenticated: AtomicBool,
    connects: AtomicUsize,
    listings_until_drop: AtomicUsize,
    listing_requests: Mutex<Vec<usize>>,
    range_requests: Mutex<Vec<(SequenceId, usize)>>,
}

impl MemoryRemote {
    pub fn new(key: EndpointKey) -> Self {
        Self {
            key,
            password: None,
            folders: RwLock::new(HashMap::new()),
            connected: AtomicBool::new(false),
            authenticated: AtomicBool::new(false),
            connects: AtomicUsize::new(0),
            listings_until_drop: AtomicUsize::new(0),
            listing_requests: Mutex::new(Vec::new()),
            range_requests: Mutex::new(Vec::new()),
        }
    }

    /// Only accept this secret when authenticating.
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    fn folders(&self) -> std::sync::RwLockReadGuard<'_, FolderMap> {
        self.folders.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn folders_mut(&self) -> std::sync::RwLockWriteGuard<'_, FolderMap> {
        self.folders.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make a folder exist even when it holds no messages.
    pub fn create_folder(&self, folder: &FolderKey) {
        self.folders_mut().entry(folder.clone()).or_default();
    }

    pub fn insert(&self, message: Message) {
        self.folders_mut()
            .entry(message.folder.clone())
            .or_default()
            .insert(message.id, message);
    }

    pub fn remove(&self, folder: &FolderKey, id: SequenceId) -> Option<Message> {
        self.folders_mut().get_mut(folder).and_then(|m| m.remove(&id))
    }

    /// Snapshot of a folder, newest first.
    pub fn messages(&self, folder: &FolderKey) -> Vec<Message> {
        self.folders()
            .get(folder)
            .map(|m| m.values().rev().cloned().collect())
            .unwrap_or_default()
    }

    /// Simulate the server closing the session.
    pub fn drop_connection(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.authenticated.store(false, Ordering::SeqCst);
    }

    /// Close the session while serving the `n`th listing from now, which
    /// then fails with a connection error. Zero disarms.
    pub fn drop_connection_on_listing(&self, n: usize) {
        self.listings_until_drop.store(n, Ordering::SeqCst);
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// `max_count` of every `fetch_older_than` call, in call order.
    pub fn listing_requests(&self) -> Vec<usize> {
        lock(&self.listing_requests).clone()
    }

    /// `(from, count)` of every `fetch_range` call, in call order.
    pub fn range_requests(&self) -> Vec<(SequenceId, usize)> {
        lock(&self.range_requests).clone()
    }

    fn ensure_session(&self) -> Result<()> {
        if self.connected.load(Ordering::SeqCst) && self.authenticated.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(SyncError::Connection(format!("{} is not connected", self.key)))
        }
    }

    fn missing_folder(folder: &FolderKey) -> SyncError {
        SyncError::RemoteObjectMissing(format!("folder {}", folder))
    }
}

#[async_trait]
impl RemoteEndpoint for MemoryRemote {
    fn key(&self) -> &EndpointKey {
        &self.key
    }

    async fn is_connected(&self) -> bool {
        self.ensure_session().is_ok()
    }

    async fn connect(&self) -> Result<()> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.connected.store(true, Ordering::SeqCst);
        debug!(endpoint = %self.key, "loopback connected");
        Ok(())
    }

    async fn authenticate(&self, credentials: &Credentials) -> Result<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(SyncError::Connection(format!("{} is not connected", self.key)));
        }
        if let Some(expected) = &self.password {
            if &credentials.secret != expected {
                return Err(SyncError::Authentication(format!(
                    "credentials rejected for {}",
                    credentials.username
                )));
            }
        }
        self.authenticated.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) {
        self.drop_connection();
    }

    async fn fetch_older_than(
        &self,
        folder: &FolderKey,
        from_exclusive: SequenceId,
        max_count: usize,
    ) -> Result<Vec<Message>> {
        self.ensure_session()?;
        lock(&self.listing_requests).push(max_count);

        let countdown = self
            .listings_until_drop
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if countdown == Ok(1) {
            self.drop_connection();
            return Err(SyncError::Connection(format!("{} closed the connection", self.key)));
        }

        let folders = self.folders();
        let messages = folders.get(folder).ok_or_else(|| Self::missing_folder(folder))?;
        if from_exclusive <= SequenceId(1) {
            return Ok(Vec::new());
        }
        Ok(messages
            .range((Bound::Included(SequenceId(1)), Bound::Excluded(from_exclusive)))
            .rev()
            .take(max_count)
            .map(|(_, m)| m.clone())
            .collect())
    }

    async fn fetch_range(
        &self,
        folder: &FolderKey,
        from: SequenceId,
        count: usize,
    ) -> Result<Vec<Message>> {
        self.ensure_session()?;
        lock(&self.range_requests).push((from, count));

        let folders = self.folders();
        let messages = folders.get(folder).ok_or_else(|| Self::missing_folder(folder))?;
        Ok(messages
            .range(from..)
            .take_while(|(id, _)| (id.0 as u64) < from.0 as u64 + count as u64)
            .map(|(_, m)| m.clone())
            .collect())
    }

    async fn store_flags(
        &self,
        folder: &FolderKey,
        ids: &[SequenceId],
        change: FlagChange,
    ) -> Result<()> {
        self.ensure_session()?;

        let mut folders = self.folders_mut();
        let messages = folders
            .get_mut(folder)
            .ok_or_else(|| Self::missing_folder(folder))?;
        if let Some(missing) = ids.iter().find(|id| !messages.contains_key(*id)) {
            return Err(SyncError::RemoteObjectMissing(format!(
                "message {} in {}",
                missing, folder
            )));
        }
        for id in ids {
            if let Some(message) = messages.get_mut(id) {
                change.apply(message);
            }
        }
        Ok(())
    }
}
