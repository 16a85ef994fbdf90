//! Windowed reconciliation of a folder's local cache against the remote
//!
//! A run walks the window `[earliest, latest]` from the top down in batches
//! of at most `batch_size` remote messages. Each iteration diffs one remote
//! batch against the local messages in the same id span, then applies the
//! deletes, updates and adds before moving below it. Iterations never revisit
//! ids an earlier one committed, so an interrupted run can simply be started
//! again with the same window.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::fanout::contiguous_runs;
use crate::adapters::LocalStore;
use crate::config::SyncConfig;
use crate::types::{FolderKey, Message, Result, SequenceId, SyncError};

/// Inclusive id bounds of a reconciliation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub earliest: SequenceId,
    pub latest: SequenceId,
}

impl Window {
    pub fn new(earliest: impl Into<SequenceId>, latest: impl Into<SequenceId>) -> Self {
        Self {
            earliest: earliest.into(),
            latest: latest.into(),
        }
    }

    pub fn between(earliest: &Message, latest: &Message) -> Self {
        Self::new(earliest.id, latest.id)
    }

    /// Nothing to reconcile: a bound is unassigned or the bounds are inverted.
    pub fn is_empty(&self) -> bool {
        !self.earliest.is_assigned() || !self.latest.is_assigned() || self.latest < self.earliest
    }
}

/// Remote side of a reconciliation run, already bound to one folder.
#[async_trait]
pub trait RemoteBatches: Send + Sync {
    /// Up to `max_count` messages with ids below `from_exclusive`, newest first.
    async fn load_older_than(
        &self,
        from_exclusive: SequenceId,
        max_count: usize,
    ) -> Result<Vec<Message>>;

    /// Messages with ids in `[from, from + count)`.
    async fn load_range(&self, from: SequenceId, count: usize) -> Result<Vec<Message>>;
}

/// Notified after each batch of changes has been written locally.
pub trait ReconcileObserver: Send + Sync {
    fn deleted(&self, _ids: &[SequenceId]) {}
    fn updated(&self, _ids: &[SequenceId]) {}
    fn added(&self, _ids: &[SequenceId]) {}
}

impl ReconcileObserver for () {}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub iterations: usize,
    pub added: usize,
    pub updated: usize,
    pub deleted: usize,
}

impl ReconcileReport {
    pub fn changes(&self) -> usize {
        self.added + self.updated + self.deleted
    }
}

/// Outcome of merging one remote batch with the local batch covering it.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Diff {
    pub deletes: Vec<Message>,
    /// Local messages carrying the remote flags.
    pub updates: Vec<Message>,
    /// Remote ids missing locally.
    pub adds: Vec<SequenceId>,
}

/// Two-pointer merge of `remote` and `local`, both sorted newest first.
///
/// Remote entries above `local_max` belong to the previous iteration and are
/// skipped; trailing remote entries below `local_min` lie outside the span
/// this iteration owns and are ignored.
pub fn merge(
    remote: &[Message],
    local: &[Message],
    local_min: SequenceId,
    local_max: SequenceId,
) -> Diff {
    let mut diff = Diff::default();
    let mut r = remote.iter().skip_while(|m| m.id > local_max).peekable();
    let mut l = local.iter().peekable();

    loop {
        match (r.peek(), l.peek()) {
            (Some(rm), Some(lm)) => match rm.id.cmp(&lm.id) {
                Ordering::Equal => {
                    if rm.flags_differ(lm) {
                        let mut updated = (*lm).clone();
                        updated.is_read = rm.is_read;
                        updated.is_flagged = rm.is_flagged;
                        diff.updates.push(updated);
                    }
                    r.next();
                    l.next();
                }
                Ordering::Greater => {
                    diff.adds.push(rm.id);
                    r.next();
                }
                Ordering::Less => {
                    diff.deletes.push((*lm).clone());
                    l.next();
                }
            },
            (Some(rm), None) => {
                if rm.id >= local_min {
                    diff.adds.push(rm.id);
                }
                r.next();
            }
            (None, Some(lm)) => {
                diff.deletes.push((*lm).clone());
                l.next();
            }
            (None, None) => break,
        }
    }

    diff
}

pub struct Reconciler {
    batch_size: usize,
    flush_threshold: usize,
}

impl Reconciler {
    pub fn new(batch_size: usize, flush_threshold: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
            flush_threshold: flush_threshold.max(1),
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(config.batch_size, config.flush_threshold)
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Make the local cache of `folder` match the remote within `window`.
    ///
    /// Cancellation is observed before every remote listing. Work applied by
    /// earlier iterations stays in place on any error.
    pub async fn run(
        &self,
        folder: &FolderKey,
        window: Window,
        remote: &dyn RemoteBatches,
        local: &dyn LocalStore,
        observer: &dyn ReconcileObserver,
        cancel: &CancellationToken,
    ) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();
        if window.is_empty() {
            debug!(%folder, ?window, "empty reconciliation window");
            return Ok(report);
        }

        let earliest = window.earliest;
        let mut local_max = window.latest;
        let mut cursor = window.latest.saturating_next();

        loop {
            if cancel.is_cancelled() {
                info!(%folder, iterations = report.iterations, "reconciliation cancelled");
                return Err(SyncError::Cancelled);
            }
            report.iterations += 1;

            let remote_batch = if cursor > earliest {
                let room = ((cursor.0 - earliest.0) as usize).min(self.batch_size);
                let batch = remote.load_older_than(cursor, room).await?;
                validate_batch(&batch, cursor, room)?;
                batch
            } else {
                Vec::new()
            };

            let remote_min = remote_batch.last().map(|m| m.id);
            let local_min = match remote_min {
                Some(min) => min.max(earliest),
                None => earliest,
            };

            let mut local_batch = local
                .messages_in_range(folder, local_min, local_max.saturating_next())
                .await?;
            local_batch.sort_unstable_by(|a, b| b.id.cmp(&a.id));

            let diff = merge(&remote_batch, &local_batch, local_min, local_max);
            debug!(
                %folder,
                remote = remote_batch.len(),
                local = local_batch.len(),
                deletes = diff.deletes.len(),
                updates = diff.updates.len(),
                adds = diff.adds.len(),
                "merged batch [{}, {}]",
                local_min,
                local_max
            );

            if !diff.deletes.is_empty() {
                local.apply_deletes(&diff.deletes).await?;
                observer.deleted(&ids_of(&diff.deletes));
                report.deleted += diff.deletes.len();
            }
            if !diff.updates.is_empty() {
                local.apply_updates(&diff.updates).await?;
                observer.updated(&ids_of(&diff.updates));
                report.updated += diff.updates.len();
            }
            if !diff.adds.is_empty() {
                report.added += self.fetch_adds(folder, &diff.adds, remote, local, observer).await?;
            }

            let Some(remote_min) = remote_min else { break };
            if local_min <= earliest {
                break;
            }
            local_max = local_min.saturating_prev();
            cursor = remote_min;
        }

        info!(
            "Reconciled {}: {} added, {} updated, {} deleted in {} iterations",
            folder, report.added, report.updated, report.deleted, report.iterations
        );
        Ok(report)
    }

    /// Fetch the messages for `ids` in contiguous runs and write them in
    /// chunks of `flush_threshold`. Ids the remote no longer has are skipped.
    async fn fetch_adds(
        &self,
        folder: &FolderKey,
        ids: &[SequenceId],
        remote: &dyn RemoteBatches,
        local: &dyn LocalStore,
        observer: &dyn ReconcileObserver,
    ) -> Result<usize> {
        let mut wanted: HashSet<SequenceId> = ids.iter().copied().collect();
        let mut pending: Vec<Message> = Vec::new();
        let mut added = 0;

        for run in contiguous_runs(ids, self.batch_size) {
            match remote.load_range(run.start, run.len).await {
                Ok(fetched) => {
                    pending.extend(fetched.into_iter().filter(|m| wanted.remove(&m.id)));
                }
                Err(SyncError::RemoteObjectMissing(reason)) => {
                    debug!(%folder, start = %run.start, len = run.len, %reason, "run vanished remotely");
                }
                Err(e) => return Err(e),
            }

            while pending.len() >= self.flush_threshold {
                let chunk: Vec<Message> = pending.drain(..self.flush_threshold).collect();
                added += flush(local, observer, &chunk).await?;
            }
        }

        if !pending.is_empty() {
            added += flush(local, observer, &pending).await?;
        }
        if !wanted.is_empty() {
            debug!(%folder, missing = wanted.len(), "listed messages gone before fetch");
        }
        Ok(added)
    }
}

async fn flush(
    local: &dyn LocalStore,
    observer: &dyn ReconcileObserver,
    messages: &[Message],
) -> Result<usize> {
    local.apply_adds(messages).await?;
    observer.added(&ids_of(messages));
    Ok(messages.len())
}

fn ids_of(messages: &[Message]) -> Vec<SequenceId> {
    messages.iter().map(|m| m.id).collect()
}

fn validate_batch(batch: &[Message], cursor: SequenceId, requested: usize) -> Result<()> {
    if batch.len() > requested {
        return Err(SyncError::Core(format!(
            "remote returned {} messages, {} requested",
            batch.len(),
            requested
        )));
    }

    let mut previous = cursor;
    for message in batch {
        if !message.id.is_assigned() || message.id >= previous {
            return Err(SyncError::Core(format!(
                "remote listing out of order: {} after {} (cursor {})",
                message.id, previous, cursor
            )));
        }
        previous = message.id;
    }
    Ok(())
}
