//! Timer-driven background sync
//!
//! Ticks at a fixed interval and starts one job per tick. A tick that fires
//! while the previous job is still running is dropped, not queued.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::driver::AccountSync;
use crate::config::SyncConfig;

/// Re-entry guard for ticks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TickState {
    Idle,
    Running,
}

impl TickState {
    fn as_u8(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Running => 1,
        }
    }

    fn from_u8(value: u8) -> Self {
        if value == 0 {
            Self::Idle
        } else {
            Self::Running
        }
    }
}

/// Returns the state to `Idle` when the tick's job ends, however it ends.
struct TickGuard(Arc<AtomicU8>);

impl Drop for TickGuard {
    fn drop(&mut self) {
        self.0.store(TickState::Idle.as_u8(), Ordering::Release);
    }
}

/// Shortest period the tick loop accepts; shorter intervals are raised to it.
pub const MIN_INTERVAL: Duration = Duration::from_secs(1);

pub struct SyncMonitor {
    account_id: String,
    interval: Duration,
    state: Arc<AtomicU8>,
    started: Arc<AtomicU64>,
    dropped: Arc<AtomicU64>,
    cancel: CancellationToken,
}

impl SyncMonitor {
    pub fn new(account_id: impl Into<String>, interval: Duration) -> Self {
        let account_id = account_id.into();
        if interval < MIN_INTERVAL {
            warn!(
                "Sync interval {:?} for account {} is too short, using {:?}",
                interval, account_id, MIN_INTERVAL
            );
        }
        Self {
            account_id,
            interval: interval.max(MIN_INTERVAL),
            state: Arc::new(AtomicU8::new(TickState::Idle.as_u8())),
            started: Arc::new(AtomicU64::new(0)),
            dropped: Arc::new(AtomicU64::new(0)),
            cancel: CancellationToken::new(),
        }
    }

    pub fn from_config(account_id: impl Into<String>, config: &SyncConfig) -> Self {
        Self::new(account_id, Duration::from_secs(config.poll_interval_seconds))
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn state(&self) -> TickState {
        TickState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Ticks that started a job.
    pub fn started_ticks(&self) -> u64 {
        self.started.load(Ordering::Relaxed)
    }

    /// Ticks skipped because the previous job was still running.
    pub fn dropped_ticks(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Stop ticking. A job already started runs to completion.
    pub fn stop(&self) {
        info!("Stopping sync monitor for account: {}", self.account_id);
        self.cancel.cancel();
    }

    /// Run the driver's background sync on every tick.
    pub fn watch(&self, driver: Arc<AccountSync>) -> JoinHandle<()> {
        self.start(move || {
            let driver = driver.clone();
            async move {
                driver.background_tick().await;
            }
        })
    }

    /// Spawn the tick loop. The first tick fires immediately.
    pub fn start<F, Fut>(&self, job: F) -> JoinHandle<()>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let account_id = self.account_id.clone();
        let period = self.interval;
        let state = self.state.clone();
        let started = self.started.clone();
        let dropped = self.dropped.clone();
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            info!(
                "Starting sync monitor for account: {} (interval: {:?})",
                account_id, period
            );

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let claimed = state.compare_exchange(
                    TickState::Idle.as_u8(),
                    TickState::Running.as_u8(),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                );
                if claimed.is_err() {
                    let total = dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    debug!(
                        "Previous sync still running for account: {}, dropping tick ({} dropped)",
                        account_id, total
                    );
                    continue;
                }

                let tick = started.fetch_add(1, Ordering::Relaxed) + 1;
                debug!("Sync tick #{} for account: {}", tick, account_id);

                let guard = TickGuard(state.clone());
                let work = job();
                tokio::spawn(async move {
                    let _guard = guard;
                    work.await;
                });
            }

            info!(
                "Sync monitor stopped for account: {} after {} ticks ({} dropped)",
                account_id,
                started.load(Ordering::Relaxed),
                dropped.load(Ordering::Relaxed)
            );
        })
    }
}

impl Drop for SyncMonitor {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
