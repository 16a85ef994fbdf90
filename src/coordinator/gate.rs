//! Per-endpoint priority gate
//!
//! Serializes all remote work against one endpoint. Interactive (`High`)
//! requests cut ahead of queued background (`Normal`) requests, but a
//! `Normal` request that has already been admitted always runs to
//! completion.
//!
//! The gate is built from two binary semaphores and a waiting-high counter:
//!
//! - `High` callers count themselves as waiting, take the `high` permit and
//!   then the `normal` permit. While more high callers are queued, the
//!   `normal` permit is parked in the gate and handed from one high holder
//!   to the next instead of being released.
//! - `Normal` callers take the `normal` permit and keep it only if no high
//!   caller is waiting at that moment. Otherwise they give it back and sleep
//!   until the waiting-high counter drains to zero.
//!
//! Acquiring a gate the caller already holds deadlocks.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tracing::trace;

use crate::types::{Priority, Result, SyncError};

#[derive(Default)]
struct HighState {
    /// High callers that are waiting or running.
    waiting: usize,
    /// `normal` permit kept for the next high caller in line.
    parked: Option<OwnedSemaphorePermit>,
}

pub struct PriorityGate {
    normal: Arc<Semaphore>,
    high: Arc<Semaphore>,
    state: Mutex<HighState>,
    drained: Notify,
}

impl PriorityGate {
    pub fn new() -> Self {
        Self {
            normal: Arc::new(Semaphore::new(1)),
            high: Arc::new(Semaphore::new(1)),
            state: Mutex::new(HighState::default()),
            drained: Notify::new(),
        }
    }

    fn state(&self) -> MutexGuard<'_, HighState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of high-priority callers currently waiting or running.
    pub fn waiting_high(&self) -> usize {
        self.state().waiting
    }

    /// Wait for exclusive access. The returned guard releases on drop.
    ///
    /// Dropping the future while it is still waiting leaves the gate
    /// consistent.
    pub async fn acquire(&self, priority: Priority) -> Result<GateGuard<'_>> {
        match priority {
            Priority::High => self.acquire_high().await,
            Priority::Normal => self.acquire_normal().await,
        }
    }

    async fn acquire_high(&self) -> Result<GateGuard<'_>> {
        self.state().waiting += 1;
        let mut pending = PendingHigh {
            gate: self,
            armed: true,
        };

        let high = self.high.clone().acquire_owned().await.map_err(closed)?;
        let parked = self.state().parked.take();
        let normal = match parked {
            Some(permit) => permit,
            None => self.normal.clone().acquire_owned().await.map_err(closed)?,
        };

        pending.armed = false;
        trace!("high priority caller admitted");

        Ok(GateGuard {
            gate: self,
            priority: Priority::High,
            normal: Some(normal),
            high: Some(high),
        })
    }

    async fn acquire_normal(&self) -> Result<GateGuard<'_>> {
        loop {
            let normal = self.normal.clone().acquire_owned().await.map_err(closed)?;
            if self.state().waiting == 0 {
                trace!("normal priority caller admitted");
                return Ok(GateGuard {
                    gate: self,
                    priority: Priority::Normal,
                    normal: Some(normal),
                    high: None,
                });
            }

            // Yield to the queued high caller and sleep until none are left.
            drop(normal);
            let drained = self.drained.notified();
            if self.state().waiting == 0 {
                continue;
            }
            drained.await;
        }
    }

    fn release_high(&self, normal: OwnedSemaphorePermit) {
        let mut state = self.state();
        state.waiting -= 1;
        if state.waiting > 0 {
            state.parked = Some(normal);
        } else {
            drop(normal);
            self.drained.notify_waiters();
        }
    }

    /// A high caller gave up before being admitted.
    fn abandon_high(&self) {
        let mut state = self.state();
        state.waiting -= 1;
        if state.waiting == 0 {
            state.parked = None;
            self.drained.notify_waiters();
        }
    }
}

impl Default for PriorityGate {
    fn default() -> Self {
        Self::new()
    }
}

fn closed(_: tokio::sync::AcquireError) -> SyncError {
    SyncError::Core("priority gate closed".to_string())
}

struct PendingHigh<'a> {
    gate: &'a PriorityGate,
    armed: bool,
}

impl Drop for PendingHigh<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.gate.abandon_high();
        }
    }
}

/// Exclusive access to one endpoint.
pub struct GateGuard<'a> {
    gate: &'a PriorityGate,
    priority: Priority,
    normal: Option<OwnedSemaphorePermit>,
    high: Option<OwnedSemaphorePermit>,
}

impl GateGuard<'_> {
    pub fn priority(&self) -> Priority {
        self.priority
    }
}

impl Drop for GateGuard<'_> {
    fn drop(&mut self) {
        if let Some(normal) = self.normal.take() {
            match self.priority {
                Priority::High => self.gate.release_high(normal),
                Priority::Normal => drop(normal),
            }
        }
        // `high` goes last so the next high caller finds the parked permit.
        drop(self.high.take());
    }
}
