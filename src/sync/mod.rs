//! Folder synchronization
//!
//! `reconcile` holds the windowed diff engine, `driver` binds it to an
//! account's endpoint through the coordinator, and `monitor` runs the driver
//! on a timer.

pub mod driver;
pub mod events;
pub mod fanout;
pub mod monitor;
pub mod reconcile;

pub use driver::AccountSync;
pub use events::SyncEvent;
pub use monitor::{SyncMonitor, TickState};
pub use reconcile::{ReconcileObserver, ReconcileReport, Reconciler, RemoteBatches, Window};
