//! mailsync - mail cache reconciliation and remote-access coordination
//!
//! The protocol-independent core of a multi-account mail client: it keeps a
//! local message cache consistent with remote mailboxes (IMAP-like,
//! decentralized or web-API backed) while serializing access to each remote
//! endpoint and letting interactive requests cut ahead of background sync.
//!
//! ## Module Organization
//!
//! - `types/`: Identifiers, messages, priorities and the error type
//! - `config/`: TOML configuration
//! - `credentials/`: Secret resolution for connect/authenticate
//! - `backend/`: Remote endpoint contract implemented by protocol crates
//! - `adapters/`: Local cache stores (SQLite, in-memory) and a loopback remote
//! - `coordinator/`: Priority gates, command coalescing, reconnect-once
//! - `sync/`: Reconciliation engine, account driver, periodic monitor
//! - `state/`: Composition root

pub mod adapters;
pub mod backend;
pub mod config;
pub mod coordinator;
pub mod credentials;
pub mod state;
pub mod sync;
pub mod types;

use tracing_subscriber::EnvFilter;

pub use adapters::LocalStore;
pub use backend::{EndpointFactory, EndpointKey, FlagChange, RemoteEndpoint, ServiceKind};
pub use config::{AccountConfig, AppConfig, SyncConfig};
pub use coordinator::{Command, CommandIdentity, Coordinator};
pub use state::SyncManager;
pub use sync::{AccountSync, ReconcileReport, Reconciler, SyncEvent, SyncMonitor, Window};
pub use types::{FolderKey, Message, Priority, Result, SequenceId, SyncError};

/// Install a `tracing` subscriber filtered by `RUST_LOG`.
///
/// Debug builds default to debug output for this crate and info for the
/// rest; release builds default to info. Safe to call more than once.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cfg!(debug_assertions) {
            EnvFilter::new("mailsync=debug,info")
        } else {
            EnvFilter::new("info")
        }
    });

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
