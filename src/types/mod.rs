//! Core data types shared by the coordination layer and the sync engine

pub mod error;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub use error::{Result, SyncError};

/// Per-folder message identifier assigned by the remote side.
///
/// Monotonic within a folder and used as the sort key for reconciliation.
/// `0` means the message has not been assigned an id yet (e.g. a draft that
/// was never appended).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SequenceId(pub u32);

impl SequenceId {
    pub const UNASSIGNED: SequenceId = SequenceId(0);
    pub const MAX: SequenceId = SequenceId(u32::MAX);

    pub fn is_assigned(self) -> bool {
        self.0 != 0
    }

    /// Next id, clamped at [`SequenceId::MAX`].
    pub fn saturating_next(self) -> SequenceId {
        SequenceId(self.0.saturating_add(1))
    }

    /// Previous id, clamped at zero.
    pub fn saturating_prev(self) -> SequenceId {
        SequenceId(self.0.saturating_sub(1))
    }
}

impl fmt::Display for SequenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for SequenceId {
    fn from(id: u32) -> Self {
        SequenceId(id)
    }
}

/// Account plus folder full name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FolderKey {
    pub account_id: String,
    pub folder: String,
}

impl FolderKey {
    pub fn new(account_id: impl Into<String>, folder: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            folder: folder.into(),
        }
    }
}

impl fmt::Display for FolderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.account_id, self.folder)
    }
}

/// A cached message as seen by reconciliation.
///
/// Only `is_read` and `is_flagged` take part in change detection; the
/// envelope fields are carried along when a message is first added.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub folder: FolderKey,
    pub id: SequenceId,
    pub is_read: bool,
    pub is_flagged: bool,
    pub subject: Option<String>,
    pub from: Option<String>,
    pub date: Option<DateTime<Utc>>,
}

impl Message {
    pub fn new(folder: FolderKey, id: impl Into<SequenceId>) -> Self {
        Self {
            folder,
            id: id.into(),
            is_read: false,
            is_flagged: false,
            subject: None,
            from: None,
            date: None,
        }
    }

    pub fn with_flags(mut self, is_read: bool, is_flagged: bool) -> Self {
        self.is_read = is_read;
        self.is_flagged = is_flagged;
        self
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Whether the reconciliation-relevant attributes differ.
    pub fn flags_differ(&self, other: &Message) -> bool {
        self.is_read != other.is_read || self.is_flagged != other.is_flagged
    }
}

/// Access tier on a remote endpoint's gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Background and bulk work (folder sync).
    Normal,
    /// Interactive, latency-sensitive work (open a message now).
    High,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal => write!(f, "normal"),
            Self::High => write!(f, "high"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_id_saturates() {
        assert_eq!(SequenceId::MAX.saturating_next(), SequenceId::MAX);
        assert_eq!(SequenceId(41).saturating_next(), SequenceId(42));
        assert_eq!(SequenceId::UNASSIGNED.saturating_prev(), SequenceId::UNASSIGNED);
        assert!(!SequenceId::UNASSIGNED.is_assigned());
    }

    #[test]
    fn test_flags_differ() {
        let folder = FolderKey::new("acct1", "INBOX");
        let a = Message::new(folder.clone(), 9).with_flags(true, false);
        let b = Message::new(folder, 9).with_flags(false, false);
        assert!(a.flags_differ(&b));
        assert!(!a.flags_differ(&a.clone().with_subject("hello")));
    }
}
