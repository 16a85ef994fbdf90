use serde::{Deserialize, Serialize};

use super::reconcile::ReconcileReport;
use crate::types::{SequenceId, SyncError};

/// Event emitted by an account driver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SyncEvent {
    MessagesAdded { folder: String, ids: Vec<SequenceId> },
    MessagesUpdated { folder: String, ids: Vec<SequenceId> },
    MessagesDeleted { folder: String, ids: Vec<SequenceId> },
    FolderSynced { folder: String, report: ReconcileReport },
    /// A failure with no synchronous caller to report to (background ticks).
    ExceptionOccurred {
        account_id: String,
        folder: Option<String>,
        error: SyncError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = SyncEvent::ExceptionOccurred {
            account_id: "acct1".into(),
            folder: Some("INBOX".into()),
            error: SyncError::Connection("reset by peer".into()),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "exception_occurred");
        assert_eq!(json["error"]["type"], "Connection");

        let added = SyncEvent::MessagesAdded {
            folder: "INBOX".into(),
            ids: vec![SequenceId(7)],
        };
        let json = serde_json::to_value(&added).unwrap();
        assert_eq!(json["ids"], serde_json::json!([7]));
    }
}
