use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use mailsync::adapters::{MemoryRemote, SqliteStore};
use mailsync::credentials::ConfigCredentials;
use mailsync::{
    AccountSync, AppConfig, Coordinator, EndpointKey, FolderKey, LocalStore, Message, SequenceId,
    ServiceKind, SyncError,
};

const CONFIG: &str = r#"
    [sync]
    batch_size = 2
    flush_threshold = 2

    [[accounts]]
    id = "acct1"
    username = "me@example.com"
    password = "hunter2"
"#;

struct Harness {
    _dir: tempfile::TempDir,
    driver: Arc<AccountSync>,
    remote: Arc<MemoryRemote>,
    store: Arc<SqliteStore>,
}

fn inbox() -> FolderKey {
    FolderKey::new("acct1", "INBOX")
}

fn harness() -> Harness {
    let config = AppConfig::from_toml_str(CONFIG).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(SqliteStore::open(&dir.path().join("cache.db")).unwrap());
    let remote = Arc::new(
        MemoryRemote::new(EndpointKey::new(ServiceKind::Imap, "acct1")).with_password("hunter2"),
    );
    remote.create_folder(&inbox());

    let coordinator = Arc::new(Coordinator::new(Arc::new(ConfigCredentials::new(
        &config.accounts,
    ))));
    let (driver, _events) = AccountSync::new(
        &config.accounts[0],
        remote.clone(),
        store.clone(),
        coordinator,
        &config.sync,
    );

    Harness {
        _dir: dir,
        driver: Arc::new(driver),
        remote,
        store,
    }
}

async fn cached(store: &SqliteStore) -> Vec<(u32, bool)> {
    store
        .messages_in_range(&inbox(), SequenceId(1), SequenceId::MAX)
        .await
        .unwrap()
        .into_iter()
        .map(|m| (m.id.0, m.is_read))
        .collect()
}

#[tokio::test]
async fn window_reconciliation_matches_remote() {
    let h = harness();
    for id in 7..=10 {
        h.remote.insert(Message::new(inbox(), id));
    }
    h.store
        .apply_adds(&[
            Message::new(inbox(), 9).with_flags(true, false),
            Message::new(inbox(), 8),
            Message::new(inbox(), 6),
        ])
        .await
        .unwrap();

    let cancel = CancellationToken::new();
    let report = h.driver.sync_folder(&inbox(), &cancel).await.unwrap();

    assert_eq!((report.added, report.updated, report.deleted), (2, 1, 1));
    assert_eq!(
        cached(&h.store).await,
        vec![(10, false), (9, false), (8, false), (7, false)]
    );
    assert!(h.remote.listing_requests().iter().all(|&n| n <= 2));

    let rerun = h.driver.sync_folder(&inbox(), &cancel).await.unwrap();
    assert_eq!(rerun.changes(), 0);
}

#[tokio::test]
async fn concurrent_syncs_of_one_folder_share_a_run() {
    let h = harness();
    for id in 1..=6 {
        h.remote.insert(Message::new(inbox(), id));
    }

    let cancel = CancellationToken::new();
    let folder = inbox();
    let (a, b) = tokio::join!(
        h.driver.sync_folder(&folder, &cancel),
        h.driver.sync_folder(&folder, &cancel),
    );

    assert_eq!(a.unwrap(), b.unwrap());
    assert_eq!(cached(&h.store).await.len(), 6);
    // One head lookup plus three listings of at most two.
    assert_eq!(h.remote.listing_requests(), vec![1, 2, 2, 2]);
}

#[tokio::test]
async fn vanished_message_is_removed_on_open() {
    let h = harness();
    h.remote.insert(Message::new(inbox(), 1));
    h.remote.insert(Message::new(inbox(), 2));

    let cancel = CancellationToken::new();
    h.driver.sync_folder(&inbox(), &cancel).await.unwrap();
    h.remote.remove(&inbox(), SequenceId(2));

    let err = h
        .driver
        .fetch_message(&inbox(), SequenceId(2), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::RemoteObjectMissing(_)));
    assert_eq!(cached(&h.store).await, vec![(1, false)]);
}

#[tokio::test]
async fn dropped_connection_is_recovered_mid_sync() {
    let h = harness();
    for id in 1..=4 {
        h.remote.insert(Message::new(inbox(), id));
    }
    // The head lookup succeeds, the first batch listing loses the session.
    h.remote.drop_connection_on_listing(2);

    let cancel = CancellationToken::new();
    let report = h.driver.sync_folder(&inbox(), &cancel).await.unwrap();

    assert_eq!(report.added, 4);
    assert_eq!(
        cached(&h.store).await,
        vec![(4, false), (3, false), (2, false), (1, false)]
    );
    assert_eq!(h.remote.connect_count(), 2);
    // Head lookup, failed listing, its single retry, then the second batch.
    assert_eq!(h.remote.listing_requests(), vec![1, 2, 2, 2]);
}

#[tokio::test]
async fn idle_disconnect_reconnects_before_next_sync() {
    let h = harness();
    for id in 1..=4 {
        h.remote.insert(Message::new(inbox(), id));
    }

    let cancel = CancellationToken::new();
    h.driver.sync_folder(&inbox(), &cancel).await.unwrap();
    h.remote.drop_connection();
    h.remote.insert(Message::new(inbox(), 5));

    let report = h.driver.sync_folder(&inbox(), &cancel).await.unwrap();
    assert_eq!(report.added, 1);
    assert_eq!(h.remote.connect_count(), 2);
}
