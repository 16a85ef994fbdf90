use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use mailsync::adapters::MemoryRemote;
use mailsync::credentials::ConfigCredentials;
use mailsync::{
    AppConfig, Command, Coordinator, EndpointKey, Priority, RemoteEndpoint, ServiceKind, SyncError,
};

const CONFIG: &str = r#"
    [[accounts]]
    id = "acct1"
    username = "me@example.com"
    password = "hunter2"
"#;

fn setup() -> (Arc<Coordinator>, Arc<dyn RemoteEndpoint>) {
    let config = AppConfig::from_toml_str(CONFIG).unwrap();
    let coordinator = Arc::new(Coordinator::new(Arc::new(ConfigCredentials::new(
        &config.accounts,
    ))));
    let endpoint: Arc<dyn RemoteEndpoint> = Arc::new(
        MemoryRemote::new(EndpointKey::new(ServiceKind::Imap, "acct1")).with_password("hunter2"),
    );
    (coordinator, endpoint)
}

#[tokio::test]
async fn concurrent_folder_listing_runs_once() {
    let (coordinator, endpoint) = setup();
    let calls = Arc::new(AtomicUsize::new(0));

    let listing = |calls: Arc<AtomicUsize>| {
        Command::new("fetch-folders:acct1", Priority::Normal, move |_| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                sleep(Duration::from_millis(50)).await;
                Ok::<_, SyncError>(vec!["INBOX".to_string(), "Archive".to_string()])
            }
        })
    };

    let cancel = CancellationToken::new();
    let (first, second) = tokio::join!(
        coordinator.run(&endpoint, listing(calls.clone()), &cancel),
        coordinator.run(&endpoint, listing(calls.clone()), &cancel),
    );

    let (first, second) = (first.unwrap(), second.unwrap());
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(*first, vec!["INBOX", "Archive"]);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn interactive_command_cuts_ahead_of_queued_background_work() {
    let (coordinator, endpoint) = setup();
    let order = Arc::new(Mutex::new(Vec::new()));

    let step = |name: &'static str, priority: Priority, hold: u64, order: Arc<Mutex<Vec<&'static str>>>| {
        Command::uncoalesced(priority, move |_| {
            let order = order.clone();
            async move {
                order.lock().unwrap().push(name);
                sleep(Duration::from_millis(hold)).await;
                Ok::<_, SyncError>(())
            }
        })
    };

    let cancel = CancellationToken::new();
    let spawn = |command: Command<()>| {
        let coordinator = coordinator.clone();
        let endpoint = endpoint.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { coordinator.run(&endpoint, command, &cancel).await })
    };

    let running = spawn(step("sync-batch-1", Priority::Normal, 60, order.clone()));
    sleep(Duration::from_millis(15)).await;
    let queued = spawn(step("sync-batch-2", Priority::Normal, 1, order.clone()));
    sleep(Duration::from_millis(15)).await;
    let interactive = spawn(step("open-message", Priority::High, 1, order.clone()));

    for task in [running, queued, interactive] {
        task.await.unwrap().unwrap();
    }

    assert_eq!(
        *order.lock().unwrap(),
        vec!["sync-batch-1", "open-message", "sync-batch-2"]
    );
}
