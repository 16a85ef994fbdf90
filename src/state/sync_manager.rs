//! Sync driver manager
//!
//! Composition root: owns the coordinator shared by every account and
//! builds one driver per account on demand.

use flume::Receiver;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

use crate::adapters::{LocalStore, SqliteStore};
use crate::backend::EndpointFactory;
use crate::config::AppConfig;
use crate::coordinator::Coordinator;
use crate::credentials::{ConfigCredentials, CredentialProvider};
use crate::sync::{AccountSync, SyncEvent, SyncMonitor};
use crate::types::error::SyncError;

struct AccountHandle {
    driver: Arc<AccountSync>,
    events: Receiver<SyncEvent>,
    monitor: Option<SyncMonitor>,
}

pub struct SyncManager {
    config: AppConfig,
    coordinator: Arc<Coordinator>,
    store: Arc<dyn LocalStore>,
    endpoints: Arc<dyn EndpointFactory>,
    accounts: RwLock<HashMap<String, AccountHandle>>,
}

impl SyncManager {
    pub fn new(
        config: AppConfig,
        credentials: Arc<dyn CredentialProvider>,
        store: Arc<dyn LocalStore>,
        endpoints: Arc<dyn EndpointFactory>,
    ) -> Self {
        Self {
            config,
            coordinator: Arc::new(Coordinator::new(credentials)),
            store,
            endpoints,
            accounts: RwLock::new(HashMap::new()),
        }
    }

    /// Manager over the SQLite cache at the configured path, with
    /// credentials resolved from the account entries.
    pub fn open(config: AppConfig, endpoints: Arc<dyn EndpointFactory>) -> Result<Self, SyncError> {
        let db_path = config.sync.db_path();
        info!("Sync database: {:?}", db_path);

        let store = Arc::new(SqliteStore::open(&db_path)?);
        let credentials = Arc::new(ConfigCredentials::new(&config.accounts));
        Ok(Self::new(config, credentials, store, endpoints))
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    /// Get or create the driver for an account
    pub async fn get_or_create(&self, account_id: &str) -> Result<Arc<AccountSync>, SyncError> {
        {
            let accounts = self.accounts.read().await;
            if let Some(handle) = accounts.get(account_id) {
                return Ok(handle.driver.clone());
            }
        }

        let mut accounts = self.accounts.write().await;
        // Another caller may have created it while we waited for the lock.
        if let Some(handle) = accounts.get(account_id) {
            return Ok(handle.driver.clone());
        }

        let account = self
            .config
            .account(account_id)
            .ok_or_else(|| SyncError::Config(format!("Unknown account: {}", account_id)))?;

        info!("Creating sync driver for account: {}", account_id);
        let endpoint = self.endpoints.endpoint(account)?;
        let (driver, events) = AccountSync::new(
            account,
            endpoint,
            self.store.clone(),
            self.coordinator.clone(),
            &self.config.sync,
        );
        let driver = Arc::new(driver);

        accounts.insert(
            account_id.to_string(),
            AccountHandle {
                driver: driver.clone(),
                events,
                monitor: None,
            },
        );
        Ok(driver)
    }

    /// Receiver for the account's events. Receivers share one queue, so each
    /// event goes to exactly one of them.
    pub async fn events(&self, account_id: &str) -> Option<Receiver<SyncEvent>> {
        let accounts = self.accounts.read().await;
        accounts.get(account_id).map(|h| h.events.clone())
    }

    /// Start the periodic background sync for an account. No-op if it is
    /// already running.
    pub async fn start_monitor(&self, account_id: &str) -> Result<(), SyncError> {
        let driver = self.get_or_create(account_id).await?;

        let mut accounts = self.accounts.write().await;
        let Some(handle) = accounts.get_mut(account_id) else {
            return Err(SyncError::Config(format!("Unknown account: {}", account_id)));
        };
        if handle.monitor.is_some() {
            return Ok(());
        }

        let monitor = SyncMonitor::from_config(account_id, &self.config.sync);
        monitor.watch(driver);
        handle.monitor = Some(monitor);
        Ok(())
    }

    pub async fn is_monitoring(&self, account_id: &str) -> bool {
        let accounts = self.accounts.read().await;
        accounts
            .get(account_id)
            .is_some_and(|h| h.monitor.is_some())
    }

    /// Stop and forget an account's driver
    pub async fn remove(&self, account_id: &str) {
        let mut accounts = self.accounts.write().await;
        if let Some(handle) = accounts.remove(account_id) {
            info!("Removing sync driver for account: {}", account_id);
            if let Some(monitor) = &handle.monitor {
                monitor.stop();
            }
            handle.driver.shutdown();
        }
    }

    pub async fn account_ids(&self) -> Vec<String> {
        let accounts = self.accounts.read().await;
        accounts.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{MemoryRemote, MemoryStore};
    use crate::backend::{EndpointKey, RemoteEndpoint};
    use crate::config::AccountConfig;
    use crate::types::FolderKey;
    use tokio_util::sync::CancellationToken;

    const CONFIG: &str = r#"
        [sync]
        poll_interval_seconds = 3600

        [[accounts]]
        id = "acct1"
        username = "me@example.com"
        password = "hunter2"

        [[accounts]]
        id = "acct2"
        service = "web-api"
        username = "other@example.com"
        password = "swordfish"
        folders = ["INBOX", "Archive"]
    "#;

    fn manager() -> SyncManager {
        manager_with(AppConfig::from_toml_str(CONFIG).unwrap())
    }

    fn manager_with(config: AppConfig) -> SyncManager {
        let credentials = Arc::new(ConfigCredentials::new(&config.accounts));
        let factory = |account: &AccountConfig| -> Result<Arc<dyn RemoteEndpoint>, SyncError> {
            let password = match &account.password {
                crate::config::PasswordSource::Raw(p) => p.clone(),
                crate::config::PasswordSource::Command { .. } => String::new(),
            };
            let remote = MemoryRemote::new(EndpointKey::new(account.service, account.id.clone()))
                .with_password(password);
            for folder in &account.folders {
                remote.create_folder(&FolderKey::new(account.id.clone(), folder.clone()));
            }
            Ok(Arc::new(remote))
        };
        SyncManager::new(
            config,
            credentials,
            Arc::new(MemoryStore::new()),
            Arc::new(factory),
        )
    }

    #[tokio::test]
    async fn test_get_or_create_reuses_driver() {
        let manager = manager();
        let a = manager.get_or_create("acct1").await.unwrap();
        let b = manager.get_or_create("acct1").await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(manager.account_ids().await, vec!["acct1".to_string()]);
    }

    #[tokio::test]
    async fn test_unknown_account() {
        let manager = manager();
        let err = manager.get_or_create("nobody").await.unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
    }

    #[tokio::test]
    async fn test_accounts_share_coordinator() {
        let manager = manager();
        let cancel = CancellationToken::new();

        let first = manager.get_or_create("acct1").await.unwrap();
        let second = manager.get_or_create("acct2").await.unwrap();
        first.sync_account(&cancel).await;
        let results = second.sync_account(&cancel).await;

        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|(_, r)| r.is_ok()));
        assert_eq!(manager.coordinator().gate_count(), 2);
    }

    #[tokio::test]
    async fn test_monitor_with_zero_interval_still_syncs() {
        let mut config = AppConfig::from_toml_str(CONFIG).unwrap();
        config.sync.poll_interval_seconds = 0;
        let manager = manager_with(config);

        manager.start_monitor("acct1").await.unwrap();
        let events = manager.events("acct1").await.unwrap();
        let event = tokio::time::timeout(std::time::Duration::from_secs(5), events.recv_async())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, SyncEvent::FolderSynced { .. }));
        manager.remove("acct1").await;
    }

    #[tokio::test]
    async fn test_monitor_lifecycle() {
        let manager = manager();
        manager.start_monitor("acct2").await.unwrap();
        manager.start_monitor("acct2").await.unwrap();
        assert!(manager.is_monitoring("acct2").await);

        let events = manager.events("acct2").await.unwrap();
        let event = tokio::time::timeout(std::time::Duration::from_secs(5), events.recv_async())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, SyncEvent::FolderSynced { .. }));

        manager.remove("acct2").await;
        assert!(!manager.is_monitoring("acct2").await);
        assert!(manager.events("acct2").await.is_none());
    }
}
