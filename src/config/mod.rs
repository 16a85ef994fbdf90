use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::backend::ServiceKind;
use crate::types::error::SyncError;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Engine tuning shared by every account
    #[serde(default)]
    pub sync: SyncConfig,

    /// Accounts to keep in sync
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,
}

/// Sync engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Ceiling on remote messages requested per reconciliation iteration
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Fetched messages are written to the local store in chunks of this size
    #[serde(default = "default_flush_threshold")]
    pub flush_threshold: usize,

    /// Background sync interval in seconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,

    /// SQLite cache location (defaults under the platform data dir)
    #[serde(default)]
    pub db_path: Option<PathBuf>,
}

/// Account configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    /// Account identity, used in gate and command keys
    pub id: String,

    /// Which kind of remote service hosts the mailbox
    #[serde(default)]
    pub service: ServiceKind,

    /// Login name (usually the email address)
    pub username: String,

    /// Where the secret comes from
    pub password: PasswordSource,

    /// Folders to sync
    #[serde(default = "default_folders")]
    pub folders: Vec<String>,
}

/// Password source - can be raw value or command to execute
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PasswordSource {
    /// Raw password value
    Raw(String),
    /// Command to execute to get password
    Command { command: String },
}

fn default_batch_size() -> usize {
    10_000
}

fn default_flush_threshold() -> usize {
    1_000
}

fn default_poll_interval() -> u64 {
    60
}

fn default_folders() -> Vec<String> {
    vec!["INBOX".to_string()]
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            flush_threshold: default_flush_threshold(),
            poll_interval_seconds: default_poll_interval(),
            db_path: None,
        }
    }
}

impl SyncConfig {
    /// Resolved SQLite path
    pub fn db_path(&self) -> PathBuf {
        match &self.db_path {
            Some(path) => path.clone(),
            None => dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("mailsync")
                .join("cache.db"),
        }
    }
}

impl AppConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, SyncError> {
        let config: AppConfig = toml::from_str(content)
            .map_err(|e| SyncError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn account(&self, id: &str) -> Option<&AccountConfig> {
        self.accounts.iter().find(|a| a.id == id)
    }

    fn validate(&self) -> Result<(), SyncError> {
        if self.sync.batch_size == 0 {
            return Err(SyncError::Config("batch_size must be positive".to_string()));
        }
        if self.sync.flush_threshold == 0 {
            return Err(SyncError::Config(
                "flush_threshold must be positive".to_string(),
            ));
        }
        if self.sync.poll_interval_seconds == 0 {
            return Err(SyncError::Config(
                "poll_interval_seconds must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Get default config paths
pub fn default_config_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    // XDG config path
    if let Some(config_dir) = dirs::config_dir() {
        paths.push(config_dir.join("mailsync").join("config.toml"));
    }

    // Home directory fallback
    if let Some(home_dir) = dirs::home_dir() {
        paths.push(home_dir.join(".config").join("mailsync").join("config.toml"));
        paths.push(home_dir.join(".mailsyncrc"));
    }

    paths
}

/// Load configuration from the first default path that exists
pub fn load_config() -> Result<AppConfig, SyncError> {
    for path in default_config_paths() {
        if path.exists() {
            info!("Found config at: {:?}", path);
            return load_config_from_path(&path);
        }
    }

    info!("No config file found, using defaults");
    Ok(AppConfig::default())
}

/// Load configuration from a specific path
pub fn load_config_from_path(path: &Path) -> Result<AppConfig, SyncError> {
    info!("Loading configuration from: {:?}", path);

    let content = fs::read_to_string(path)
        .map_err(|e| SyncError::Config(format!("Failed to read config: {}", e)))?;

    AppConfig::from_toml_str(&content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = AppConfig::from_toml_str("").unwrap();
        assert_eq!(config.sync.batch_size, 10_000);
        assert_eq!(config.sync.flush_threshold, 1_000);
        assert_eq!(config.sync.poll_interval_seconds, 60);
        assert!(config.accounts.is_empty());
    }

    #[test]
    fn test_parse_accounts() {
        let config = AppConfig::from_toml_str(
            r#"
            [sync]
            batch_size = 500
            db_path = "/tmp/cache.db"

            [[accounts]]
            id = "acct1"
            service = "imap"
            username = "jane@example.com"
            password = "hunter2"

            [[accounts]]
            id = "acct2"
            service = "web-api"
            username = "joe@example.com"
            password = { command = "pass show mail" }
            folders = ["INBOX", "Archive"]
            "#,
        )
        .unwrap();

        assert_eq!(config.sync.batch_size, 500);
        assert_eq!(config.sync.db_path(), PathBuf::from("/tmp/cache.db"));

        let acct1 = config.account("acct1").unwrap();
        assert_eq!(acct1.service, ServiceKind::Imap);
        assert_eq!(acct1.folders, vec!["INBOX"]);
        assert!(matches!(&acct1.password, PasswordSource::Raw(p) if p == "hunter2"));

        let acct2 = config.account("acct2").unwrap();
        assert_eq!(acct2.service, ServiceKind::WebApi);
        assert_eq!(acct2.folders, vec!["INBOX", "Archive"]);
        assert!(matches!(&acct2.password, PasswordSource::Command { command } if command == "pass show mail"));
    }

    #[test]
    fn test_rejects_zero_batch() {
        let err = AppConfig::from_toml_str("[sync]\nbatch_size = 0\n").unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
    }

    #[test]
    fn test_load_from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[sync]\npoll_interval_seconds = 5").unwrap();

        let config = load_config_from_path(file.path()).unwrap();
        assert_eq!(config.sync.poll_interval_seconds, 5);
    }

    #[test]
    fn test_missing_file() {
        let err = load_config_from_path(Path::new("/nonexistent/mailsync.toml")).unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
    }
}
