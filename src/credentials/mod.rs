//! Credential acquisition for endpoint authentication
//!
//! The coordination layer asks a [`CredentialProvider`] for secrets exactly
//! once per connect or reconnect attempt and hands them straight to
//! [`RemoteEndpoint::authenticate`](crate::backend::RemoteEndpoint::authenticate).

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use tokio::process::Command;
use tracing::{debug, info};

use crate::backend::EndpointKey;
use crate::config::{AccountConfig, PasswordSource};
use crate::types::error::SyncError;

/// Secret material for one endpoint
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub secret: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("secret", &"<redacted>")
            .finish()
    }
}

#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn credentials(&self, endpoint: &EndpointKey) -> Result<Credentials, SyncError>;
}

/// Resolves credentials from the configured accounts
pub struct ConfigCredentials {
    accounts: HashMap<String, (String, PasswordSource)>,
}

impl ConfigCredentials {
    pub fn new(accounts: &[AccountConfig]) -> Self {
        let accounts = accounts
            .iter()
            .map(|a| (a.id.clone(), (a.username.clone(), a.password.clone())))
            .collect();
        Self { accounts }
    }

    /// Get or resolve password from PasswordSource
    async fn resolve_password(source: &PasswordSource) -> Result<String, SyncError> {
        match source {
            PasswordSource::Raw(password) => Ok(password.clone()),
            PasswordSource::Command { command } => {
                info!("Executing password command");
                let output = Command::new("sh")
                    .arg("-c")
                    .arg(command)
                    .output()
                    .await
                    .map_err(|e| {
                        SyncError::Credential(format!("Failed to run password command: {}", e))
                    })?;

                if !output.status.success() {
                    return Err(SyncError::Credential(
                        "Password command failed".to_string(),
                    ));
                }

                Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
            }
        }
    }
}

#[async_trait]
impl CredentialProvider for ConfigCredentials {
    async fn credentials(&self, endpoint: &EndpointKey) -> Result<Credentials, SyncError> {
        let (username, source) = self.accounts.get(&endpoint.account_id).ok_or_else(|| {
            SyncError::Credential(format!("No credentials for account {}", endpoint.account_id))
        })?;

        let secret = Self::resolve_password(source).await?;
        debug!("Resolved credentials for {}", endpoint);

        Ok(Credentials {
            username: username.clone(),
            secret,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ServiceKind;

    fn account(id: &str, password: PasswordSource) -> AccountConfig {
        AccountConfig {
            id: id.to_string(),
            service: ServiceKind::Imap,
            username: format!("{}@example.com", id),
            password,
            folders: vec!["INBOX".to_string()],
        }
    }

    #[tokio::test]
    async fn test_raw_password() {
        let provider = ConfigCredentials::new(&[account("acct1", PasswordSource::Raw("s3cret".into()))]);
        let creds = provider
            .credentials(&EndpointKey::new(ServiceKind::Imap, "acct1"))
            .await
            .unwrap();
        assert_eq!(creds.username, "acct1@example.com");
        assert_eq!(creds.secret, "s3cret");
    }

    #[tokio::test]
    async fn test_command_password() {
        let provider = ConfigCredentials::new(&[account(
            "acct1",
            PasswordSource::Command {
                command: "echo '  from-command  '".into(),
            },
        )]);
        let creds = provider
            .credentials(&EndpointKey::new(ServiceKind::Imap, "acct1"))
            .await
            .unwrap();
        assert_eq!(creds.secret, "from-command");
    }

    #[tokio::test]
    async fn test_failing_command() {
        let provider = ConfigCredentials::new(&[account(
            "acct1",
            PasswordSource::Command {
                command: "exit 3".into(),
            },
        )]);
        let err = provider
            .credentials(&EndpointKey::new(ServiceKind::Imap, "acct1"))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Credential(_)));
    }

    #[tokio::test]
    async fn test_unknown_account() {
        let provider = ConfigCredentials::new(&[]);
        let err = provider
            .credentials(&EndpointKey::new(ServiceKind::Imap, "ghost"))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Credential(_)));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let creds = Credentials {
            username: "jane".into(),
            secret: "hunter2".into(),
        };
        assert!(!format!("{:?}", creds).contains("hunter2"));
    }
}
