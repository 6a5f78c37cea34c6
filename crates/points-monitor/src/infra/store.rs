use std::path::PathBuf;

use anyhow::Context;
use async_trait::async_trait;
use points_sdk::auth::{Credential, CredentialSink};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::infra::config::{Config, KEY_CREDENTIALS_FILE};

/// Only the rotating pair goes on disk; application identity stays in
/// the environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
}

/// JSON-file credential store. Without a configured path it degrades to
/// a no-op sink: refreshed tokens then live only for the process
/// lifetime.
pub struct FileCredentialStore {
    path: Option<PathBuf>,
}

impl FileCredentialStore {
    #[must_use]
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }

    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.optional(KEY_CREDENTIALS_FILE).map(PathBuf::from))
    }

    /// Tokens persisted by an earlier run; these postdate whatever the
    /// environment still carries.
    pub fn load(&self) -> anyhow::Result<Option<StoredTokens>> {
        let Some(path) = &self.path else {
            return Ok(None);
        };
        if !path.exists() {
            return Ok(None);
        }

        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading credentials file {}", path.display()))?;
        let stored = serde_json::from_str(&raw)
            .with_context(|| format!("parsing credentials file {}", path.display()))?;
        Ok(Some(stored))
    }
}

#[async_trait]
impl CredentialSink for FileCredentialStore {
    async fn persist(&self, credential: &Credential) -> anyhow::Result<()> {
        let Some(path) = &self.path else {
            debug!("no credentials file configured; refreshed tokens kept in memory only");
            return Ok(());
        };

        let stored = StoredTokens {
            access_token: credential.access_token.clone(),
            refresh_token: credential.refresh_token.clone(),
        };
        let raw = serde_json::to_string_pretty(&stored)?;

        tokio::fs::write(path, raw)
            .await
            .with_context(|| format!("writing credentials file {}", path.display()))?;

        info!("persisted refreshed credential to {}", path.display());
        Ok(())
    }
}
