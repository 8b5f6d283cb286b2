//! A JSON file holding registered push tokens.
//!
//! The file layout mirrors the `userTokens` node of the realtime database:
//! `{"userTokens": {"<subscriber id>": "<push token>"}}`.

use crate::core::SubscriberStore;
use crate::registry::RegistryError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, instrument};

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenFile {
    #[serde(default)]
    user_tokens: BTreeMap<String, String>,
}

/// Stores subscriber tokens in a JSON file on disk.
pub struct JsonFileSubscriberStore {
    path: PathBuf,
    // Serializes read-modify-write cycles.
    write_lock: Mutex<()>,
}

impl JsonFileSubscriberStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read(&self) -> Result<TokenFile, RegistryError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(TokenFile::default()),
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                RegistryError::Unavailable(format!("{} is not a valid token file: {}", self.path.display(), e))
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(TokenFile::default()),
            Err(e) => Err(RegistryError::Unavailable(format!(
                "failed to read {}: {}",
                self.path.display(),
                e
            ))),
        }
    }

    async fn write(&self, file: &TokenFile) -> Result<(), RegistryError> {
        let unavailable = |e: std::io::Error| {
            RegistryError::Unavailable(format!("failed to write {}: {}", self.path.display(), e))
        };
        let bytes = serde_json::to_vec_pretty(file)
            .map_err(|e| RegistryError::Unavailable(e.to_string()))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(unavailable)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await.map_err(unavailable)?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(unavailable)?;
        Ok(())
    }
}

#[async_trait]
impl SubscriberStore for JsonFileSubscriberStore {
    async fn load_all(&self) -> Result<HashMap<String, String>, RegistryError> {
        let file = self.read().await?;
        debug!(path = %self.path.display(), count = file.user_tokens.len(), "Loaded subscriber tokens.");
        Ok(file.user_tokens.into_iter().collect())
    }

    #[instrument(skip(self, token), fields(path = %self.path.display()))]
    async fn put(&self, id: &str, token: &str) -> Result<(), RegistryError> {
        let _guard = self.write_lock.lock().await;
        let mut file = self.read().await?;
        file.user_tokens.insert(id.to_string(), token.to_string());
        self.write(&file).await
    }

    #[instrument(skip(self), fields(path = %self.path.display()))]
    async fn delete(&self, id: &str) -> Result<(), RegistryError> {
        let _guard = self.write_lock.lock().await;
        let mut file = self.read().await?;
        if file.user_tokens.remove(id).is_some() {
            self.write(&file).await?;
        }
        Ok(())
    }
}
