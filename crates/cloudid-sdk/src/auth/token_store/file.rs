//! File-backed durable token store.
//!
//! All entries live in one JSON document keyed by [`TokenKey::storage_id`]:
//! - file mode `0600`, parent directories `0700` (Unix)
//! - writes go to a temp file that is then renamed over the original
//!
//! The read-modify-write in [`FileTokenStore::put`] is not atomic on its own;
//! callers serialise access with the process lock.

use super::TokenStore;
use crate::auth::error::{ProviderError, ProviderResult};
use crate::auth::types::{Token, TokenKey};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, instrument};

/// Default token file name inside the data directory
pub const TOKEN_FILE: &str = "refresh-tokens.json";

#[cfg(unix)]
const FILE_MODE: u32 = 0o600;

#[cfg(unix)]
const DIR_MODE: u32 = 0o700;

#[derive(Debug, Default, Serialize, Deserialize)]
struct TokenFile {
    #[serde(flatten)]
    tokens: BTreeMap<String, Token>,
}

/// Durable token store backed by a JSON file
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at `<data_dir>/refresh-tokens.json`
    pub fn in_dir(data_dir: impl AsRef<Path>) -> Self {
        Self::new(data_dir.as_ref().join(TOKEN_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_file(&self) -> ProviderResult<TokenFile> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(TokenFile::default()),
            Err(e) => {
                return Err(ProviderError::Storage(format!(
                    "Failed to read token file '{}': {}",
                    self.path.display(),
                    e
                )))
            }
        };

        if content.trim().is_empty() {
            return Ok(TokenFile::default());
        }

        serde_json::from_str(&content).map_err(|e| {
            ProviderError::Storage(format!(
                "Failed to parse token file '{}': {}",
                self.path.display(),
                e
            ))
        })
    }

    #[instrument(skip(self, file))]
    async fn write_file(&self, file: &TokenFile) -> ProviderResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    ProviderError::Storage(format!(
                        "Failed to create directory '{}': {}",
                        parent.display(),
                        e
                    ))
                })?;

                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    tokio::fs::set_permissions(parent, std::fs::Permissions::from_mode(DIR_MODE))
                        .await?;
                }
            }
        }

        let content = serde_json::to_string_pretty(file)?;

        let temp_path = self.path.with_extension("tmp");
        tokio::fs::write(&temp_path, content).await.map_err(|e| {
            ProviderError::Storage(format!(
                "Failed to write temp file '{}': {}",
                temp_path.display(),
                e
            ))
        })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&temp_path, std::fs::Permissions::from_mode(FILE_MODE))
                .await?;
        }

        if let Err(e) = tokio::fs::rename(&temp_path, &self.path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(ProviderError::Storage(format!(
                "Failed to rename '{}' to '{}': {}",
                temp_path.display(),
                self.path.display(),
                e
            )));
        }

        Ok(())
    }
}

#[async_trait]
impl TokenStore for FileTokenStore {
    #[instrument(skip(self, key), fields(key = %key))]
    async fn get(&self, key: &TokenKey) -> ProviderResult<Option<Token>> {
        let mut file = self.read_file().await?;
        Ok(file.tokens.remove(&key.storage_id()))
    }

    #[instrument(skip(self, key, token), fields(key = %key))]
    async fn put(&self, key: &TokenKey, token: &Token) -> ProviderResult<()> {
        let mut file = self.read_file().await?;
        file.tokens.insert(key.storage_id(), token.clone());
        self.write_file(&file).await?;
        debug!("Stored token in {}", self.path.display());
        Ok(())
    }

    fn name(&self) -> &str {
        "file"
    }
}
