//! Local filesystem snapshot storage.
//!
//! The snapshot is a pretty-printed UTF-8 JSON array of listing records,
//! written atomically (temp file, then rename).

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Serialize, de::DeserializeOwned};
use tokio::io::AsyncWriteExt;

use crate::error::{AppError, Result};
use crate::models::Listing;
use crate::storage::{SnapshotStorage, WriteMetadata};

/// Local filesystem storage backend.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root_dir: PathBuf,
    snapshot_key: String,
}

impl LocalStorage {
    /// Create a new LocalStorage rooted at the given directory.
    pub fn new(root_dir: impl Into<PathBuf>, snapshot_key: impl Into<String>) -> Self {
        Self {
            root_dir: root_dir.into(),
            snapshot_key: snapshot_key.into(),
        }
    }

    /// Get the full path for a relative key.
    fn path(&self, key: &str) -> PathBuf {
        self.root_dir.join(key)
    }

    /// Ensure parent directory exists.
    async fn ensure_dir(&self, path: &PathBuf) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Write bytes atomically (write to temp, then rename).
    async fn write_bytes(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path(key);
        self.ensure_dir(&path).await?;

        let tmp = path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        drop(file);

        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    /// Write JSON data.
    async fn write_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(value)?;
        self.write_bytes(key, &bytes).await
    }

    /// Read bytes, returning None if file doesn't exist.
    async fn read_bytes(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::Io(e)),
        }
    }

    /// Read JSON data.
    async fn read_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.read_bytes(key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl SnapshotStorage for LocalStorage {
    async fn load_records(&self) -> Result<Option<Vec<serde_json::Value>>> {
        match self.read_json::<serde_json::Value>(&self.snapshot_key).await? {
            Some(serde_json::Value::Array(records)) => Ok(Some(records)),
            Some(_) => {
                log::warn!(
                    "Snapshot {} is not a list of records; ignoring it",
                    self.location()
                );
                Ok(Some(Vec::new()))
            }
            None => {
                log::info!("No snapshot found at {}", self.location());
                Ok(None)
            }
        }
    }

    async fn save_listings(&self, listings: &[Listing]) -> Result<WriteMetadata> {
        self.write_json(&self.snapshot_key, listings).await?;
        log::info!("Saved {} listings to {}", listings.len(), self.location());

        Ok(WriteMetadata {
            count: listings.len(),
            location: self.location(),
            timestamp: Utc::now(),
        })
    }

    async fn clear(&self) -> Result<bool> {
        match tokio::fs::remove_file(self.path(&self.snapshot_key)).await {
            Ok(()) => {
                log::info!("Cleared snapshot {}", self.location());
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(AppError::Io(e)),
        }
    }

    fn location(&self) -> String {
        self.path(&self.snapshot_key).display().to_string()
    }
}
