//! Content-addressed photo cache.
//!
//! Each asset is stored under the hex SHA-256 of its source URL plus an
//! image extension inferred from the URL path. Entries are immutable: an
//! existing file is never overwritten.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;

use crate::error::{AppError, Result};
use crate::utils::url::path_extension;

const IMAGE_EXTENSIONS: &[&str] = &[".jpg", ".jpeg", ".png", ".gif", ".webp"];
const DEFAULT_EXTENSION: &str = ".jpg";

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Disk-backed cache of downloaded listing photos.
#[derive(Debug, Clone)]
pub struct AssetCache {
    dir: PathBuf,
}

impl AssetCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Cache key for a URL: `sha256(url)` in lowercase hex.
    pub fn key(url: &str) -> String {
        hex::encode(Sha256::digest(url.as_bytes()))
    }

    /// Extension stored with the asset, `.jpg` when the URL does not name a known image type.
    pub fn extension(url: &str) -> &'static str {
        path_extension(url)
            .and_then(|ext| IMAGE_EXTENSIONS.iter().find(|known| **known == ext).copied())
            .unwrap_or(DEFAULT_EXTENSION)
    }

    /// Location an asset for `url` lives at, whether or not it exists yet.
    pub fn path_for(&self, url: &str) -> PathBuf {
        self.dir
            .join(format!("{}{}", Self::key(url), Self::extension(url)))
    }

    pub async fn contains(&self, url: &str) -> bool {
        tokio::fs::try_exists(self.path_for(url))
            .await
            .unwrap_or(false)
    }

    /// Read a cached asset, returning None on a miss.
    pub async fn get(&self, url: &str) -> Result<Option<Vec<u8>>> {
        match tokio::fs::read(self.path_for(url)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::Io(e)),
        }
    }

    /// Store an asset unless one is already cached for the URL.
    ///
    /// The write goes through a uniquely named temp file and a rename so a
    /// concurrent reader never observes a partial file.
    pub async fn put(&self, url: &str, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.path_for(url);
        if tokio::fs::try_exists(&path).await? {
            return Ok(path);
        }
        tokio::fs::create_dir_all(&self.dir).await?;

        let tmp = self.dir.join(format!(
            "{}.{}-{}.tmp",
            Self::key(url),
            std::process::id(),
            TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        drop(file);

        if tokio::fs::try_exists(&path).await? {
            tokio::fs::remove_file(&tmp).await?;
        } else {
            tokio::fs::rename(&tmp, &path).await?;
        }
        Ok(path)
    }

    /// Cached bytes for each photo URL, in order; `None` where the asset is missing.
    pub async fn photo_data(&self, photo_urls: &[String]) -> Vec<Option<Vec<u8>>> {
        let mut out = Vec::with_capacity(photo_urls.len());
        for url in photo_urls {
            match self.get(url).await {
                Ok(bytes) => out.push(bytes),
                Err(e) => {
                    log::warn!("Failed to read cached photo {}: {}", url, e);
                    out.push(None);
                }
            }
        }
        out
    }

    /// Remove every cached asset. Returns how many files were deleted.
    pub async fn clear(&self) -> Result<usize> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(AppError::Io(e)),
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                tokio::fs::remove_file(entry.path()).await?;
                removed += 1;
            }
        }
        log::info!("Removed {} cached photos from {}", removed, self.dir.display());
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_extension_inference() {
        assert_eq!(AssetCache::extension("https://x.com/a/photo.PNG"), ".png");
        assert_eq!(AssetCache::extension("https://x.com/a/photo.webp?w=300"), ".webp");
        assert_eq!(AssetCache::extension("https://x.com/a/photo.php?id=3"), ".jpg");
        assert_eq!(AssetCache::extension("https://x.com/a/photo"), ".jpg");
    }

    #[test]
    fn test_key_is_stable_hex() {
        let key = AssetCache::key("https://x.com/a.jpg");
        assert_eq!(key.len(), 64);
        assert_eq!(key, AssetCache::key("https://x.com/a.jpg"));
        assert_ne!(key, AssetCache::key("https://x.com/b.jpg"));
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let tmp = TempDir::new().unwrap();
        let cache = AssetCache::new(tmp.path().join("image_cache"));
        let url = "https://x.com/p/1.jpg";

        assert_eq!(cache.get(url).await.unwrap(), None);
        let path = cache.put(url, b"jpeg-bytes").await.unwrap();
        assert!(path.ends_with(format!("{}.jpg", AssetCache::key(url))));
        assert_eq!(cache.get(url).await.unwrap(), Some(b"jpeg-bytes".to_vec()));
    }

    #[tokio::test]
    async fn test_put_never_overwrites() {
        let tmp = TempDir::new().unwrap();
        let cache = AssetCache::new(tmp.path());
        let url = "https://x.com/p/1.png";

        cache.put(url, b"first").await.unwrap();
        cache.put(url, b"second").await.unwrap();
        assert_eq!(cache.get(url).await.unwrap(), Some(b"first".to_vec()));
    }

    #[tokio::test]
    async fn test_photo_data_and_clear() {
        let tmp = TempDir::new().unwrap();
        let cache = AssetCache::new(tmp.path().join("assets"));
        cache.put("https://x.com/1.jpg", b"one").await.unwrap();

        let urls = vec![
            "https://x.com/1.jpg".to_string(),
            "https://x.com/2.jpg".to_string(),
        ];
        let data = cache.photo_data(&urls).await;
        assert_eq!(data, vec![Some(b"one".to_vec()), None]);

        assert_eq!(cache.clear().await.unwrap(), 1);
        assert!(!cache.contains("https://x.com/1.jpg").await);
    }
}
