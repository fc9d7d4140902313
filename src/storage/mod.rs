//! Storage abstractions for listing persistence and photo caching.
//!
//! ## Directory Structure
//!
//! ```text
//! storage/
//! ├── config.toml            # Harvester configuration
//! ├── listings_cache.json    # Durable listing snapshot
//! └── image_cache/           # Content-addressed photo assets
//!     ├── 3f1c…9a.jpg
//!     └── 77b0…e2.png
//! ```

pub mod assets;
pub mod local;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::Listing;

// Re-export for convenience
pub use assets::AssetCache;
pub use local::LocalStorage;

/// Metadata about a snapshot write.
#[derive(Debug, Clone)]
pub struct WriteMetadata {
    /// Number of listings written
    pub count: usize,
    /// Where the snapshot landed
    pub location: String,
    /// Timestamp of the write
    pub timestamp: DateTime<Utc>,
}

/// Trait for durable listing snapshot backends.
#[async_trait]
pub trait SnapshotStorage: Send + Sync {
    /// Load the raw records of the last snapshot.
    ///
    /// Returns `None` when no snapshot exists yet. Records are handed back
    /// undecoded so a single malformed entry can be skipped by the caller.
    async fn load_records(&self) -> Result<Option<Vec<serde_json::Value>>>;

    /// Replace the snapshot with the given ordered listings.
    async fn save_listings(&self, listings: &[Listing]) -> Result<WriteMetadata>;

    /// Delete the snapshot. Returns whether anything was removed.
    async fn clear(&self) -> Result<bool>;

    /// Human-readable snapshot location.
    fn location(&self) -> String;
}
