// src/pipeline/harvester.rs

//! Wiring of the store, crawler and enricher around one stop signal.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::Result;
use crate::models::Config;
use crate::services::{DetailEnricher, ListingCrawler, ListingStore, LoadReport};
use crate::storage::{AssetCache, LocalStorage, WriteMetadata};
use crate::utils::{Fetcher, HttpFetcher, StopSignal};

/// The acquisition pipeline's components, sharing one config and stop signal.
pub struct Harvester {
    config: Arc<Config>,
    storage_dir: PathBuf,
    store: Arc<ListingStore>,
    crawler: ListingCrawler,
    enricher: DetailEnricher,
    assets: AssetCache,
    stop: StopSignal,
}

impl Harvester {
    /// Build a harvester persisting under `storage_dir`.
    ///
    /// Spawns the detail workers, so it must be called inside a Tokio runtime.
    pub fn new(
        config: Config,
        storage_dir: impl Into<PathBuf>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Result<Self> {
        let config = Arc::new(config);
        let storage_dir = storage_dir.into();
        let stop = StopSignal::new();

        let snapshot = LocalStorage::new(&storage_dir, config.storage.snapshot_file.clone());
        let store = Arc::new(ListingStore::new(Arc::new(snapshot)));
        let assets = AssetCache::new(config.storage.asset_path(&storage_dir));

        let crawler = ListingCrawler::new(Arc::clone(&config), Arc::clone(&fetcher), stop.clone())?;
        let enricher = DetailEnricher::new(
            Arc::clone(&config),
            Arc::clone(&store),
            fetcher,
            assets.clone(),
            stop.clone(),
        )?;

        Ok(Self {
            config,
            storage_dir,
            store,
            crawler,
            enricher,
            assets,
            stop,
        })
    }

    /// Build a harvester talking to the live site.
    pub fn with_http(config: Config, storage_dir: impl Into<PathBuf>) -> Result<Self> {
        let fetcher = Arc::new(HttpFetcher::new(&config)?);
        Self::new(config, storage_dir, fetcher)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    pub fn store(&self) -> &Arc<ListingStore> {
        &self.store
    }

    pub fn crawler(&self) -> &ListingCrawler {
        &self.crawler
    }

    pub fn enricher(&self) -> &DetailEnricher {
        &self.enricher
    }

    pub fn assets(&self) -> &AssetCache {
        &self.assets
    }

    pub fn stop_signal(&self) -> &StopSignal {
        &self.stop
    }

    /// Stop the crawl and every pending enrichment.
    pub fn stop(&self) {
        log::info!("Signalling crawler and detail workers to stop");
        self.stop.stop();
    }

    /// Restore the snapshot and re-queue listings it left pending.
    ///
    /// Clears a previous stop request so the re-queued fetches run.
    pub async fn load(&self) -> Result<LoadReport> {
        self.stop.clear();
        let report = self.store.load().await?;
        self.enricher.resume(&report.pending);
        Ok(report)
    }

    pub async fn save(&self) -> Result<WriteMetadata> {
        self.store.save().await
    }

    /// Wipe listings, snapshot and cached photos. Returns the number of photos removed.
    pub async fn clear_all(&self) -> Result<usize> {
        self.store.clear_all().await?;
        self.assets.clear().await
    }
}
