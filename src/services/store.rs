// src/services/store.rs

//! In-memory listing store with snapshot persistence.
//!
//! The store is the single owner of the listing map. The crawler reads the
//! known identifiers for dedupe, the harvest pipeline merges fresh summaries
//! and the detail enricher commits one listing's enrichment at a time.
//! Every mutation is published on a broadcast channel for presentation
//! collaborators.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::broadcast;

use crate::error::Result;
use crate::models::{DetailData, FetchStatus, Listing, ListingStats, SortKey};
use crate::storage::{SnapshotStorage, WriteMetadata};

const EVENT_CAPACITY: usize = 256;

/// Notifications published by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// Listings were added, removed or had summary/user fields changed
    ListingsChanged,
    /// One listing's enrichment data changed
    DetailsChanged(String),
    /// Free-form progress text; empty clears the status line
    StatusText(String),
}

/// Result of merging one freshly observed summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeOutcome {
    pub is_new: bool,
    pub needs_detail_fetch: bool,
}

/// Terminal result of one enrichment task.
#[derive(Debug, Clone, PartialEq)]
pub enum DetailOutcome {
    Fetched(DetailData),
    Failed { status: FetchStatus, message: String },
}

/// Summary of a snapshot load.
#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    pub loaded: usize,
    pub skipped: usize,
    /// Links left in `PendingDetails` by a previous run
    pub pending: Vec<String>,
}

/// Concurrent listing map keyed by canonical link.
pub struct ListingStore {
    listings: RwLock<HashMap<String, Listing>>,
    storage: Arc<dyn SnapshotStorage>,
    events: broadcast::Sender<StoreEvent>,
}

impl ListingStore {
    pub fn new(storage: Arc<dyn SnapshotStorage>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            listings: RwLock::new(HashMap::new()),
            storage,
            events,
        }
    }

    /// Subscribe to store notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    fn notify(&self, event: StoreEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Publish a status line.
    pub fn set_status(&self, text: impl Into<String>) {
        self.notify(StoreEvent::StatusText(text.into()));
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Listing>> {
        self.listings.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Listing>> {
        self.listings.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Merge a freshly observed summary into the store.
    ///
    /// Unseen links are inserted as-is in `PendingDetails`. Known links get
    /// every summary field overwritten while favorite, viewed and first-seen
    /// state is kept; they are re-queued when they never completed a detail
    /// fetch or when `recheck` is set.
    pub fn merge_summary(&self, mut fresh: Listing, recheck: bool) -> MergeOutcome {
        let outcome = {
            let mut listings = self.write();
            match listings.get_mut(&fresh.link) {
                Some(existing) => {
                    existing.apply_summary(&fresh);
                    let needs_detail_fetch = !existing.details_fetched || recheck;
                    if needs_detail_fetch {
                        existing.reset_for_fetch();
                    }
                    log::debug!("Updated existing listing: {}", existing.link);
                    MergeOutcome {
                        is_new: false,
                        needs_detail_fetch,
                    }
                }
                None => {
                    fresh.fetch_status = FetchStatus::PendingDetails;
                    log::debug!("Added new listing: {}", fresh.link);
                    listings.insert(fresh.link.clone(), fresh);
                    MergeOutcome {
                        is_new: true,
                        needs_detail_fetch: true,
                    }
                }
            }
        };

        self.notify(StoreEvent::ListingsChanged);
        outcome
    }

    pub fn get(&self, link: &str) -> Option<Listing> {
        self.read().get(link).cloned()
    }

    /// Every listing, oldest first (ties broken by link).
    pub fn get_all(&self) -> Vec<Listing> {
        let mut all: Vec<Listing> = self.read().values().cloned().collect();
        all.sort_by(|a, b| {
            a.date_added
                .cmp(&b.date_added)
                .then_with(|| a.link.cmp(&b.link))
        });
        all
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Identifiers currently known, for crawl-time dedupe.
    pub fn known_links(&self) -> HashSet<String> {
        self.read().keys().cloned().collect()
    }

    /// Flip the favorite flag. Returns the new value, or None for an unknown link.
    pub fn toggle_favorite(&self, link: &str) -> Option<bool> {
        let value = {
            let mut listings = self.write();
            let listing = listings.get_mut(link)?;
            listing.is_fav = !listing.is_fav;
            listing.is_fav
        };
        log::debug!("Toggled favorite {} to {}", link, value);
        self.notify(StoreEvent::ListingsChanged);
        Some(value)
    }

    /// Flip the viewed flag. Returns the new value, or None for an unknown link.
    pub fn toggle_viewed(&self, link: &str) -> Option<bool> {
        let value = {
            let mut listings = self.write();
            let listing = listings.get_mut(link)?;
            listing.is_viewed = !listing.is_viewed;
            listing.is_viewed
        };
        self.notify(StoreEvent::ListingsChanged);
        Some(value)
    }

    /// Set the viewed flag. Returns false for an unknown link.
    pub fn set_viewed(&self, link: &str, viewed: bool) -> bool {
        let changed = {
            let mut listings = self.write();
            match listings.get_mut(link) {
                Some(listing) if listing.is_viewed != viewed => {
                    listing.is_viewed = viewed;
                    true
                }
                Some(_) => return true,
                None => return false,
            }
        };
        if changed {
            self.notify(StoreEvent::ListingsChanged);
        }
        true
    }

    /// Favorite listings sorted by title.
    pub fn favorites(&self) -> Vec<Listing> {
        let mut favs: Vec<Listing> = self.read().values().filter(|l| l.is_fav).cloned().collect();
        favs.sort_by(|a, b| a.title.cmp(&b.title));
        favs
    }

    /// Read-only filtered and sorted projection.
    ///
    /// A bound of zero disables that filter. Listings without a build year
    /// sort after every dated listing in both directions.
    pub fn filter_and_sort(
        &self,
        min_area: f64,
        max_rent: u64,
        key: SortKey,
        descending: bool,
    ) -> Vec<Listing> {
        let mut filtered: Vec<Listing> = self
            .get_all()
            .into_iter()
            .filter(|l| l.area.is_finite())
            .filter(|l| min_area <= 0.0 || l.area >= min_area)
            .filter(|l| max_rent == 0 || l.middle_rent <= max_rent)
            .collect();

        filtered.sort_by(|a, b| compare_by(a, b, key, descending));
        filtered
    }

    /// Counts, averages and layout histogram for a filtered set.
    pub fn compute_statistics(&self, filtered: &[Listing]) -> ListingStats {
        let (total, favorites) = {
            let listings = self.read();
            (listings.len(), listings.values().filter(|l| l.is_fav).count())
        };

        let mut stats = ListingStats {
            total,
            displayed: filtered.len(),
            favorites,
            ..ListingStats::default()
        };
        if filtered.is_empty() {
            return stats;
        }

        let rent_sum: u64 = filtered.iter().map(|l| l.middle_rent).sum();
        stats.average_rent = Some(rent_sum as f64 / filtered.len() as f64);

        let areas: Vec<f64> = filtered
            .iter()
            .map(|l| l.area)
            .filter(|a| a.is_finite() && *a > 0.0)
            .collect();
        if !areas.is_empty() {
            stats.average_area = Some(areas.iter().sum::<f64>() / areas.len() as f64);
        }

        for listing in filtered {
            *stats.layout_counts.entry(listing.layout.clone()).or_insert(0) += 1;
        }
        stats
    }

    /// Put one listing back into `PendingDetails`. Returns false for an unknown link.
    pub fn mark_pending(&self, link: &str) -> bool {
        let found = match self.write().get_mut(link) {
            Some(listing) => {
                listing.reset_for_fetch();
                true
            }
            None => false,
        };
        if found {
            self.notify(StoreEvent::ListingsChanged);
        }
        found
    }

    /// Put every listing back into `PendingDetails`, returning their links oldest first.
    pub fn mark_all_pending(&self) -> Vec<String> {
        let links = {
            let mut listings = self.write();
            let mut order: Vec<(chrono::DateTime<chrono::Utc>, String)> = listings
                .values_mut()
                .map(|listing| {
                    listing.reset_for_fetch();
                    (listing.date_added, listing.link.clone())
                })
                .collect();
            order.sort();
            order.into_iter().map(|(_, link)| link).collect::<Vec<_>>()
        };
        self.notify(StoreEvent::ListingsChanged);
        links
    }

    /// Fail a listing that was skipped because a stop was requested.
    ///
    /// A listing whose details already loaded keeps them; observers are
    /// notified either way.
    pub fn fail_stopped(&self, link: &str, message: &str) {
        let found = match self.write().get_mut(link) {
            Some(listing) => {
                if listing.fetch_status != FetchStatus::DetailsOk {
                    listing.fail_details(FetchStatus::DetailFetchError, message);
                }
                true
            }
            None => false,
        };
        if found {
            self.notify(StoreEvent::DetailsChanged(link.to_string()));
        }
    }

    /// Commit the terminal result of an enrichment task in one step.
    ///
    /// Returns false when the listing was removed while the task ran.
    pub fn complete_details(&self, link: &str, outcome: DetailOutcome) -> bool {
        let found = match self.write().get_mut(link) {
            Some(listing) => {
                match outcome {
                    DetailOutcome::Fetched(details) => listing.apply_details(details),
                    DetailOutcome::Failed { status, message } => {
                        listing.fail_details(status, message)
                    }
                }
                true
            }
            None => false,
        };
        self.notify(StoreEvent::DetailsChanged(link.to_string()));
        found
    }

    /// Restore the store from the durable snapshot.
    ///
    /// Records that fail to decode or fail structural checks are logged and
    /// skipped. Links still in `PendingDetails` are reported so the caller
    /// can re-queue them.
    pub async fn load(&self) -> Result<LoadReport> {
        let records = self.storage.load_records().await?.unwrap_or_default();

        let mut report = LoadReport::default();
        let mut restored = HashMap::with_capacity(records.len());
        for record in records {
            let hint = record
                .get("link")
                .and_then(|v| v.as_str())
                .unwrap_or("NO LINK")
                .to_string();

            let listing: Listing = match serde_json::from_value(record) {
                Ok(listing) => listing,
                Err(e) => {
                    log::warn!("Skipped invalid listing data from snapshot ({}): {}", hint, e);
                    report.skipped += 1;
                    continue;
                }
            };
            if let Err(reason) = listing.check() {
                log::warn!("Skipped invalid listing data from snapshot ({}): {}", hint, reason);
                report.skipped += 1;
                continue;
            }

            if listing.needs_details() {
                report.pending.push(listing.link.clone());
            }
            restored.insert(listing.link.clone(), listing);
        }
        report.loaded = restored.len();

        *self.write() = restored;
        log::info!(
            "Loaded {} listings from {}. Found {} pending detail fetches.",
            report.loaded,
            self.storage.location(),
            report.pending.len()
        );
        self.notify(StoreEvent::ListingsChanged);
        Ok(report)
    }

    /// Persist every listing, oldest first.
    pub async fn save(&self) -> Result<WriteMetadata> {
        let listings = self.get_all();
        self.storage.save_listings(&listings).await
    }

    /// Drop every listing from memory and delete the snapshot.
    pub async fn clear_all(&self) -> Result<()> {
        self.write().clear();
        self.storage.clear().await?;
        log::info!("Cleared all listings");
        self.notify(StoreEvent::ListingsChanged);
        Ok(())
    }
}

fn compare_by(a: &Listing, b: &Listing, key: SortKey, descending: bool) -> Ordering {
    let directed = |ord: Ordering| if descending { ord.reverse() } else { ord };
    match key {
        SortKey::Rent => directed(a.middle_rent.cmp(&b.middle_rent)),
        SortKey::Area => directed(a.area.total_cmp(&b.area)),
        SortKey::PricePerM2 => directed(a.ppm2.total_cmp(&b.ppm2)),
        SortKey::DateAdded => directed(a.date_added.cmp(&b.date_added)),
        SortKey::BuildYear => match (a.build_year, b.build_year) {
            (Some(x), Some(y)) => directed(x.cmp(&y)),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        },
    }
}
