// src/pipeline/harvest.rs

//! Harvest pipeline: crawl into the store, enrich, save.

use chrono::Utc;

use crate::error::{AppError, Result};
use crate::models::SearchConfig;
use crate::services::{CrawlEvent, CrawlRequest};

use super::Harvester;

/// What to harvest.
#[derive(Debug, Clone, Default)]
pub struct HarvestRequest {
    pub layouts: Vec<String>,
    /// Skip listings already in the store without parsing them
    pub skip_known: bool,
    /// Re-fetch details even for listings that already have them
    pub recheck_details: bool,
}

impl HarvestRequest {
    pub fn from_search(search: &SearchConfig) -> Self {
        Self {
            layouts: search.layouts.clone(),
            skip_known: search.skip_known,
            recheck_details: search.recheck_details,
        }
    }
}

/// Outcome of one harvest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HarvestSummary {
    /// Result pages fetched
    pub pages: u32,
    /// Listings seen on the result pages
    pub discovered: usize,
    pub added: usize,
    pub updated: usize,
    /// Detail fetches scheduled
    pub queued: usize,
    /// The crawl ended on a stop request
    pub stopped: bool,
}

/// Run one crawl, merge everything it finds, wait for enrichment and save.
///
/// Listings found before a crawl failure are still enriched and saved; the
/// failure is returned afterwards.
pub async fn run_harvest(
    harvester: &Harvester,
    request: HarvestRequest,
) -> Result<HarvestSummary> {
    let start_time = Utc::now();
    let store = harvester.store();
    log::info!(
        "Starting harvest for layouts {:?} (skip known: {}, recheck details: {})",
        request.layouts,
        request.skip_known,
        request.recheck_details
    );

    let mut run = harvester.crawler().start(CrawlRequest {
        layouts: request.layouts.clone(),
        known: store.known_links(),
        skip_known: request.skip_known,
    });

    let mut summary = HarvestSummary::default();
    while let Some(event) = run.events.recv().await {
        match event {
            CrawlEvent::NewListing(listing) => {
                summary.discovered += 1;
                let link = listing.link.clone();
                let outcome = store.merge_summary(listing, request.recheck_details);
                if outcome.is_new {
                    summary.added += 1;
                } else {
                    summary.updated += 1;
                }
                if outcome.needs_detail_fetch {
                    harvester.enricher().enqueue(&link);
                    summary.queued += 1;
                }
            }
            CrawlEvent::Progress(text) => store.set_status(text),
            CrawlEvent::Finished(crawl) => {
                summary.pages = crawl.pages;
                summary.stopped = crawl.stopped;
            }
            CrawlEvent::Error(message) => log::warn!("Harvest crawl failed: {}", message),
        }
    }
    let crawled = match run.handle.await {
        Ok(result) => result,
        Err(e) => Err(AppError::crawl("crawl task", e)),
    };

    log::info!(
        "Crawl done: {} discovered, {} new, {} updated; waiting for {} detail fetches",
        summary.discovered,
        summary.added,
        summary.updated,
        harvester.enricher().outstanding()
    );
    harvester.enricher().wait_idle().await;

    let saved = harvester.save().await?;
    store.set_status("");
    log::info!(
        "Saved {} listings to {} in {}s",
        saved.count,
        saved.location,
        (Utc::now() - start_time).num_seconds()
    );

    crawled?;
    Ok(summary)
}

/// Re-fetch details for every listing, then save.
pub async fn run_refresh(harvester: &Harvester) -> Result<usize> {
    let queued = harvester.enricher().refresh_all().await;
    harvester.enricher().wait_idle().await;
    harvester.save().await?;
    Ok(queued)
}

/// Re-fetch details for one listing, then save. False for an unknown link.
pub async fn run_retry(harvester: &Harvester, link: &str) -> Result<bool> {
    if !harvester.enricher().retry_one(link) {
        return Ok(false);
    }
    harvester.enricher().wait_idle().await;
    harvester.save().await?;
    Ok(true)
}
