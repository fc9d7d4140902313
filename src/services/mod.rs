//! Service layer for the harvester.
//!
//! This module contains the business logic for:
//! - Listing storage and merging (`ListingStore`)
//! - Search page crawling (`ListingCrawler`, `SummaryParser`)
//! - Detail enrichment (`DetailEnricher`, `DetailParser`)

pub mod crawler;
pub mod details;
pub mod enricher;
pub mod store;
pub mod summary;

pub use crawler::{CrawlEvent, CrawlRequest, CrawlRun, CrawlSummary, ListingCrawler};
pub use details::DetailParser;
pub use enricher::DetailEnricher;
pub use store::{DetailOutcome, ListingStore, LoadReport, MergeOutcome, StoreEvent};
pub use summary::{BoxOutcome, SummaryParser};
