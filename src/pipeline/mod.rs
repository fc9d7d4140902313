//! Pipeline entry points for harvester operations.
//!
//! - `Harvester`: store, crawler and enricher wired around one stop signal
//! - `run_harvest`: crawl into the store, enrich new listings, save
//! - `run_refresh` / `run_retry`: re-fetch details, save

pub mod harvest;
pub mod harvester;

pub use harvest::{HarvestRequest, HarvestSummary, run_harvest, run_refresh, run_retry};
pub use harvester::Harvester;
