// src/models/mod.rs

//! Domain models for the harvester.
//!
//! This module contains all data structures used throughout the application,
//! organized by their primary purpose.

mod config;
mod listing;
mod stats;

// Re-export all public types
pub use config::{
    Config, CrawlerConfig, DetailConfig, LayoutParam, QueryParam, SearchConfig, SiteConfig,
    StorageConfig,
};
pub use listing::{DetailData, FetchStatus, Listing, Summary, parse_build_year, price_per_m2};
pub use stats::{ListingStats, SortKey};
