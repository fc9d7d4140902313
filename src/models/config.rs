//! Application configuration structures.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::SortKey;

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Target site layout and search URL contract
    #[serde(default)]
    pub site: SiteConfig,

    /// Paginated crawl behavior
    #[serde(default)]
    pub crawler: CrawlerConfig,

    /// Detail enrichment behavior
    #[serde(default)]
    pub detail: DetailConfig,

    /// On-disk locations
    #[serde(default)]
    pub storage: StorageConfig,

    /// Persisted search preferences
    #[serde(default)]
    pub search: SearchConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration or return default if loading fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(&path).unwrap_or_else(|e| {
            log::warn!(
                "Config load failed from {:?}: {}. Using defaults.",
                path.as_ref(),
                e
            );
            Self::default()
        })
    }

    /// Write the configuration as TOML.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
        Ok(())
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if url::Url::parse(&self.site.base_url).is_err() {
            return Err(AppError::validation("site.base_url is not a valid URL"));
        }
        if self.site.area_codes.is_empty() {
            return Err(AppError::validation("site.area_codes is empty"));
        }
        if self.site.layouts.is_empty() {
            return Err(AppError::validation("site.layouts is empty"));
        }
        if self.crawler.user_agents.iter().all(|ua| ua.trim().is_empty()) {
            return Err(AppError::validation("crawler.user_agents is empty"));
        }
        if self.crawler.page_timeout_secs == 0 {
            return Err(AppError::validation("crawler.page_timeout_secs must be > 0"));
        }
        if self.crawler.initial_backoff_ms > self.crawler.max_backoff_ms {
            return Err(AppError::validation(
                "crawler.initial_backoff_ms must not exceed crawler.max_backoff_ms",
            ));
        }
        if self.crawler.empty_pages_to_stop == 0 {
            return Err(AppError::validation(
                "crawler.empty_pages_to_stop must be > 0",
            ));
        }
        if self.detail.workers == 0 {
            return Err(AppError::validation("detail.workers must be > 0"));
        }
        if self.detail.page_timeout_secs == 0 || self.detail.photo_timeout_secs == 0 {
            return Err(AppError::validation("detail timeouts must be > 0"));
        }
        if let Some(unknown) = self
            .search
            .layouts
            .iter()
            .find(|name| self.site.layout_param(name).is_none())
        {
            return Err(AppError::validation(format!(
                "search.layouts contains unknown layout '{unknown}'"
            )));
        }
        Ok(())
    }
}

/// Fixed parts of the search URL contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteConfig {
    /// Scheme and host every relative link is resolved against
    #[serde(default = "defaults::base_url")]
    pub base_url: String,

    /// Path of the paginated search listing
    #[serde(default = "defaults::search_path")]
    pub search_path: String,

    /// Charset the site serves its pages in
    #[serde(default = "defaults::encoding")]
    pub encoding: String,

    /// Ward codes, one `jc[]` parameter each
    #[serde(default = "defaults::area_codes")]
    pub area_codes: Vec<String>,

    /// Constant query parameters appended after the area codes
    #[serde(default = "defaults::fixed_params")]
    pub fixed_params: Vec<QueryParam>,

    /// Layout category to query parameter table
    #[serde(default = "defaults::layouts")]
    pub layouts: Vec<LayoutParam>,
}

impl SiteConfig {
    /// Query parameter name for a layout category, if the category is known.
    pub fn layout_param(&self, layout: &str) -> Option<&str> {
        self.layouts
            .iter()
            .find(|l| l.name == layout)
            .map(|l| l.param.as_str())
    }
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::base_url(),
            search_path: defaults::search_path(),
            encoding: defaults::encoding(),
            area_codes: defaults::area_codes(),
            fixed_params: defaults::fixed_params(),
            layouts: defaults::layouts(),
        }
    }
}

/// A constant `name=value` query parameter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueryParam {
    pub name: String,
    pub value: String,
}

/// A layout category and the boolean query parameter that selects it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LayoutParam {
    /// Category as displayed on the site (e.g., "1LDK")
    pub name: String,

    /// Query parameter name (e.g., "m1ldk")
    pub param: String,
}

/// Paginated crawl settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlerConfig {
    /// User-Agent headers, rotated per request
    #[serde(default = "defaults::user_agents")]
    pub user_agents: Vec<String>,

    /// Search page request timeout in seconds
    #[serde(default = "defaults::page_timeout")]
    pub page_timeout_secs: u64,

    /// First backoff wait after a retryable failure
    #[serde(default = "defaults::initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Cap on the doubled backoff wait
    #[serde(default = "defaults::max_backoff")]
    pub max_backoff_ms: u64,

    /// Retries allowed for a single page before the run fails
    #[serde(default = "defaults::max_retries")]
    pub max_retries: u32,

    /// Delay after each emitted listing
    #[serde(default = "defaults::record_delay")]
    pub record_delay_ms: u64,

    /// Delay between pages
    #[serde(default = "defaults::page_delay")]
    pub page_delay_ms: u64,

    /// Delay after a page with no listings
    #[serde(default = "defaults::empty_page_delay")]
    pub empty_page_delay_ms: u64,

    /// Consecutive empty pages that end a run
    #[serde(default = "defaults::empty_pages_to_stop")]
    pub empty_pages_to_stop: u32,

    /// Rent read without the monthly suffix must exceed this to be accepted
    #[serde(default = "defaults::min_fallback_rent")]
    pub min_fallback_rent: u64,
}

impl CrawlerConfig {
    pub fn page_timeout(&self) -> Duration {
        Duration::from_secs(self.page_timeout_secs)
    }

    pub fn record_delay(&self) -> Duration {
        Duration::from_millis(self.record_delay_ms)
    }

    pub fn page_delay(&self) -> Duration {
        Duration::from_millis(self.page_delay_ms)
    }

    pub fn empty_page_delay(&self) -> Duration {
        Duration::from_millis(self.empty_page_delay_ms)
    }

    /// Backoff wait before retry number `retries + 1`.
    pub fn backoff(&self, retries: u32) -> Duration {
        let factor = 1u64.checked_shl(retries).unwrap_or(u64::MAX);
        let wait = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(wait)
    }
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            user_agents: defaults::user_agents(),
            page_timeout_secs: defaults::page_timeout(),
            initial_backoff_ms: defaults::initial_backoff(),
            max_backoff_ms: defaults::max_backoff(),
            max_retries: defaults::max_retries(),
            record_delay_ms: defaults::record_delay(),
            page_delay_ms: defaults::page_delay(),
            empty_page_delay_ms: defaults::empty_page_delay(),
            empty_pages_to_stop: defaults::empty_pages_to_stop(),
            min_fallback_rent: defaults::min_fallback_rent(),
        }
    }
}

/// Detail enrichment settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetailConfig {
    /// Concurrent detail fetches
    #[serde(default = "defaults::workers")]
    pub workers: usize,

    /// Detail page request timeout in seconds
    #[serde(default = "defaults::detail_timeout")]
    pub page_timeout_secs: u64,

    /// Photo request timeout in seconds
    #[serde(default = "defaults::photo_timeout")]
    pub photo_timeout_secs: u64,

    /// Delay between enqueues during a bulk refresh
    #[serde(default = "defaults::refresh_stagger")]
    pub refresh_stagger_ms: u64,
}

impl DetailConfig {
    pub fn page_timeout(&self) -> Duration {
        Duration::from_secs(self.page_timeout_secs)
    }

    pub fn photo_timeout(&self) -> Duration {
        Duration::from_secs(self.photo_timeout_secs)
    }

    pub fn refresh_stagger(&self) -> Duration {
        Duration::from_millis(self.refresh_stagger_ms)
    }
}

impl Default for DetailConfig {
    fn default() -> Self {
        Self {
            workers: defaults::workers(),
            page_timeout_secs: defaults::detail_timeout(),
            photo_timeout_secs: defaults::photo_timeout(),
            refresh_stagger_ms: defaults::refresh_stagger(),
        }
    }
}

/// Storage locations, relative to the storage directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "defaults::snapshot_file")]
    pub snapshot_file: String,

    #[serde(default = "defaults::asset_dir")]
    pub asset_dir: String,
}

impl StorageConfig {
    pub fn asset_path(&self, root: &Path) -> PathBuf {
        root.join(&self.asset_dir)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            snapshot_file: defaults::snapshot_file(),
            asset_dir: defaults::asset_dir(),
        }
    }
}

/// Search preferences remembered between runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Layout categories selected for a crawl
    #[serde(default = "defaults::selected_layouts")]
    pub layouts: Vec<String>,

    #[serde(default)]
    pub min_area: f64,

    #[serde(default = "defaults::max_rent")]
    pub max_rent: u64,

    #[serde(default)]
    pub sort_key: SortKey,

    #[serde(default)]
    pub descending: bool,

    /// Skip boxes whose link is already known
    #[serde(default)]
    pub skip_known: bool,

    /// Re-fetch details even for listings that already have them
    #[serde(default)]
    pub recheck_details: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            layouts: defaults::selected_layouts(),
            min_area: 0.0,
            max_rent: defaults::max_rent(),
            sort_key: SortKey::default(),
            descending: false,
            skip_known: false,
            recheck_details: false,
        }
    }
}

mod defaults {
    use super::{LayoutParam, QueryParam};

    // Site defaults
    pub fn base_url() -> String {
        "https://www.monthly-mansion.com".into()
    }
    pub fn search_path() -> String {
        "/tokyo/search/list.html".into()
    }
    pub fn area_codes() -> Vec<String> {
        [
            "13119", "13113", "13104", "13115", "13102", "13101", "13116", "13105", "13103",
            "13110",
        ]
        .iter()
        .map(|c| c.to_string())
        .collect()
    }
    pub fn fixed_params() -> Vec<QueryParam> {
        [
            ("cmd", "select_page"),
            ("rno", "300"),
            ("cnt", "30"),
            ("srt", "1"),
            ("j01", "1"),
        ]
        .iter()
        .map(|(name, value)| QueryParam {
            name: name.to_string(),
            value: value.to_string(),
        })
        .collect()
    }
    pub fn layouts() -> Vec<LayoutParam> {
        [
            ("1R", "m1r"),
            ("1K", "m1k"),
            ("1DK", "m1dk"),
            ("1LDK", "m1ldk"),
            ("2K", "m2k"),
            ("2DK", "m2dk"),
            ("2LDK", "m2ldk"),
            ("3LDK", "m3ldk"),
        ]
        .iter()
        .map(|(name, param)| LayoutParam {
            name: name.to_string(),
            param: param.to_string(),
        })
        .collect()
    }
    pub fn encoding() -> String {
        "EUC-JP".into()
    }

    // Crawler defaults
    pub fn user_agents() -> Vec<String> {
        vec![
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36".into(),
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/14.1.1 Safari/605.1.15".into(),
        ]
    }
    pub fn page_timeout() -> u64 {
        20
    }
    pub fn initial_backoff() -> u64 {
        5_000
    }
    pub fn max_backoff() -> u64 {
        60_000
    }
    pub fn max_retries() -> u32 {
        5
    }
    pub fn record_delay() -> u64 {
        50
    }
    pub fn page_delay() -> u64 {
        250
    }
    pub fn empty_page_delay() -> u64 {
        1_000
    }
    pub fn empty_pages_to_stop() -> u32 {
        2
    }
    pub fn min_fallback_rent() -> u64 {
        20_000
    }

    // Detail defaults
    pub fn workers() -> usize {
        5
    }
    pub fn detail_timeout() -> u64 {
        25
    }
    pub fn photo_timeout() -> u64 {
        15
    }
    pub fn refresh_stagger() -> u64 {
        20
    }

    // Storage defaults
    pub fn snapshot_file() -> String {
        "listings_cache.json".into()
    }
    pub fn asset_dir() -> String {
        "image_cache".into()
    }

    // Search defaults
    pub fn selected_layouts() -> Vec<String> {
        layouts().into_iter().map(|l| l.name).collect()
    }
    pub fn max_rent() -> u64 {
        250_000
    }
}
