//! Listing data structure and its fetch-status lifecycle.

use std::fmt;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::utils::ascii_digits;

static BUILD_YEAR: OnceLock<Option<Regex>> = OnceLock::new();

/// Enrichment lifecycle state of a single listing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum FetchStatus {
    #[default]
    #[serde(rename = "Pending Details")]
    PendingDetails,
    #[serde(rename = "Details OK")]
    DetailsOk,
    #[serde(rename = "Detail Fetch Error")]
    DetailFetchError,
    #[serde(rename = "Detail Parse Error")]
    DetailParseError,
}

impl FetchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchStatus::PendingDetails => "Pending Details",
            FetchStatus::DetailsOk => "Details OK",
            FetchStatus::DetailFetchError => "Detail Fetch Error",
            FetchStatus::DetailParseError => "Detail Parse Error",
        }
    }

    /// Short marker used in one-line listing renderings.
    pub fn marker(&self) -> &'static str {
        match self {
            FetchStatus::PendingDetails => "[P] ",
            FetchStatus::DetailsOk => "",
            FetchStatus::DetailFetchError => "[E!] ",
            FetchStatus::DetailParseError => "[Ep] ",
        }
    }
}

impl fmt::Display for FetchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fields obtainable from the paginated list page alone.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Summary {
    pub link: String,
    pub title: String,
    pub address: String,
    pub stations: String,
    pub area: f64,
    pub layout: String,
    pub build: String,
    pub pay_methods: String,
    pub middle_rent: u64,
    pub utilities: String,
    pub cleaning: String,
}

/// Data extracted from a listing's own detail page.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DetailData {
    pub photo_urls: Vec<String>,
    pub appliances: Vec<String>,
    pub remarks: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

/// A discovered property listing, identified by its canonical link.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Listing {
    pub title: String,

    /// Canonical absolute URL; the listing's identity
    pub link: String,

    pub address: String,
    pub stations: String,

    /// Floor area in m²
    pub area: f64,

    pub layout: String,

    /// Free-text build date as printed on the site
    pub build: String,

    /// Year derived from `build`
    pub build_year: Option<i32>,

    /// Set once when the listing is first created
    pub date_added: DateTime<Utc>,

    pub pay_methods: String,

    /// Monthly rent in yen
    pub middle_rent: u64,

    pub utilities: String,
    pub cleaning: String,

    #[serde(default)]
    pub appliances: Vec<String>,

    #[serde(default)]
    pub remarks: String,

    #[serde(default)]
    pub photo_urls: Vec<String>,

    /// Rent per m², derived from `middle_rent` and `area`
    pub ppm2: f64,

    #[serde(default)]
    pub is_fav: bool,

    #[serde(default)]
    pub is_viewed: bool,

    #[serde(default)]
    pub details_fetched: bool,

    #[serde(default)]
    pub fetch_status: FetchStatus,

    #[serde(default)]
    pub detail_fetch_error_message: String,

    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl Listing {
    /// Build a freshly observed listing with default user-owned state.
    pub fn from_summary(summary: Summary, now: DateTime<Utc>) -> Self {
        let build_year = parse_build_year(&summary.build);
        let ppm2 = price_per_m2(summary.middle_rent, summary.area);

        Self {
            title: summary.title,
            link: summary.link,
            address: summary.address,
            stations: summary.stations,
            area: summary.area,
            layout: summary.layout,
            build: summary.build,
            build_year,
            date_added: now,
            pay_methods: summary.pay_methods,
            middle_rent: summary.middle_rent,
            utilities: summary.utilities,
            cleaning: summary.cleaning,
            appliances: Vec::new(),
            remarks: String::new(),
            photo_urls: Vec::new(),
            ppm2,
            is_fav: false,
            is_viewed: false,
            details_fetched: false,
            fetch_status: FetchStatus::PendingDetails,
            detail_fetch_error_message: String::new(),
            latitude: None,
            longitude: None,
        }
    }

    /// Overwrite every summary field from a fresh observation.
    ///
    /// User-owned state (`is_fav`, `is_viewed`, `date_added`) and enrichment
    /// fields are left untouched.
    pub fn apply_summary(&mut self, fresh: &Listing) {
        self.title = fresh.title.clone();
        self.address = fresh.address.clone();
        self.stations = fresh.stations.clone();
        self.area = fresh.area;
        self.layout = fresh.layout.clone();
        self.build = fresh.build.clone();
        self.build_year = parse_build_year(&fresh.build);
        self.pay_methods = fresh.pay_methods.clone();
        self.middle_rent = fresh.middle_rent;
        self.utilities = fresh.utilities.clone();
        self.cleaning = fresh.cleaning.clone();
        self.ppm2 = price_per_m2(self.middle_rent, self.area);
    }

    /// Put the listing back into the pending state ahead of a new detail fetch.
    pub fn reset_for_fetch(&mut self) {
        self.fetch_status = FetchStatus::PendingDetails;
        self.details_fetched = false;
        self.detail_fetch_error_message.clear();
    }

    /// Commit a successful enrichment.
    pub fn apply_details(&mut self, details: DetailData) {
        self.photo_urls = details.photo_urls;
        self.appliances = details.appliances;
        self.remarks = details.remarks;
        self.latitude = details.latitude;
        self.longitude = details.longitude;
        self.details_fetched = true;
        self.fetch_status = FetchStatus::DetailsOk;
        self.detail_fetch_error_message.clear();
    }

    /// Commit a failed enrichment.
    pub fn fail_details(&mut self, status: FetchStatus, message: impl Into<String>) {
        self.fetch_status = status;
        self.detail_fetch_error_message = message.into();
    }

    pub fn needs_details(&self) -> bool {
        self.fetch_status == FetchStatus::PendingDetails
    }

    /// Structural checks applied to records loaded from a snapshot.
    pub fn check(&self) -> std::result::Result<(), String> {
        if self.link.trim().is_empty() {
            return Err("empty link".to_string());
        }
        if !self.area.is_finite() || self.area < 0.0 {
            return Err(format!("invalid area {}", self.area));
        }
        Ok(())
    }
}

impl fmt::Display for Listing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fav = if self.is_fav { "⭐ " } else { "" };
        write!(
            f,
            "{}{}{} — {:.1}m² — ¥{}/mo",
            self.fetch_status.marker(),
            fav,
            self.title,
            self.area,
            group_thousands(self.middle_rent)
        )
    }
}

/// Rent per m²; zero when the area is unknown.
pub fn price_per_m2(rent: u64, area: f64) -> f64 {
    if area > 0.0 { rent as f64 / area } else { 0.0 }
}

/// First four-digit year followed by the 年 marker, e.g. `2015年3月` → 2015.
pub fn parse_build_year(build: &str) -> Option<i32> {
    let year = BUILD_YEAR
        .get_or_init(|| Regex::new(r"([0-9]{4})年").ok())
        .as_ref()?;
    year.captures(&ascii_digits(build))?[1].parse().ok()
}

pub(crate) fn group_thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}
