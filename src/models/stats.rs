//! Read-only projections over the listing set.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Sort order offered by `ListingStore::filter_and_sort`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    #[default]
    Rent,
    Area,
    PricePerM2,
    BuildYear,
    DateAdded,
}

impl SortKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortKey::Rent => "rent",
            SortKey::Area => "area",
            SortKey::PricePerM2 => "price_per_m2",
            SortKey::BuildYear => "build_year",
            SortKey::DateAdded => "date_added",
        }
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SortKey {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "rent" | "price" => Ok(SortKey::Rent),
            "area" => Ok(SortKey::Area),
            "price_per_m2" | "ppm2" => Ok(SortKey::PricePerM2),
            "build_year" | "year" => Ok(SortKey::BuildYear),
            "date_added" | "added" => Ok(SortKey::DateAdded),
            other => Err(AppError::validation(format!("unknown sort key '{other}'"))),
        }
    }
}

/// Aggregate figures over a filtered listing set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ListingStats {
    /// Listings known to the store
    pub total: usize,

    /// Listings in the filtered set
    pub displayed: usize,

    /// Favorites across the whole store
    pub favorites: usize,

    pub average_rent: Option<f64>,

    /// Average over listings with a positive area only
    pub average_area: Option<f64>,

    pub layout_counts: BTreeMap<String, usize>,
}
