// src/services/details.rs

//! Listing detail page extraction.

use regex::Regex;
use scraper::{ElementRef, Html};
use url::Url;

use crate::error::{AppError, Result};
use crate::models::{Config, DetailData};
use crate::utils::{joined_text, parse_selector};

const AMENITIES_LABEL: &str = "設備";
const REMARKS_LABEL: &str = "備考";
const AMENITY_SEPARATORS: &[char] = &['、', '､', ','];

/// Extracts photos, amenities, remarks and coordinates from a detail page.
pub struct DetailParser {
    base_url: Url,
    photo: scraper::Selector,
    th: scraper::Selector,
    li: scraper::Selector,
    map: scraper::Selector,
    coordinates: Regex,
}

impl DetailParser {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            base_url: Url::parse(&config.site.base_url)?,
            photo: parse_selector("div.photo ul.thumbnail li a")?,
            th: parse_selector("th")?,
            li: parse_selector("li")?,
            map: parse_selector(r#"iframe[src*="google.com/maps/embed"]"#)?,
            coordinates: Regex::new(r"[?&]q=([\d.-]+),([\d.-]+)")
                .map_err(|e| AppError::config(e.to_string()))?,
        })
    }

    /// Parse a detail page.
    ///
    /// Missing sections leave their fields empty. `photo_urls` lists every
    /// thumbnail link in page order, made absolute; a thumbnail link that
    /// cannot be made absolute is a parse error.
    pub fn parse(&self, html: &str) -> Result<DetailData> {
        let document = Html::parse_document(html);
        let mut details = DetailData {
            photo_urls: document
                .select(&self.photo)
                .filter_map(|a| a.value().attr("href"))
                .map(str::trim)
                .filter(|href| !href.is_empty())
                .map(|href| {
                    self.base_url
                        .join(href)
                        .map(String::from)
                        .map_err(|e| AppError::parse(format!("Bad photo link '{href}': {e}")))
                })
                .collect::<Result<Vec<_>>>()?,
            ..DetailData::default()
        };

        if let Some(td) = labelled_cell(&document, &self.th, AMENITIES_LABEL) {
            let items: Vec<String> = td.select(&self.li).map(|li| joined_text(&li, "")).collect();
            details.appliances = if items.is_empty() {
                joined_text(&td, "")
                    .split(AMENITY_SEPARATORS)
                    .map(str::trim)
                    .filter(|item| !item.is_empty())
                    .map(str::to_string)
                    .collect()
            } else {
                items.into_iter().filter(|item| !item.is_empty()).collect()
            };
        }

        if let Some(td) = labelled_cell(&document, &self.th, REMARKS_LABEL) {
            details.remarks = joined_text(&td, "\n");
        }

        match document
            .select(&self.map)
            .find_map(|iframe| iframe.value().attr("src"))
        {
            Some(src) => {
                if let Some((lat, lon)) = self.parse_coordinates(src) {
                    log::debug!("Geo found: {}, {}", lat, lon);
                    details.latitude = Some(lat);
                    details.longitude = Some(lon);
                } else {
                    log::warn!("Geo parse fail: {}", src);
                }
            }
            None => log::debug!("No map embed found"),
        }

        Ok(details)
    }

    /// `(latitude, longitude)` from a map embed URL's `q=lat,lon` parameter.
    pub fn parse_coordinates(&self, src: &str) -> Option<(f64, f64)> {
        let caps = self.coordinates.captures(src)?;
        let lat = caps[1].parse::<f64>().ok()?;
        let lon = caps[2].parse::<f64>().ok()?;
        Some((lat, lon))
    }
}

/// The `td` following the first `th` whose text is exactly `label`.
fn labelled_cell<'a>(
    document: &'a Html,
    th_sel: &scraper::Selector,
    label: &str,
) -> Option<ElementRef<'a>> {
    document
        .select(th_sel)
        .find(|th| joined_text(th, "") == label)?
        .next_siblings()
        .filter_map(ElementRef::wrap)
        .find(|sibling| sibling.value().name() == "td")
}
