// src/services/summary.rs

//! Search list page parsing.
//!
//! Turns one result page into per-box outcomes. Parsing is synchronous and
//! returns owned data so no HTML document is held across an `.await`.

use std::collections::HashSet;

use regex::Regex;
use scraper::{ElementRef, Html};
use url::Url;

use crate::error::{AppError, Result};
use crate::models::{Config, Summary};
use crate::utils::{ascii_digits, joined_text, parse_selector, resolve_url};

/// What became of one result box.
#[derive(Debug, Clone, PartialEq)]
pub enum BoxOutcome {
    /// A structurally valid summary
    Parsed(Summary),
    /// Skipped because the link is already known
    Known(String),
    /// Dropped with a reason
    Malformed { index: usize, reason: String },
}

/// Compiled list page selectors.
struct PageSelectors {
    boxes: scraper::Selector,
    title: scraper::Selector,
    detail_table: scraper::Selector,
    row: scraper::Selector,
    th: scraper::Selector,
    td: scraper::Selector,
    rent_table: scraper::Selector,
    rent_monthly_row: scraper::Selector,
    rent_short_row: scraper::Selector,
}

impl PageSelectors {
    fn new() -> Result<Self> {
        Ok(Self {
            boxes: parse_selector(".listArea .box")?,
            title: parse_selector(".th02 a")?,
            detail_table: parse_selector(".detail table")?,
            row: parse_selector("tr")?,
            th: parse_selector("th")?,
            td: parse_selector("td")?,
            rent_table: parse_selector(".rent table")?,
            rent_monthly_row: parse_selector("tr.m")?,
            rent_short_row: parse_selector("tr.s")?,
        })
    }
}

/// Labelled fields of a box's detail table.
#[derive(Debug, Default)]
struct DetailFields {
    address: Option<String>,
    stations: Option<String>,
    area: Option<String>,
    layout: Option<String>,
    build: Option<String>,
    pay_methods: Option<String>,
}

impl DetailFields {
    /// Record a label/value pair; the first row for each concept wins.
    fn offer(&mut self, label: &str, value: String) {
        let slot = match label {
            "住所" => &mut self.address,
            "最寄り駅" => &mut self.stations,
            "面積" => &mut self.area,
            "間取" | "間取り" | "タイプ" => &mut self.layout,
            "築年月" => &mut self.build,
            l if l.contains("お支払い方法") => &mut self.pay_methods,
            _ => return,
        };
        if slot.is_none() {
            *slot = Some(value);
        }
    }
}

/// Parser for the paginated search list.
pub struct SummaryParser {
    base_url: Url,
    selectors: PageSelectors,
    monthly_rent: Regex,
    bare_rent: Regex,
    min_fallback_rent: u64,
}

impl SummaryParser {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            base_url: Url::parse(&config.site.base_url)?,
            selectors: PageSelectors::new()?,
            monthly_rent: Regex::new(r"([0-9,]+)円/月")
                .map_err(|e| AppError::config(e.to_string()))?,
            bare_rent: Regex::new(r"([0-9,]+)円").map_err(|e| AppError::config(e.to_string()))?,
            min_fallback_rent: config.crawler.min_fallback_rent,
        })
    }

    /// Parse every result box on a page, in document order.
    ///
    /// With `skip_known` set, boxes whose link is in `known` are reported as
    /// [`BoxOutcome::Known`] before anything past the title is read.
    pub fn parse_page(
        &self,
        html: &str,
        known: &HashSet<String>,
        skip_known: bool,
    ) -> Result<Vec<BoxOutcome>> {
        let document = Html::parse_document(html);

        let outcomes = document
            .select(&self.selectors.boxes)
            .enumerate()
            .map(|(index, element)| match self.parse_box(element, known, skip_known) {
                Ok(outcome) => outcome,
                Err(e) => BoxOutcome::Malformed {
                    index,
                    reason: e.to_string(),
                },
            })
            .collect();
        Ok(outcomes)
    }

    fn parse_box(
        &self,
        element: ElementRef<'_>,
        known: &HashSet<String>,
        skip_known: bool,
    ) -> Result<BoxOutcome> {
        let sel = &self.selectors;
        let title_tag = element
            .select(&sel.title)
            .next()
            .ok_or_else(|| AppError::malformed("Title tag not found"))?;
        let href = title_tag
            .value()
            .attr("href")
            .ok_or_else(|| AppError::malformed("Title link has no href"))?;
        let link = resolve_url(&self.base_url, href);
        let title = joined_text(&title_tag, "");

        if skip_known && known.contains(&link) {
            return Ok(BoxOutcome::Known(link));
        }

        let detail_table = element
            .select(&sel.detail_table)
            .next()
            .ok_or_else(|| AppError::malformed(format!("Detail table not found for '{title}'")))?;

        let mut fields = DetailFields::default();
        for row in detail_table.select(&sel.row) {
            let (Some(th), Some(td)) = (row.select(&sel.th).next(), row.select(&sel.td).next())
            else {
                continue;
            };
            fields.offer(&joined_text(&th, ""), joined_text(&td, " / "));
        }

        let area_raw = fields.area.unwrap_or_else(|| "0".to_string());
        let area = parse_area(&area_raw).ok_or_else(|| {
            AppError::malformed(format!("Bad area value '{area_raw}' for '{title}'"))
        })?;
        if area == 0.0 && area_raw != "0" {
            return Err(AppError::malformed(format!(
                "Area is 0 for '{title}' (original: '{area_raw}')"
            )));
        }

        let rent_table = element
            .select(&sel.rent_table)
            .next()
            .ok_or_else(|| AppError::malformed(format!("Rent table not found for '{title}'")))?;
        let rent_row = rent_table
            .select(&sel.rent_monthly_row)
            .next()
            .or_else(|| rent_table.select(&sel.rent_short_row).next())
            .or_else(|| {
                rent_table
                    .select(&sel.row)
                    .next()
                    .filter(|row| row.select(&sel.th).next().is_some())
            })
            .ok_or_else(|| {
                AppError::malformed(format!("No m, s, or generic rent row for '{title}'"))
            })?;

        let cols: Vec<ElementRef<'_>> = rent_row.select(&sel.td).collect();
        let rent_cell = cols.first().ok_or_else(|| {
            AppError::malformed(format!("Not enough columns in rent row for '{title}'"))
        })?;
        let rent_text = joined_text(rent_cell, " ").replace('〜', "");
        let middle_rent = self.rent_value(&rent_text).map_err(|reason| {
            AppError::malformed(format!("{reason}: '{rent_text}' for '{title}'"))
        })?;

        let column = |i: usize| {
            cols.get(i)
                .map(|td| joined_text(td, ""))
                .unwrap_or_else(|| "N/A".to_string())
        };

        Ok(BoxOutcome::Parsed(Summary {
            link,
            title,
            address: fields.address.unwrap_or_default(),
            stations: fields.stations.unwrap_or_default(),
            area,
            layout: fields.layout.unwrap_or_default(),
            build: fields.build.unwrap_or_default(),
            pay_methods: fields.pay_methods.unwrap_or_default(),
            middle_rent,
            utilities: column(1),
            cleaning: column(2),
        }))
    }

    /// Monthly rent from a rent cell.
    ///
    /// A value without the monthly suffix is accepted only above the
    /// configured plausibility threshold.
    pub fn parse_rent(&self, text: &str) -> Result<u64> {
        self.rent_value(text).map_err(AppError::malformed)
    }

    fn rent_value(&self, text: &str) -> std::result::Result<u64, String> {
        let text = &ascii_digits(text);
        if let Some(caps) = self.monthly_rent.captures(text) {
            return parse_grouped(&caps[1])
                .ok_or_else(|| format!("Rent parse failed converting '{}'", &caps[1]));
        }

        let caps = self
            .bare_rent
            .captures(text)
            .ok_or("Monthly rent parse fail (no 円/月 or 円)")?;
        let value = parse_grouped(&caps[1])
            .ok_or_else(|| format!("Rent parse failed converting fallback '{}'", &caps[1]))?;
        if value > self.min_fallback_rent {
            log::debug!("Used fallback rent parsing (no /月): {}", text);
            Ok(value)
        } else {
            Err(format!(
                "Rent parse (円/月 not found, fallback value {value} too low)"
            ))
        }
    }
}

/// Floor area in m² from a table cell such as `25.5m²〜`.
fn parse_area(raw: &str) -> Option<f64> {
    let cleaned = ascii_digits(raw).replace("m²", "");
    let cleaned = cleaned.trim().trim_end_matches('〜');
    if cleaned.is_empty() {
        return Some(0.0);
    }
    cleaned
        .parse::<f64>()
        .ok()
        .filter(|area| area.is_finite() && *area >= 0.0)
}

fn parse_grouped(digits: &str) -> Option<u64> {
    digits.replace(',', "").parse().ok()
}
