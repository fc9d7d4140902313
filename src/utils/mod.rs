//! Utility functions and helpers.

pub mod http;
pub mod stop;
pub mod url;

#[cfg(test)]
pub(crate) mod testing;

pub use self::http::{Fetcher, HttpFetcher};
pub use self::stop::StopSignal;

use ::url::Url;

/// Resolve a potentially relative URL against a base URL.
pub fn resolve_url(base: &Url, href: &str) -> String {
    base.join(href)
        .map(|u| u.to_string())
        .unwrap_or_else(|_| href.to_string())
}

/// Fold full-width digits, commas and periods to ASCII, e.g. `８０，０００` → `80,000`.
pub fn ascii_digits(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '０'..='９' | '，' | '．' => char::from_u32(c as u32 - 0xFEE0).unwrap_or(c),
            _ => c,
        })
        .collect()
}

/// Join the trimmed, non-empty text nodes of an element with `separator`.
pub fn joined_text(element: &scraper::ElementRef<'_>, separator: &str) -> String {
    element
        .text()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(separator)
}

/// Parse a CSS selector, mapping failures into [`crate::error::AppError`].
pub fn parse_selector(s: &str) -> crate::error::Result<scraper::Selector> {
    scraper::Selector::parse(s).map_err(|e| crate::error::AppError::selector(s, format!("{e:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_url() {
        let base = Url::parse("https://example.com/path/").unwrap();
        assert_eq!(
            resolve_url(&base, "page.html"),
            "https://example.com/path/page.html"
        );
        assert_eq!(
            resolve_url(&base, "/root.html"),
            "https://example.com/root.html"
        );
        assert_eq!(
            resolve_url(&base, "https://other.com/x"),
            "https://other.com/x"
        );
    }

    #[test]
    fn test_ascii_digits() {
        assert_eq!(ascii_digits("８０，０００円/月"), "80,000円/月");
        assert_eq!(ascii_digits("２５．５m²"), "25.5m²");
        assert_eq!(ascii_digits("2015年3月"), "2015年3月");
    }

    #[test]
    fn test_joined_text() {
        let html = scraper::Html::parse_document(
            "<table><tr><td> Shinjuku <br> Yoyogi </td></tr></table>",
        );
        let sel = parse_selector("td").unwrap();
        let td = html.select(&sel).next().unwrap();
        assert_eq!(joined_text(&td, " / "), "Shinjuku / Yoyogi");
    }

    #[test]
    fn test_parse_selector_invalid() {
        assert!(parse_selector("div.class").is_ok());
        assert!(parse_selector("[[invalid").is_err());
    }
}
