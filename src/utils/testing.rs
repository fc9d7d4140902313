// src/utils/testing.rs

//! In-memory site stubs shared by the service and pipeline tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{AppError, Result};
use crate::models::Config;
use crate::utils::Fetcher;

/// Canned answer for one URL.
#[derive(Debug, Clone)]
pub(crate) enum Reply {
    Text(String),
    Bytes(Vec<u8>),
    Status(u16),
    Transport,
}

/// Instrumented [`Fetcher`] serving fixed replies.
pub(crate) struct StubFetcher {
    routes: Mutex<HashMap<String, Reply>>,
    fallback: Reply,
    delay: Duration,
    calls: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl StubFetcher {
    /// Stub answering every unrouted URL with `fallback`.
    pub(crate) fn new(fallback: Reply) -> Self {
        Self {
            routes: Mutex::new(HashMap::new()),
            fallback,
            delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn route(self, url: impl Into<String>, reply: Reply) -> Self {
        self.routes.lock().unwrap().insert(url.into(), reply);
        self
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn call_count(&self, url: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| *c == url).count()
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn answer(&self, url: &str) -> Result<Reply> {
        self.calls.lock().unwrap().push(url.to_string());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let reply = self
            .routes
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .unwrap_or_else(|| self.fallback.clone());

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        match reply {
            Reply::Status(status) => Err(AppError::Status {
                status,
                url: url.to_string(),
            }),
            Reply::Transport => Err(AppError::transport("connection reset by peer")),
            other => Ok(other),
        }
    }
}

#[async_trait]
impl Fetcher for StubFetcher {
    async fn fetch_text(&self, url: &str, _timeout: Duration) -> Result<String> {
        match self.answer(url).await? {
            Reply::Text(text) => Ok(text),
            Reply::Bytes(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
            _ => unreachable!(),
        }
    }

    async fn fetch_bytes(&self, url: &str, _timeout: Duration) -> Result<Vec<u8>> {
        match self.answer(url).await? {
            Reply::Text(text) => Ok(text.into_bytes()),
            Reply::Bytes(bytes) => Ok(bytes),
            _ => unreachable!(),
        }
    }
}

/// Config with every delay removed and millisecond backoff.
pub(crate) fn fast_config() -> Config {
    let mut config = Config::default();
    config.crawler.initial_backoff_ms = 1;
    config.crawler.max_backoff_ms = 4;
    config.crawler.record_delay_ms = 0;
    config.crawler.page_delay_ms = 0;
    config.crawler.empty_page_delay_ms = 0;
    config.detail.refresh_stagger_ms = 0;
    config
}

pub(crate) const BASE: &str = "https://www.monthly-mansion.com";

pub(crate) fn listing_link(id: u32) -> String {
    format!("{BASE}/tokyo/rent/{id}")
}

/// One result box as served on the search list page.
pub(crate) fn listing_box(id: u32, title: &str, area: &str, rent_cell: &str) -> String {
    format!(
        r#"<div class="box">
  <h2 class="th02"><a href="/tokyo/rent/{id}">{title}</a></h2>
  <div class="detail"><table>
    <tr><th>住所</th><td>東京都新宿区{id}</td></tr>
    <tr><th>最寄り駅</th><td>新宿駅 徒歩5分<br>代々木駅 徒歩8分</td></tr>
    <tr><th>面積</th><td>{area}</td></tr>
    <tr><th>間取り</th><td>1K</td></tr>
    <tr><th>築年月</th><td>2015年3月</td></tr>
    <tr><th>お支払い方法</th><td>カード</td></tr>
  </table></div>
  <div class="rent"><table>
    <tr class="m"><th>M</th><td>{rent_cell}</td><td>5,000円</td><td>20,000円</td></tr>
  </table></div>
</div>"#
    )
}

/// A search list page containing the given boxes.
pub(crate) fn list_page(boxes: &[String]) -> String {
    format!(
        "<html><body><div class=\"listArea\">{}</div></body></html>",
        boxes.join("\n")
    )
}

pub(crate) fn empty_page() -> String {
    list_page(&[])
}

/// A detail page with the given photo hrefs and a map embed.
pub(crate) fn detail_page(photo_hrefs: &[&str]) -> String {
    let photos: String = photo_hrefs
        .iter()
        .map(|href| format!("<li><a href=\"{href}\"><img src=\"{href}\"></a></li>"))
        .collect();
    format!(
        r#"<html><body>
<div class="photo"><ul class="thumbnail">{photos}</ul></div>
<table>
  <tr><th>設備</th><td><ul><li>エアコン</li><li>Wi-Fi</li></ul></td></tr>
  <tr><th>備考</th><td>ペット不可<br>即入居可</td></tr>
</table>
<iframe src="https://www.google.com/maps/embed/v1/place?key=k&q=35.6895,139.6917"></iframe>
</body></html>"#
    )
}
