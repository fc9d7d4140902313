// src/services/crawler.rs

//! Paginated search crawler.
//!
//! One spawned task walks the result pages in increasing order, retrying
//! rate-limited or failed pages under exponential backoff, and ends after
//! a run of consecutive empty pages. Results are streamed as
//! [`CrawlEvent`]s with exactly one terminal event per run.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{AppError, Result};
use crate::models::{Config, Listing};
use crate::services::summary::{BoxOutcome, SummaryParser};
use crate::utils::url::build_search_url;
use crate::utils::{Fetcher, StopSignal};

/// Parameters for one crawl run.
#[derive(Debug, Clone, Default)]
pub struct CrawlRequest {
    /// Selected layout categories
    pub layouts: Vec<String>,
    /// Links already in the store
    pub known: HashSet<String>,
    /// Skip boxes whose link is in `known`
    pub skip_known: bool,
}

/// Counters reported when a run ends normally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CrawlSummary {
    /// Pages fetched successfully
    pub pages: u32,
    /// `NewListing` events emitted
    pub emitted: usize,
    /// The run ended because a stop was requested
    pub stopped: bool,
}

#[derive(Debug, Clone)]
pub enum CrawlEvent {
    NewListing(Listing),
    Progress(String),
    /// Terminal: the run ended normally or was stopped
    Finished(CrawlSummary),
    /// Terminal: exhausted retries or a non-retryable HTTP status
    Error(String),
}

impl CrawlEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CrawlEvent::Finished(_) | CrawlEvent::Error(_))
    }
}

/// Handle to a running crawl.
pub struct CrawlRun {
    pub events: mpsc::UnboundedReceiver<CrawlEvent>,
    /// Resolves to the same outcome the terminal event reports
    pub handle: JoinHandle<Result<CrawlSummary>>,
}

/// Search crawler sharing the process-wide stop signal.
#[derive(Clone)]
pub struct ListingCrawler {
    config: Arc<Config>,
    fetcher: Arc<dyn Fetcher>,
    parser: Arc<SummaryParser>,
    stop: StopSignal,
}

impl ListingCrawler {
    pub fn new(config: Arc<Config>, fetcher: Arc<dyn Fetcher>, stop: StopSignal) -> Result<Self> {
        let parser = Arc::new(SummaryParser::new(&config)?);
        Ok(Self {
            config,
            fetcher,
            parser,
            stop,
        })
    }

    /// Start a new independent run.
    ///
    /// Clears a previous stop request. Must be called inside a Tokio runtime.
    pub fn start(&self, request: CrawlRequest) -> CrawlRun {
        log::debug!(
            "Crawler start with layouts={:?}, skip_known={}",
            request.layouts,
            request.skip_known
        );
        self.stop.clear();

        let (tx, events) = mpsc::unbounded_channel();
        let crawler = self.clone();
        let handle = tokio::spawn(async move { crawler.run(request, tx).await });
        CrawlRun { events, handle }
    }

    /// Request cooperative cancellation.
    pub fn stop(&self) {
        log::info!("Stop requested for crawler");
        self.stop.stop();
    }

    async fn run(
        self,
        request: CrawlRequest,
        tx: mpsc::UnboundedSender<CrawlEvent>,
    ) -> Result<CrawlSummary> {
        let result = self.crawl(&request, &tx).await;
        let terminal = match &result {
            Ok(summary) => {
                log::info!(
                    "Crawl finished: {} pages, {} listings{}",
                    summary.pages,
                    summary.emitted,
                    if summary.stopped { " (stopped)" } else { "" }
                );
                CrawlEvent::Finished(*summary)
            }
            Err(e) => {
                log::error!("Crawl failed: {}", e);
                CrawlEvent::Error(e.to_string())
            }
        };
        // Receiver gone means nobody is listening for the outcome.
        let _ = tx.send(terminal);
        result
    }

    async fn crawl(
        &self,
        request: &CrawlRequest,
        tx: &mpsc::UnboundedSender<CrawlEvent>,
    ) -> Result<CrawlSummary> {
        let settings = &self.config.crawler;
        let progress = |text: String| {
            let _ = tx.send(CrawlEvent::Progress(text));
        };

        let mut summary = CrawlSummary::default();
        let mut page: u32 = 1;
        let mut empty_in_a_row: u32 = 0;
        let mut retries: u32 = 0;

        loop {
            if self.stop.is_stopped() {
                summary.stopped = true;
                break;
            }

            let url = build_search_url(&self.config.site, &request.layouts, page)?;
            log::info!("Fetching page {}: {}", page, url);
            progress(format!("Fetching page {page}..."));

            let html = match self.fetcher.fetch_text(&url, settings.page_timeout()).await {
                Ok(html) => {
                    retries = 0;
                    html
                }
                Err(e) if e.is_retryable() => {
                    retries += 1;
                    if retries > settings.max_retries {
                        return Err(AppError::crawl(
                            &url,
                            format!("max retries exceeded ({e})"),
                        ));
                    }
                    let wait = settings.backoff(retries - 1);
                    log::warn!(
                        "{}. Retrying ({}/{}) in {:?}",
                        e,
                        retries,
                        settings.max_retries,
                        wait
                    );
                    let reason = match e {
                        AppError::Status { .. } => "Rate limited",
                        _ => "Network issue",
                    };
                    progress(format!(
                        "{reason}. Retrying page {page} in {:.1}s...",
                        wait.as_secs_f64()
                    ));
                    if !self.stop.sleep(wait).await {
                        summary.stopped = true;
                        break;
                    }
                    continue;
                }
                Err(e) => return Err(AppError::crawl(&url, e)),
            };
            summary.pages += 1;

            let outcomes = self
                .parser
                .parse_page(&html, &request.known, request.skip_known)?;

            if outcomes.is_empty() {
                empty_in_a_row += 1;
                if empty_in_a_row >= settings.empty_pages_to_stop {
                    log::info!("No more listings after page {}", page.saturating_sub(1));
                    break;
                }
                page += 1;
                if !self.stop.sleep(settings.empty_page_delay()).await {
                    summary.stopped = true;
                    break;
                }
                continue;
            }
            empty_in_a_row = 0;

            for outcome in outcomes {
                if self.stop.is_stopped() {
                    log::debug!("Stop detected in crawler, leaving page {}", page);
                    break;
                }
                match outcome {
                    BoxOutcome::Parsed(parsed) => {
                        let listing = Listing::from_summary(parsed, Utc::now());
                        if tx.send(CrawlEvent::NewListing(listing)).is_err() {
                            log::debug!("Crawl receiver dropped; ending run");
                            summary.stopped = true;
                            return Ok(summary);
                        }
                        summary.emitted += 1;
                        if !self.stop.sleep(settings.record_delay()).await {
                            break;
                        }
                    }
                    BoxOutcome::Known(link) => {
                        log::debug!("Skipping known listing: {}", link);
                    }
                    BoxOutcome::Malformed { index, reason } => {
                        log::warn!("[p{}][#{}] {}. Skipping.", page, index, reason);
                    }
                }
            }

            if self.stop.is_stopped() {
                summary.stopped = true;
                break;
            }
            page += 1;
            if !self.stop.sleep(settings.page_delay()).await {
                summary.stopped = true;
                break;
            }
        }

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::testing::{
        Reply, StubFetcher, empty_page, fast_config, list_page, listing_box, listing_link,
    };
    use std::time::Duration;

    fn page_url(config: &Config, layouts: &[String], page: u32) -> String {
        build_search_url(&config.site, layouts, page).unwrap()
    }

    async fn collect(mut run: CrawlRun) -> Vec<CrawlEvent> {
        let mut events = Vec::new();
        while let Some(event) = run.events.recv().await {
            events.push(event);
        }
        let _ = run.handle.await.unwrap();
        events
    }

    fn new_listings(events: &[CrawlEvent]) -> Vec<&Listing> {
        events
            .iter()
            .filter_map(|e| match e {
                CrawlEvent::NewListing(l) => Some(l),
                _ => None,
            })
            .collect()
    }

    fn terminals(events: &[CrawlEvent]) -> Vec<&CrawlEvent> {
        events.iter().filter(|e| e.is_terminal()).collect()
    }

    fn crawler(config: Config, stub: Arc<StubFetcher>) -> ListingCrawler {
        ListingCrawler::new(Arc::new(config), stub, StopSignal::new()).unwrap()
    }

    #[tokio::test]
    async fn test_crawl_pages_until_two_empty() {
        let config = fast_config();
        let layouts = vec!["1K".to_string()];
        let stub = Arc::new(
            StubFetcher::new(Reply::Text(empty_page())).route(
                page_url(&config, &layouts, 1),
                Reply::Text(list_page(&[
                    listing_box(1001, "Test Apartment 1", "25.0m²", "80,000円/月"),
                    listing_box(1002, "Test Apartment 2", "30.5m²", "90,000円/月"),
                ])),
            ),
        );

        let events = collect(crawler(config.clone(), stub.clone()).start(CrawlRequest {
            layouts: layouts.clone(),
            ..CrawlRequest::default()
        }))
        .await;

        let listings = new_listings(&events);
        assert_eq!(listings.len(), 2);
        assert_eq!(listings[0].link, listing_link(1001));
        assert_eq!(listings[1].middle_rent, 90000);
        assert_eq!(stub.calls().len(), 3);
        assert_eq!(stub.call_count(&page_url(&config, &layouts, 3)), 1);

        match terminals(&events).as_slice() {
            [CrawlEvent::Finished(summary)] => {
                assert_eq!(summary.pages, 3);
                assert_eq!(summary.emitted, 2);
                assert!(!summary.stopped);
            }
            other => panic!("unexpected terminal events: {other:?}"),
        }
        assert!(events.last().unwrap().is_terminal());
    }

    #[tokio::test]
    async fn test_two_empty_pages_finish_without_listings() {
        let stub = Arc::new(StubFetcher::new(Reply::Text(empty_page())));
        let events = collect(crawler(fast_config(), stub.clone()).start(CrawlRequest::default())).await;

        assert!(new_listings(&events).is_empty());
        assert_eq!(stub.calls().len(), 2);
        assert!(matches!(terminals(&events).as_slice(), [CrawlEvent::Finished(_)]));
    }

    #[tokio::test]
    async fn test_known_links_skipped() {
        let config = fast_config();
        let stub = Arc::new(
            StubFetcher::new(Reply::Text(empty_page())).route(
                page_url(&config, &[], 1),
                Reply::Text(list_page(&[
                    listing_box(4001, "Known Apartment 1", "20m²", "80,000円/月"),
                    listing_box(4002, "New Apartment 1", "20m²", "80,000円/月"),
                    listing_box(4003, "Known Apartment 2", "20m²", "80,000円/月"),
                ])),
            ),
        );
        let known: HashSet<String> = [listing_link(4001), listing_link(4003)].into_iter().collect();

        let events = collect(crawler(config, stub).start(CrawlRequest {
            layouts: Vec::new(),
            known,
            skip_known: true,
        }))
        .await;

        let listings = new_listings(&events);
        assert_eq!(listings.len(), 1);
        assert_eq!(listings[0].link, listing_link(4002));
    }

    #[tokio::test]
    async fn test_forbidden_exhausts_retries() {
        let mut config = fast_config();
        config.crawler.max_retries = 2;
        let stub = Arc::new(StubFetcher::new(Reply::Status(403)));

        let events = collect(crawler(config.clone(), stub.clone()).start(CrawlRequest::default())).await;

        assert_eq!(stub.call_count(&page_url(&config, &[], 1)), 3);
        assert_eq!(stub.calls().len(), 3);
        assert!(new_listings(&events).is_empty());
        match terminals(&events).as_slice() {
            [CrawlEvent::Error(message)] => {
                assert!(message.contains("max retries exceeded"));
                assert!(message.contains("403"));
            }
            other => panic!("unexpected terminal events: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_transport_failure_recovers() {
        let config = fast_config();
        let stub = Arc::new(StubFetcher::new(Reply::Text(empty_page())));
        let flaky = Arc::new(Flaky::new(
            stub.clone(),
            &[(page_url(&config, &[], 1), 1)],
            || AppError::transport("timed out"),
        ));

        let crawler = ListingCrawler::new(Arc::new(config), flaky, StopSignal::new()).unwrap();
        let events = collect(crawler.start(CrawlRequest::default())).await;

        assert!(matches!(terminals(&events).as_slice(), [CrawlEvent::Finished(_)]));
        assert!(events.iter().any(
            |e| matches!(e, CrawlEvent::Progress(text) if text.starts_with("Network issue"))
        ));
    }

    #[tokio::test]
    async fn test_non_empty_page_resets_empty_counter() {
        let config = fast_config();
        let stub = Arc::new(StubFetcher::new(Reply::Text(empty_page())).route(
            page_url(&config, &[], 2),
            Reply::Text(list_page(&[listing_box(2001, "Second Page", "22m²", "85,000円/月")])),
        ));

        let events = collect(crawler(config, stub.clone()).start(CrawlRequest::default())).await;

        assert_eq!(stub.calls().len(), 4);
        assert_eq!(new_listings(&events)[0].link, listing_link(2001));
        match terminals(&events).as_slice() {
            [CrawlEvent::Finished(summary)] => {
                assert_eq!(summary.pages, 4);
                assert_eq!(summary.emitted, 1);
            }
            other => panic!("unexpected terminal events: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_successful_fetch_resets_retry_count() {
        let mut config = fast_config();
        config.crawler.max_retries = 2;
        let stub = Arc::new(StubFetcher::new(Reply::Text(empty_page())).route(
            page_url(&config, &[], 1),
            Reply::Text(list_page(&[listing_box(3001, "Retried", "22m²", "85,000円/月")])),
        ));
        let flaky = Arc::new(Flaky::new(
            stub.clone(),
            &[(page_url(&config, &[], 1), 2), (page_url(&config, &[], 2), 2)],
            || AppError::Status {
                status: 503,
                url: "https://www.monthly-mansion.com/tokyo/search/list.html".to_string(),
            },
        ));

        let crawler =
            ListingCrawler::new(Arc::new(config), flaky.clone(), StopSignal::new()).unwrap();
        let events = collect(crawler.start(CrawlRequest::default())).await;

        assert_eq!(flaky.failed.load(std::sync::atomic::Ordering::SeqCst), 4);
        assert_eq!(stub.calls().len(), 3);
        assert_eq!(new_listings(&events).len(), 1);
        match terminals(&events).as_slice() {
            [CrawlEvent::Finished(summary)] => {
                assert_eq!(summary.pages, 3);
                assert!(!summary.stopped);
            }
            other => panic!("unexpected terminal events: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_not_found_is_fatal_without_retry() {
        let stub = Arc::new(StubFetcher::new(Reply::Status(404)));
        let events = collect(crawler(fast_config(), stub.clone()).start(CrawlRequest::default())).await;

        assert_eq!(stub.calls().len(), 1);
        match terminals(&events).as_slice() {
            [CrawlEvent::Error(message)] => {
                assert!(message.contains("404"));
                assert!(!message.contains("max retries"));
            }
            other => panic!("unexpected terminal events: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_stop_interrupts_backoff() {
        let mut config = fast_config();
        config.crawler.initial_backoff_ms = 60_000;
        config.crawler.max_backoff_ms = 60_000;
        let stub = Arc::new(StubFetcher::new(Reply::Status(503)));
        let crawler = crawler(config, stub.clone());

        let run = crawler.start(CrawlRequest::default());
        tokio::time::sleep(Duration::from_millis(50)).await;
        crawler.stop();

        let events = tokio::time::timeout(Duration::from_secs(5), collect(run))
            .await
            .unwrap();
        assert_eq!(stub.calls().len(), 1);
        match terminals(&events).as_slice() {
            [CrawlEvent::Finished(summary)] => assert!(summary.stopped),
            other => panic!("unexpected terminal events: {other:?}"),
        }
    }

    /// Fails the first `n` page requests for each listed URL, then delegates.
    struct Flaky {
        inner: Arc<StubFetcher>,
        remaining: std::sync::Mutex<std::collections::HashMap<String, u32>>,
        error: fn() -> AppError,
        failed: std::sync::atomic::AtomicUsize,
    }

    impl Flaky {
        fn new(inner: Arc<StubFetcher>, failures: &[(String, u32)], error: fn() -> AppError) -> Self {
            Self {
                inner,
                remaining: std::sync::Mutex::new(failures.iter().cloned().collect()),
                error,
                failed: std::sync::atomic::AtomicUsize::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl Fetcher for Flaky {
        async fn fetch_text(&self, url: &str, timeout: Duration) -> Result<String> {
            let fail = match self.remaining.lock().unwrap().get_mut(url) {
                Some(n) if *n > 0 => {
                    *n -= 1;
                    true
                }
                _ => false,
            };
            if fail {
                self.failed
                    .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                return Err((self.error)());
            }
            self.inner.fetch_text(url, timeout).await
        }

        async fn fetch_bytes(&self, url: &str, timeout: Duration) -> Result<Vec<u8>> {
            self.inner.fetch_bytes(url, timeout).await
        }
    }
}
