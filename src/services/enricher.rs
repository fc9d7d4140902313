// src/services/enricher.rs

//! Bounded detail enrichment.
//!
//! A fixed pool of workers drains a shared queue of listing links. Each
//! task fetches the listing's detail page, caches its photos and commits
//! the result to the store in one step. The shared stop signal is checked
//! when a link is queued and again when a worker picks it up; a set signal
//! fails the task without any network call.

use std::sync::Arc;

use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;

use crate::error::{AppError, Result, STOPPED_MESSAGE};
use crate::models::{Config, FetchStatus};
use crate::services::details::DetailParser;
use crate::services::store::{DetailOutcome, ListingStore};
use crate::storage::AssetCache;
use crate::utils::{Fetcher, StopSignal};

type LinkQueue = Arc<Mutex<mpsc::UnboundedReceiver<String>>>;

struct Worker {
    config: Arc<Config>,
    store: Arc<ListingStore>,
    fetcher: Arc<dyn Fetcher>,
    assets: AssetCache,
    parser: DetailParser,
    stop: StopSignal,
    outstanding: watch::Sender<usize>,
}

/// Worker pool enriching listings with detail-page data.
pub struct DetailEnricher {
    shared: Arc<Worker>,
    queue: mpsc::UnboundedSender<String>,
    workers: Vec<JoinHandle<()>>,
}

impl DetailEnricher {
    /// Spawn `config.detail.workers` workers. Must be called inside a Tokio runtime.
    pub fn new(
        config: Arc<Config>,
        store: Arc<ListingStore>,
        fetcher: Arc<dyn Fetcher>,
        assets: AssetCache,
        stop: StopSignal,
    ) -> Result<Self> {
        let parser = DetailParser::new(&config)?;
        let pool_size = config.detail.workers.max(1);
        let (outstanding, _) = watch::channel(0usize);
        let shared = Arc::new(Worker {
            config,
            store,
            fetcher,
            assets,
            parser,
            stop,
            outstanding,
        });

        let (queue, rx) = mpsc::unbounded_channel();
        let rx: LinkQueue = Arc::new(Mutex::new(rx));
        let workers = (0..pool_size)
            .map(|id| {
                let shared = Arc::clone(&shared);
                let rx = Arc::clone(&rx);
                tokio::spawn(async move { shared.work(id, rx).await })
            })
            .collect();
        log::debug!("Started {} detail workers", pool_size);

        Ok(Self {
            shared,
            queue,
            workers,
        })
    }

    /// Schedule one enrichment task for `link`.
    pub fn enqueue(&self, link: &str) {
        if self.shared.stop.is_stopped() {
            log::debug!("Skipping detail fetch for {} as stop is set", link);
            self.shared.store.fail_stopped(link, STOPPED_MESSAGE);
            return;
        }

        self.shared.outstanding.send_modify(|n| *n += 1);
        if self.queue.send(link.to_string()).is_err() {
            log::error!("Detail queue closed; dropping {}", link);
            self.shared.outstanding.send_modify(|n| *n = n.saturating_sub(1));
        }
    }

    /// Re-queue links left pending by a previous run.
    pub fn resume(&self, links: &[String]) {
        if links.is_empty() {
            return;
        }
        log::info!("Resuming {} pending detail fetches", links.len());
        for link in links {
            self.enqueue(link);
        }
    }

    /// Reset one listing to pending and fetch it again. False for an unknown link.
    pub fn retry_one(&self, link: &str) -> bool {
        if !self.shared.store.mark_pending(link) {
            log::warn!("Could not trigger fetch for unknown link: {}", link);
            return false;
        }
        log::info!("Triggering manual detail fetch for {}", link);
        self.enqueue(link);
        true
    }

    /// Reset every listing to pending and re-queue them all, staggered.
    ///
    /// Clears a previous stop request first.
    pub async fn refresh_all(&self) -> usize {
        self.shared.stop.clear();
        let links = self.shared.store.mark_all_pending();
        log::info!("Triggering detail refresh for all {} listings", links.len());

        let stagger = self.shared.config.detail.refresh_stagger();
        for link in &links {
            self.enqueue(link);
            if !stagger.is_zero() {
                tokio::time::sleep(stagger).await;
            }
        }
        log::info!("Queued {} listings for detail refresh", links.len());
        links.len()
    }

    /// Tasks queued or running.
    pub fn outstanding(&self) -> usize {
        *self.shared.outstanding.borrow()
    }

    /// Wait until every queued task has reached a terminal state.
    pub async fn wait_idle(&self) {
        let mut rx = self.shared.outstanding.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    pub fn pool_size(&self) -> usize {
        self.workers.len()
    }
}

impl Drop for DetailEnricher {
    fn drop(&mut self) {
        for worker in &self.workers {
            worker.abort();
        }
    }
}

impl Worker {
    async fn work(&self, id: usize, rx: LinkQueue) {
        loop {
            let next = { rx.lock().await.recv().await };
            let Some(link) = next else {
                log::debug!("Detail worker {} exiting", id);
                return;
            };
            self.process(&link).await;
            self.outstanding.send_modify(|n| *n = n.saturating_sub(1));
        }
    }

    async fn process(&self, link: &str) {
        if self.stop.is_stopped() {
            log::debug!("Skipping detail fetch for {} after dequeue as stop is set", link);
            self.store.fail_stopped(link, STOPPED_MESSAGE);
            return;
        }
        let Some(listing) = self.store.get(link) else {
            log::warn!("Listing {} disappeared before its detail fetch", link);
            return;
        };

        log::info!("Fetching full details for: {}", link);
        let short_title: String = listing.title.chars().take(30).collect();
        self.store
            .set_status(format!("Fetching details: {short_title}..."));

        let outcome = self.enrich(link).await;
        match &outcome {
            DetailOutcome::Fetched(details) => log::info!(
                "Full details fetched for: {} ({} photos)",
                listing.title,
                details.photo_urls.len()
            ),
            DetailOutcome::Failed { status, message } => {
                log::warn!("{} for {}: {}", status, link, message)
            }
        }

        self.store.set_status("");
        self.store.complete_details(link, outcome);
    }

    async fn enrich(&self, link: &str) -> DetailOutcome {
        let html = match self
            .fetcher
            .fetch_text(link, self.config.detail.page_timeout())
            .await
        {
            Ok(html) => html,
            Err(e) => {
                return DetailOutcome::Failed {
                    status: FetchStatus::DetailFetchError,
                    message: e.to_string(),
                };
            }
        };

        let mut details = match self.parser.parse(&html) {
            Ok(details) => details,
            Err(e) => {
                return DetailOutcome::Failed {
                    status: FetchStatus::DetailParseError,
                    message: e.to_string(),
                };
            }
        };

        match self.cache_photos(link, &details.photo_urls).await {
            Ok(kept) => details.photo_urls = kept,
            Err(e) if e.is_cancelled() => {
                return DetailOutcome::Failed {
                    status: FetchStatus::DetailFetchError,
                    message: STOPPED_MESSAGE.to_string(),
                };
            }
            Err(e) => {
                return DetailOutcome::Failed {
                    status: FetchStatus::DetailFetchError,
                    message: e.to_string(),
                };
            }
        }
        DetailOutcome::Fetched(details)
    }

    /// Make sure every photo is cached, returning the URLs that are.
    ///
    /// Stops between photos when a stop is requested.
    async fn cache_photos(&self, link: &str, urls: &[String]) -> Result<Vec<String>> {
        let mut kept = Vec::with_capacity(urls.len());
        for url in urls {
            if self.stop.is_stopped() {
                log::info!("Photo fetch interrupted for {}", link);
                return Err(AppError::Cancelled);
            }

            if self.assets.contains(url).await {
                log::debug!("Photo cache hit: {}", url);
                kept.push(url.clone());
                continue;
            }

            match self
                .fetcher
                .fetch_bytes(url, self.config.detail.photo_timeout())
                .await
            {
                Ok(bytes) => {
                    if let Err(e) = self.assets.put(url, &bytes).await {
                        log::warn!("Failed to write photo cache for {}: {}", url, e);
                    }
                    kept.push(url.clone());
                }
                Err(e) => log::warn!("Image download failed for {}: {}", url, e),
            }
        }
        Ok(kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Listing, Summary};
    use crate::storage::LocalStorage;
    use crate::utils::testing::{Reply, StubFetcher, detail_page, fast_config, listing_link};
    use chrono::Utc;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Fixture {
        _tmp: TempDir,
        store: Arc<ListingStore>,
        assets: AssetCache,
        stop: StopSignal,
        enricher: DetailEnricher,
    }

    fn fixture(config: Config, stub: Arc<StubFetcher>) -> Fixture {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(ListingStore::new(Arc::new(LocalStorage::new(
            tmp.path(),
            "listings.json",
        ))));
        let assets = AssetCache::new(tmp.path().join("image_cache"));
        let stop = StopSignal::new();
        let enricher = DetailEnricher::new(
            Arc::new(config),
            Arc::clone(&store),
            stub,
            assets.clone(),
            stop.clone(),
        )
        .unwrap();
        Fixture {
            _tmp: tmp,
            store,
            assets,
            stop,
            enricher,
        }
    }

    fn seed(store: &ListingStore, count: u32) -> Vec<String> {
        (1..=count)
            .map(|id| {
                let listing = Listing::from_summary(
                    Summary {
                        link: listing_link(id),
                        title: format!("Apartment {id}"),
                        area: 20.0,
                        middle_rent: 80000,
                        ..Summary::default()
                    },
                    Utc::now(),
                );
                store.merge_summary(listing, false);
                listing_link(id)
            })
            .collect()
    }

    fn status_of(store: &ListingStore, link: &str) -> FetchStatus {
        store.get(link).unwrap().fetch_status
    }

    #[tokio::test]
    async fn test_enrich_caches_photos_and_omits_failures() {
        let photo = |n: u32| format!("https://www.monthly-mansion.com/img/{n}.jpg");
        let stub = Arc::new(
            StubFetcher::new(Reply::Text(detail_page(&["/img/1.jpg", "/img/2.jpg", "/img/3.jpg"])))
                .route(photo(1), Reply::Bytes(b"one".to_vec()))
                .route(photo(2), Reply::Status(404))
                .route(photo(3), Reply::Bytes(b"three".to_vec())),
        );
        let fx = fixture(fast_config(), stub.clone());
        let links = seed(&fx.store, 1);

        fx.enricher.enqueue(&links[0]);
        fx.enricher.wait_idle().await;

        let listing = fx.store.get(&links[0]).unwrap();
        assert_eq!(listing.fetch_status, FetchStatus::DetailsOk);
        assert!(listing.details_fetched);
        assert_eq!(listing.photo_urls, vec![photo(1), photo(3)]);
        assert_eq!(listing.appliances, vec!["エアコン", "Wi-Fi"]);
        assert_eq!(listing.latitude, Some(35.6895));
        assert_eq!(fx.assets.get(&photo(3)).await.unwrap(), Some(b"three".to_vec()));

        // Cached photos are not fetched again.
        assert!(fx.enricher.retry_one(&links[0]));
        fx.enricher.wait_idle().await;
        assert_eq!(stub.call_count(&photo(1)), 1);
        assert_eq!(stub.call_count(&photo(2)), 2);
        assert_eq!(stub.call_count(&links[0]), 2);
    }

    #[tokio::test]
    async fn test_fetch_failure_sets_error_status() {
        let stub = Arc::new(StubFetcher::new(Reply::Transport));
        let fx = fixture(fast_config(), stub);
        let links = seed(&fx.store, 1);

        fx.enricher.enqueue(&links[0]);
        fx.enricher.wait_idle().await;

        let listing = fx.store.get(&links[0]).unwrap();
        assert_eq!(listing.fetch_status, FetchStatus::DetailFetchError);
        assert!(listing.detail_fetch_error_message.contains("connection reset"));
        assert!(!listing.details_fetched);
    }

    #[tokio::test]
    async fn test_unparseable_page_sets_parse_error() {
        let stub = Arc::new(StubFetcher::new(Reply::Text(detail_page(&["http://[::1"]))));
        let fx = fixture(fast_config(), stub.clone());
        let links = seed(&fx.store, 1);

        fx.enricher.enqueue(&links[0]);
        fx.enricher.wait_idle().await;

        let listing = fx.store.get(&links[0]).unwrap();
        assert_eq!(listing.fetch_status, FetchStatus::DetailParseError);
        assert!(listing.detail_fetch_error_message.contains("Bad photo link"));
        assert!(!listing.details_fetched);
        assert_eq!(stub.calls(), vec![links[0].clone()]);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let stub = Arc::new(
            StubFetcher::new(Reply::Text(detail_page(&[]))).with_delay(Duration::from_millis(20)),
        );
        let fx = fixture(fast_config(), stub.clone());
        let links = seed(&fx.store, 20);

        for link in &links {
            fx.enricher.enqueue(link);
        }
        fx.enricher.wait_idle().await;

        assert_eq!(fx.enricher.pool_size(), 5);
        assert!(stub.max_in_flight() <= 5);
        assert!(stub.max_in_flight() >= 2);
        assert_eq!(stub.calls().len(), 20);
        for link in &links {
            assert_eq!(status_of(&fx.store, link), FetchStatus::DetailsOk);
        }
    }

    #[tokio::test]
    async fn test_stop_fails_fast_without_network() {
        let stub = Arc::new(StubFetcher::new(Reply::Text(detail_page(&[]))));
        let fx = fixture(fast_config(), stub.clone());
        let links = seed(&fx.store, 10);

        fx.stop.stop();
        for link in &links {
            fx.enricher.enqueue(link);
        }
        fx.enricher.wait_idle().await;

        assert!(stub.calls().is_empty());
        for link in &links {
            let listing = fx.store.get(link).unwrap();
            assert_eq!(listing.fetch_status, FetchStatus::DetailFetchError);
            assert!(listing.detail_fetch_error_message.contains("stopped"));
        }
    }

    #[tokio::test]
    async fn test_stop_fails_queued_tasks_after_dequeue() {
        let mut config = fast_config();
        config.detail.workers = 2;
        let stub = Arc::new(
            StubFetcher::new(Reply::Text(detail_page(&[]))).with_delay(Duration::from_millis(200)),
        );
        let fx = fixture(config, stub.clone());
        let links = seed(&fx.store, 12);

        for link in &links {
            fx.enricher.enqueue(link);
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        fx.stop.stop();
        fx.enricher.wait_idle().await;

        assert_eq!(stub.calls().len(), 2);
        let stopped = links
            .iter()
            .filter(|link| {
                let listing = fx.store.get(link).unwrap();
                listing.fetch_status == FetchStatus::DetailFetchError
                    && listing.detail_fetch_error_message == STOPPED_MESSAGE
            })
            .count();
        assert_eq!(stopped, 10);
    }

    #[tokio::test]
    async fn test_stop_interrupts_photo_loop() {
        let stub = Arc::new(
            StubFetcher::new(Reply::Bytes(b"img".to_vec()))
                .route(
                    listing_link(1),
                    Reply::Text(detail_page(&["/img/a.jpg", "/img/b.jpg", "/img/c.jpg"])),
                )
                .with_delay(Duration::from_millis(100)),
        );
        let fx = fixture(fast_config(), stub.clone());
        let links = seed(&fx.store, 1);

        fx.enricher.enqueue(&links[0]);
        tokio::time::sleep(Duration::from_millis(150)).await;
        fx.stop.stop();
        fx.enricher.wait_idle().await;

        let listing = fx.store.get(&links[0]).unwrap();
        assert_eq!(listing.fetch_status, FetchStatus::DetailFetchError);
        assert_eq!(listing.detail_fetch_error_message, STOPPED_MESSAGE);
        assert_eq!(stub.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_refresh_all_requeues_everything() {
        let stub = Arc::new(StubFetcher::new(Reply::Text(detail_page(&[]))));
        let fx = fixture(fast_config(), stub.clone());
        let links = seed(&fx.store, 3);

        fx.stop.stop();
        assert_eq!(fx.enricher.refresh_all().await, 3);
        fx.enricher.wait_idle().await;

        assert!(!fx.stop.is_stopped());
        assert_eq!(stub.calls().len(), 3);
        for link in &links {
            assert_eq!(status_of(&fx.store, link), FetchStatus::DetailsOk);
        }
        assert!(!fx.enricher.retry_one("https://www.monthly-mansion.com/missing"));
    }
}
