//! Paginated product walker.
//!
//! Per category, pages are fetched under an identity (cookies + proxy)
//! rotated every few pages. Each response is classified:
//! - transport failure: retried with backoff, then a terminal failure
//! - redirect/automation marker: body kept for inspection, terminal failure
//! - short page or exact total: end of category
//! - mostly-seen items: spends overlap tolerance, saturation once exhausted
//!
//! Categories run concurrently up to a ceiling; one category failing never
//! affects another.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::Instrument;

use crate::driver::SiteProfile;
use crate::error::AppError;
use crate::identity::IdentityPool;
use crate::listing::{ListingPage, ListingResponse, ListingUrl, SortOrder, classify};
use crate::models::{BrowserEngine, Category, Cookie, IdentitySet, ProxyEndpoint, ProxyPartition};
use crate::pool::PoolBackend;
use crate::proxy::{ProxyPool, ProxyStore};
use crate::retry::Backoff;

/// Walker tuning.
#[derive(Debug, Clone)]
pub struct WalkerConfig {
    /// Overlap percentage above which a page counts as a repeat.
    pub overlap_threshold: f64,
    /// Repeats tolerated before the category is declared saturated.
    pub overlap_tolerance: i32,
    /// Pages served per identity before rotating.
    pub rotate_every: u32,
    /// Pages reporting fewer items end the category.
    pub min_items: u64,
    /// Stop once this many products were collected.
    pub product_cap: u64,
    pub max_pages: Option<u32>,
    /// Categories walked at once.
    pub concurrency: usize,
    pub backoff: Backoff,
    pub sort: SortOrder,
}

impl Default for WalkerConfig {
    fn default() -> Self {
        Self {
            overlap_threshold: 95.0,
            overlap_tolerance: 10,
            rotate_every: 3,
            min_items: 5,
            product_cap: 50_000,
            max_pages: None,
            concurrency: 8,
            backoff: Backoff::default(),
            sort: SortOrder::default(),
        }
    }
}

/// Result of observing one page.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OverlapVerdict {
    /// Share of the page's items already seen, in percent.
    pub ratio: f64,
    pub overlapped: bool,
    pub saturated: bool,
}

/// Tracks item ids seen in one category.
#[derive(Debug, Clone)]
pub struct OverlapTracker {
    seen: HashSet<String>,
    threshold: f64,
    remaining: i32,
}

impl OverlapTracker {
    pub fn new(threshold: f64, tolerance: i32, seed: HashSet<String>) -> Self {
        Self {
            seen: seed,
            threshold,
            remaining: tolerance,
        }
    }

    /// Score `ids` against everything seen so far, then remember them.
    pub fn observe(&mut self, ids: &[String]) -> OverlapVerdict {
        let page: HashSet<&String> = ids.iter().collect();
        let ratio = if page.is_empty() {
            0.0
        } else {
            let repeated = page.iter().filter(|id| self.seen.contains(**id)).count();
            repeated as f64 / page.len() as f64 * 100.0
        };

        let overlapped = ratio > self.threshold;
        if overlapped {
            self.remaining -= 1;
        }
        self.seen.extend(ids.iter().cloned());

        OverlapVerdict {
            ratio,
            overlapped,
            saturated: self.remaining < 0,
        }
    }

    pub fn remaining(&self) -> i32 {
        self.remaining
    }

    pub fn seen(&self) -> usize {
        self.seen.len()
    }
}

/// Identity a page request is sent under.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CrawlIdentity {
    pub cookies: Vec<Cookie>,
    pub proxy: Option<ProxyEndpoint>,
}

/// Hands out crawl identities.
pub trait SessionSource: Send + Sync + Clone + 'static {
    fn checkout(&self) -> impl Future<Output = Result<CrawlIdentity, AppError>> + Send;
}

/// Issues listing requests.
pub trait ListingFetcher: Send + Sync + Clone + 'static {
    fn fetch(
        &self,
        url: &str,
        identity: &CrawlIdentity,
    ) -> impl Future<Output = Result<ListingResponse, AppError>> + Send;
}

/// Where pages end up.
pub trait PageSink: Send + Sync + Clone + 'static {
    /// Item ids already persisted for `category`.
    fn known_ids(
        &self,
        category: &Category,
    ) -> impl Future<Output = Result<HashSet<String>, AppError>> + Send;

    fn persist_page(
        &self,
        category: &Category,
        page: u32,
        listing: &ListingPage,
        body: &str,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Keep a rejected response for later inspection.
    fn persist_failure(
        &self,
        category: &Category,
        page: u32,
        reason: &str,
        body: &str,
    ) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// [`SessionSource`] drawing straight from in-process pools.
#[derive(Debug, Clone)]
pub struct PoolSessionSource<B, S> {
    identities: IdentityPool<B>,
    proxies: ProxyPool<S>,
    engine: BrowserEngine,
    partition: ProxyPartition,
}

impl<B, S> PoolSessionSource<B, S> {
    pub fn new(
        identities: IdentityPool<B>,
        proxies: ProxyPool<S>,
        engine: BrowserEngine,
        partition: ProxyPartition,
    ) -> Self {
        Self {
            identities,
            proxies,
            engine,
            partition,
        }
    }
}

impl<B, S> SessionSource for PoolSessionSource<B, S>
where
    B: PoolBackend<IdentitySet> + 'static,
    S: ProxyStore + 'static,
{
    async fn checkout(&self) -> Result<CrawlIdentity, AppError> {
        let cookies = match self.identities.get(self.engine, None).await {
            Some(set) => set.cookies,
            None => {
                tracing::warn!(engine = %self.engine, "Identity pool empty, crawling without cookies");
                Vec::new()
            }
        };
        let proxy = match self.proxies.rotate(&self.partition).await {
            Some(record) => match record.endpoint() {
                Ok(endpoint) => Some(endpoint),
                Err(e) => {
                    tracing::warn!(proxy_id = %record.id, error = %e, "Skipping malformed proxy");
                    None
                }
            },
            None => None,
        };
        Ok(CrawlIdentity { cookies, proxy })
    }
}

/// Why a category stopped with an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Blocked,
    AutomationDetected,
    Http,
    Malformed,
    Transport,
    Session,
    Sink,
    InvalidCategory,
}

impl FailureKind {
    fn of(error: &AppError) -> Self {
        match error {
            AppError::Blocked(_) => FailureKind::Blocked,
            AppError::AutomationDetected(_) => FailureKind::AutomationDetected,
            AppError::HttpError(_) => FailureKind::Http,
            AppError::InvalidInput(_) | AppError::SerializationError(_) => FailureKind::Malformed,
            _ => FailureKind::Transport,
        }
    }
}

/// Terminal state of one category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "reason")]
pub enum WalkStatus {
    EndOfCategory,
    Saturated,
    CapReached,
    PageLimit,
    Failed(FailureKind),
}

impl WalkStatus {
    pub fn is_failure(&self) -> bool {
        matches!(self, WalkStatus::Failed(_))
    }
}

/// Per-category outcome.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryReport {
    pub category: String,
    /// Pages persisted.
    pub pages: u32,
    pub products: u64,
    pub status: WalkStatus,
}

/// Walks listing pages for a set of categories.
#[derive(Debug, Clone)]
pub struct ProductWalker<F, S, K> {
    fetcher: F,
    sessions: S,
    sink: K,
    profile: Arc<SiteProfile>,
    config: WalkerConfig,
}

impl<F, S, K> ProductWalker<F, S, K>
where
    F: ListingFetcher,
    S: SessionSource,
    K: PageSink,
{
    pub fn new(fetcher: F, sessions: S, sink: K, profile: Arc<SiteProfile>, config: WalkerConfig) -> Self {
        Self {
            fetcher,
            sessions,
            sink,
            profile,
            config,
        }
    }

    pub fn config(&self) -> &WalkerConfig {
        &self.config
    }

    /// Walk every category, at most `concurrency` at a time.
    pub async fn run(&self, categories: Vec<Category>) -> Vec<CategoryReport> {
        let permits = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut tasks = JoinSet::new();

        for category in categories {
            let walker = self.clone();
            let permits = permits.clone();
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await.ok();
                walker.walk(&category).await
            });
        }

        let mut reports = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(report) => reports.push(report),
                Err(e) => tracing::error!(error = %e, "Category task aborted"),
            }
        }
        reports
    }

    /// Walk one category until a terminal status.
    pub async fn walk(&self, category: &Category) -> CategoryReport {
        let span = tracing::info_span!("category", category = %category.name);
        self.walk_inner(category).instrument(span).await
    }

    async fn walk_inner(&self, category: &Category) -> CategoryReport {
        let mut report = CategoryReport {
            category: category.name.clone(),
            pages: 0,
            products: 0,
            status: WalkStatus::EndOfCategory,
        };

        let urls = match ListingUrl::new(
            &self.profile.root_url,
            &self.profile.listing.query_path,
            &category.url,
            self.config.sort,
        ) {
            Ok(urls) => urls,
            Err(e) => {
                tracing::error!(error = %e, "Cannot build listing URL");
                report.status = WalkStatus::Failed(FailureKind::InvalidCategory);
                return report;
            }
        };

        let seed = self.sink.known_ids(category).await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Could not load previously seen ids");
            HashSet::new()
        });
        let mut overlap = OverlapTracker::new(
            self.config.overlap_threshold,
            self.config.overlap_tolerance,
            seed,
        );

        let rotate_every = self.config.rotate_every.max(1);
        let mut identity = CrawlIdentity::default();
        let mut page: u32 = 0;

        loop {
            page += 1;

            if (page - 1) % rotate_every == 0 {
                identity = match self.sessions.checkout().await {
                    Ok(identity) => identity,
                    Err(e) => {
                        tracing::error!(page, error = %e, "Identity checkout failed");
                        report.status = WalkStatus::Failed(FailureKind::Session);
                        return report;
                    }
                };
                tracing::debug!(page, proxied = identity.proxy.is_some(), "Rotated identity");
            }

            let url = urls.page(page);
            tracing::info!(page, %url, "Fetching page");
            let response = match self.fetch_with_retry(&url, &identity, page).await {
                Ok(response) => response,
                Err(e) => {
                    tracing::error!(page, error = %e, "Giving up on page");
                    report.status = WalkStatus::Failed(FailureKind::of(&e));
                    return report;
                }
            };

            let listing = match classify(&response, &self.profile.listing) {
                Ok(listing) => listing,
                Err(e) => {
                    tracing::error!(page, error = %e, "Rejected listing response");
                    if let Err(sink_err) = self
                        .sink
                        .persist_failure(category, page, &e.to_string(), &response.body)
                        .await
                    {
                        tracing::error!(page, error = %sink_err, "Failed to keep rejected body");
                    }
                    report.status = WalkStatus::Failed(FailureKind::of(&e));
                    return report;
                }
            };

            let verdict = overlap.observe(&listing.item_ids);
            if verdict.overlapped {
                tracing::warn!(
                    page,
                    ratio = verdict.ratio,
                    threshold = self.config.overlap_threshold,
                    remaining = overlap.remaining(),
                    "Found overlapping products"
                );
            }

            if let Err(e) = self
                .sink
                .persist_page(category, page, &listing, &response.body)
                .await
            {
                tracing::error!(page, error = %e, "Failed to persist page");
                report.status = WalkStatus::Failed(FailureKind::Sink);
                return report;
            }
            report.pages += 1;
            report.products += listing.item_ids.len() as u64;
            tracing::info!(page, products = report.products, "Page persisted");

            if listing.is_last(self.config.min_items) {
                tracing::info!(page, "Found the end of the category");
                report.status = WalkStatus::EndOfCategory;
                return report;
            }
            if verdict.saturated {
                tracing::info!(page, "Stopped on overlapping products");
                report.status = WalkStatus::Saturated;
                return report;
            }
            if report.products >= self.config.product_cap {
                tracing::info!(page, cap = self.config.product_cap, "Reached product cap");
                report.status = WalkStatus::CapReached;
                return report;
            }
            if self.config.max_pages.is_some_and(|max| page >= max) {
                tracing::info!(page, "Reached page limit");
                report.status = WalkStatus::PageLimit;
                return report;
            }
        }
    }

    async fn fetch_with_retry(
        &self,
        url: &str,
        identity: &CrawlIdentity,
        page: u32,
    ) -> Result<ListingResponse, AppError> {
        let max_attempts = self.config.backoff.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.fetcher.fetch(url, identity).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = self.config.backoff.delay_for_attempt(attempt);
                    tracing::warn!(page, attempt, ?delay, error = %e, "Fetch failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use uuid::Uuid;

    use super::*;
    use crate::lock::SharedLock;
    use crate::models::{IdentityPolicy, ProxyType};
    use crate::pool::MemoryBackend;
    use crate::proxy::MemoryProxyStore;
    use crate::testutil::{
        MockListingFetcher, MockSessionSource, RecordingSink, listing_stream, ok_listing,
    };

    fn category(name: &str) -> Category {
        Category {
            id: Uuid::new_v4(),
            name: name.to_string(),
            depth: 1,
            ancestor: Some("Electronics".into()),
            parent: Some("Electronics".into()),
            path: format!("Electronics/{name}"),
            url: format!("https://www.amazon.com/s?i=electronics&rh=n%3A{name}&fs=true"),
            is_leaf: true,
        }
    }

    fn config() -> WalkerConfig {
        WalkerConfig {
            backoff: Backoff::new(3, Duration::ZERO, Duration::ZERO),
            ..WalkerConfig::default()
        }
    }

    fn walker(
        fetcher: MockListingFetcher,
        sessions: MockSessionSource,
        sink: RecordingSink,
        config: WalkerConfig,
    ) -> ProductWalker<MockListingFetcher, MockSessionSource, RecordingSink> {
        ProductWalker::new(fetcher, sessions, sink, Arc::new(SiteProfile::default()), config)
    }

    fn ids(prefix: &str, n: usize) -> Vec<String> {
        (0..n).map(|i| format!("{prefix}{i}")).collect()
    }

    fn page_of(ids: &[String]) -> Result<ListingResponse, AppError> {
        let refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        ok_listing(&listing_stream(48, 10_000, &refs))
    }

    #[test]
    fn overlap_counts_against_all_seen_ids() {
        let mut tracker = OverlapTracker::new(95.0, 1, HashSet::new());
        let first = ids("A", 20);

        let v = tracker.observe(&first);
        assert_eq!(v.ratio, 0.0);
        assert!(!v.overlapped);

        let v = tracker.observe(&first);
        assert_eq!(v.ratio, 100.0);
        assert!(v.overlapped && !v.saturated);

        let v = tracker.observe(&first);
        assert!(v.saturated);
        assert_eq!(tracker.seen(), 20);
    }

    #[test]
    fn ratio_of_exactly_the_threshold_is_not_overlap() {
        let seed: HashSet<String> = ids("A", 19).into_iter().collect();
        let mut tracker = OverlapTracker::new(95.0, 10, seed);
        let mut page = ids("A", 19);
        page.push("NEW".into());
        let v = tracker.observe(&page);
        assert!((v.ratio - 95.0).abs() < f64::EPSILON);
        assert!(!v.overlapped);
    }

    #[tokio::test]
    async fn halts_after_the_eleventh_overlapping_page() {
        let repeated = ids("A", 20);
        let responses = (0..30).map(|_| page_of(&repeated)).collect();
        let fetcher = MockListingFetcher::with_responses(responses);
        let sink = RecordingSink::new();

        let report = walker(fetcher.clone(), MockSessionSource::new(), sink.clone(), config())
            .walk(&category("Headphones"))
            .await;

        // Page 1 is fresh; pages 2..=12 overlap, the 11th overlap saturates.
        assert_eq!(report.status, WalkStatus::Saturated);
        assert_eq!(report.pages, 12);
        assert_eq!(fetcher.calls(), 12);
        assert_eq!(sink.pages("Headphones").len(), 12);
    }

    #[tokio::test]
    async fn short_page_ends_the_category() {
        let fetcher = MockListingFetcher::with_responses(vec![
            page_of(&ids("A", 20)),
            ok_listing(&listing_stream(3, 10_000, &["Z1", "Z2", "Z3"])),
            page_of(&ids("B", 20)),
        ]);
        let sink = RecordingSink::new();

        let report = walker(fetcher.clone(), MockSessionSource::new(), sink.clone(), config())
            .walk(&category("Earbuds"))
            .await;

        assert_eq!(report.status, WalkStatus::EndOfCategory);
        assert_eq!(report.pages, 2);
        assert_eq!(report.products, 23);
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn detection_keeps_the_body_and_stops() {
        let fetcher = MockListingFetcher::with_responses(vec![
            page_of(&ids("A", 20)),
            ok_listing("<html>To discuss automated access to Amazon data</html>"),
        ]);
        let sink = RecordingSink::new();

        let report = walker(fetcher, MockSessionSource::new(), sink.clone(), config())
            .walk(&category("Laptops"))
            .await;

        assert_eq!(report.status, WalkStatus::Failed(FailureKind::AutomationDetected));
        assert_eq!(report.pages, 1);
        let failures = sink.failures("Laptops");
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, 2);
    }

    #[tokio::test]
    async fn transport_errors_are_retried_then_fail() {
        let fetcher = MockListingFetcher::with_responses(vec![
            Err(AppError::Timeout(60)),
            Err(AppError::NetworkError("reset".into())),
            page_of(&ids("A", 20)),
            Err(AppError::Timeout(60)),
            Err(AppError::Timeout(60)),
            Err(AppError::Timeout(60)),
        ]);

        let report = walker(fetcher.clone(), MockSessionSource::new(), RecordingSink::new(), config())
            .walk(&category("Tablets"))
            .await;

        assert_eq!(report.status, WalkStatus::Failed(FailureKind::Transport));
        assert_eq!(report.pages, 1);
        assert_eq!(fetcher.calls(), 6);
    }

    #[tokio::test]
    async fn identity_rotates_every_n_pages() {
        let responses = (0..7).map(|i| page_of(&ids(&format!("P{i}-"), 20))).collect();
        let sessions = MockSessionSource::new();
        let cfg = WalkerConfig {
            max_pages: Some(7),
            ..config()
        };

        let report = walker(
            MockListingFetcher::with_responses(responses),
            sessions.clone(),
            RecordingSink::new(),
            cfg,
        )
        .walk(&category("Cameras"))
        .await;

        assert_eq!(report.status, WalkStatus::PageLimit);
        // Pages 1, 4 and 7 start a new identity.
        assert_eq!(sessions.checkouts(), 3);
    }

    #[tokio::test]
    async fn product_cap_stops_the_walk() {
        let responses = (0..5).map(|i| page_of(&ids(&format!("P{i}-"), 20))).collect();
        let cfg = WalkerConfig {
            product_cap: 40,
            ..config()
        };

        let report = walker(
            MockListingFetcher::with_responses(responses),
            MockSessionSource::new(),
            RecordingSink::new(),
            cfg,
        )
        .walk(&category("Monitors"))
        .await;

        assert_eq!(report.status, WalkStatus::CapReached);
        assert_eq!(report.products, 40);
    }

    #[tokio::test]
    async fn previously_persisted_ids_seed_the_overlap_set() {
        let known = ids("A", 20);
        let sink = RecordingSink::new().with_known("Speakers", known.clone());
        let responses = (0..3).map(|_| page_of(&known)).collect();
        let cfg = WalkerConfig {
            overlap_tolerance: 1,
            ..config()
        };

        let report = walker(
            MockListingFetcher::with_responses(responses),
            MockSessionSource::new(),
            sink,
            cfg,
        )
        .walk(&category("Speakers"))
        .await;

        assert_eq!(report.status, WalkStatus::Saturated);
        assert_eq!(report.pages, 2);
    }

    #[tokio::test]
    async fn run_isolates_failing_categories() {
        let fetcher = MockListingFetcher::with_responses(vec![]);
        let mut broken = category("Broken");
        broken.url = "not a url".into();

        let reports = walker(fetcher, MockSessionSource::new(), RecordingSink::new(), config())
            .run(vec![broken, category("Fine")])
            .await;

        assert_eq!(reports.len(), 2);
        let broken = reports.iter().find(|r| r.category == "Broken").unwrap();
        assert_eq!(broken.status, WalkStatus::Failed(FailureKind::InvalidCategory));
        let fine = reports.iter().find(|r| r.category == "Fine").unwrap();
        assert_eq!(fine.status, WalkStatus::EndOfCategory);
    }

    #[tokio::test]
    async fn pool_session_source_draws_cookies_and_proxy() {
        let identities = IdentityPool::new(IdentityPolicy::default(), SharedLock::new())
            .with_partition(BrowserEngine::Chromium, MemoryBackend::new(2));
        identities
            .add(
                BrowserEngine::Chromium,
                "99501",
                "Anchorage",
                vec![crate::testutil::cookie("session-id", "1")],
                None,
            )
            .await;
        let proxies = ProxyPool::new(MemoryProxyStore::new());
        let partition = ProxyPartition::new("general", "iproyal", ProxyType::Dynamic);
        proxies
            .replace(&partition, &["geo.example.net:12321:u:p:country-us".to_string()])
            .await;

        let source = PoolSessionSource::new(identities, proxies, BrowserEngine::Chromium, partition);
        let first = source.checkout().await.unwrap();
        assert_eq!(first.cookies.len(), 1);
        assert_eq!(
            first.proxy.as_ref().map(|p| p.url.as_str()),
            Some("http://u:p@geo.example.net:12321")
        );

        let second = source.checkout().await.unwrap();
        assert!(second.cookies.is_empty());
        assert!(second.proxy.is_some());
    }
}
