//! Test utilities: mock implementations of the core seams.
//!
//! Handwritten mocks for dependency injection in unit tests.
//! All mocks use `Arc<Mutex<_>>` for interior mutability, allowing
//! test assertions on recorded calls.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::acquire::{AcquiredIdentity, IdentityProvider};
use crate::driver::{BrowserDriver, BrowserSession};
use crate::error::AppError;
use crate::explorer::{CategorySource, Expansion, SubcategoryLink};
use crate::listing::{ListingPage, ListingResponse};
use crate::models::{BrowserEngine, Category, Cookie};
use crate::scheduler::MaintenanceHandler;
use crate::walker::{CrawlIdentity, ListingFetcher, PageSink, SessionSource};

pub fn cookie(name: &str, value: &str) -> Cookie {
    Cookie {
        name: name.to_string(),
        value: value.to_string(),
        domain: ".amazon.com".to_string(),
        path: "/".to_string(),
        expires: -1.0,
        http_only: false,
        secure: true,
        same_site: None,
    }
}

/// Build a listing body in the streamed `&&&` format.
pub fn listing_stream(in_page: u64, total: u64, ids: &[&str]) -> String {
    let mut chunks = vec![
        format!(
            r#"["dispatch","data-search-metadata",{{"metadata":{{"asinOnPageCount":{in_page},"totalResultCount":{total}}}}}]"#
        ),
        r#"["dispatch","data-nav-bar",{"html":"<nav/>"}]"#.to_string(),
    ];
    for (i, id) in ids.iter().enumerate() {
        chunks.push(format!(
            r#"["dispatch","data-main-slot:search-result-{i}",{{"asin":"{id}","index":{i},"html":"<div/>"}}]"#
        ));
    }
    chunks.join("\n&&&\n") + "\n&&&\n"
}

pub fn ok_listing(body: &str) -> Result<ListingResponse, AppError> {
    Ok(ListingResponse {
        status: 200,
        body: body.to_string(),
    })
}

// ---------------------------------------------------------------------------
// MockDriver
// ---------------------------------------------------------------------------

/// Interaction recorded by [`MockSession`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockStep {
    Navigate(String),
    Fill(String, String),
    Click(String),
    PressEnter(String),
    Select(String, String),
}

#[derive(Default)]
struct DriverState {
    texts: Vec<String>,
    navigate_errors: Vec<AppError>,
    existing: HashSet<String>,
    options: Vec<String>,
    contents: Vec<String>,
    url: Option<String>,
    cookies: Vec<Cookie>,
    steps: Vec<MockStep>,
    navigations: usize,
    opened: usize,
    closed: usize,
}

/// Scripted browser. `text` pops from a queue and times out once it is empty.
#[derive(Clone, Default)]
pub struct MockDriver {
    state: Arc<Mutex<DriverState>>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_texts(self, texts: Vec<&str>) -> Self {
        self.state.lock().unwrap().texts = texts.into_iter().map(str::to_string).collect();
        self
    }

    pub fn with_navigate_errors(self, errors: Vec<AppError>) -> Self {
        self.state.lock().unwrap().navigate_errors = errors;
        self
    }

    pub fn with_existing(self, selectors: &[&str]) -> Self {
        self.state.lock().unwrap().existing = selectors.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_options(self, options: Vec<&str>) -> Self {
        self.state.lock().unwrap().options = options.into_iter().map(str::to_string).collect();
        self
    }

    /// Page contents returned by successive `content` calls.
    pub fn with_contents(self, contents: Vec<&str>) -> Self {
        self.state.lock().unwrap().contents = contents.into_iter().map(str::to_string).collect();
        self
    }

    pub fn with_url(self, url: &str) -> Self {
        self.state.lock().unwrap().url = Some(url.to_string());
        self
    }

    pub fn with_cookies(self, cookies: Vec<Cookie>) -> Self {
        self.state.lock().unwrap().cookies = cookies;
        self
    }

    pub fn recorded(&self) -> Vec<MockStep> {
        self.state.lock().unwrap().steps.clone()
    }

    pub fn navigations(&self) -> usize {
        self.state.lock().unwrap().navigations
    }

    pub fn opened_sessions(&self) -> usize {
        self.state.lock().unwrap().opened
    }

    pub fn closed_sessions(&self) -> usize {
        self.state.lock().unwrap().closed
    }
}

impl BrowserDriver for MockDriver {
    type Session = MockSession;

    async fn open(&self, _engine: BrowserEngine) -> Result<MockSession, AppError> {
        self.state.lock().unwrap().opened += 1;
        Ok(MockSession {
            state: self.state.clone(),
        })
    }
}

pub struct MockSession {
    state: Arc<Mutex<DriverState>>,
}

impl MockSession {
    fn record(&self, step: MockStep) {
        self.state.lock().unwrap().steps.push(step);
    }
}

impl BrowserSession for MockSession {
    async fn navigate(&self, url: &str, _timeout: Duration) -> Result<(), AppError> {
        let mut state = self.state.lock().unwrap();
        state.navigations += 1;
        state.steps.push(MockStep::Navigate(url.to_string()));
        if state.navigate_errors.is_empty() {
            Ok(())
        } else {
            Err(state.navigate_errors.remove(0))
        }
    }

    async fn text(&self, _selector: &str, timeout: Duration) -> Result<String, AppError> {
        let mut state = self.state.lock().unwrap();
        if state.texts.is_empty() {
            Err(AppError::Timeout(timeout.as_secs()))
        } else {
            Ok(state.texts.remove(0))
        }
    }

    async fn exists(&self, selector: &str) -> Result<bool, AppError> {
        Ok(self.state.lock().unwrap().existing.contains(selector))
    }

    async fn fill(&self, selector: &str, value: &str, _timeout: Duration) -> Result<(), AppError> {
        self.record(MockStep::Fill(selector.to_string(), value.to_string()));
        Ok(())
    }

    async fn click(&self, selector: &str, _timeout: Duration) -> Result<(), AppError> {
        self.record(MockStep::Click(selector.to_string()));
        Ok(())
    }

    async fn press_enter(&self, selector: &str, _timeout: Duration) -> Result<(), AppError> {
        self.record(MockStep::PressEnter(selector.to_string()));
        Ok(())
    }

    async fn option_labels(&self, _selector: &str, _timeout: Duration) -> Result<Vec<String>, AppError> {
        Ok(self.state.lock().unwrap().options.clone())
    }

    async fn select_option(&self, selector: &str, label: &str, _timeout: Duration) -> Result<(), AppError> {
        self.record(MockStep::Select(selector.to_string(), label.to_string()));
        Ok(())
    }

    async fn content(&self) -> Result<String, AppError> {
        let mut state = self.state.lock().unwrap();
        if state.contents.is_empty() {
            Ok(String::new())
        } else {
            Ok(state.contents.remove(0))
        }
    }

    async fn current_url(&self) -> Result<String, AppError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .url
            .clone()
            .unwrap_or_else(|| "about:blank".to_string()))
    }

    async fn cookies(&self) -> Result<Vec<Cookie>, AppError> {
        Ok(self.state.lock().unwrap().cookies.clone())
    }

    async fn close(self) -> Result<(), AppError> {
        self.state.lock().unwrap().closed += 1;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MockIdentityProvider
// ---------------------------------------------------------------------------

/// Provider returning queued results, then succeeding forever.
#[derive(Clone)]
pub struct MockIdentityProvider {
    postcode: String,
    results: Arc<Mutex<Vec<Result<AcquiredIdentity, AppError>>>>,
    calls: Arc<AtomicUsize>,
    unsupported: Vec<BrowserEngine>,
}

impl MockIdentityProvider {
    pub fn succeeding(postcode: &str) -> Self {
        Self::with_results(Vec::new()).postcode(postcode)
    }

    pub fn with_results(results: Vec<Result<AcquiredIdentity, AppError>>) -> Self {
        Self {
            postcode: "99501".to_string(),
            results: Arc::new(Mutex::new(results)),
            calls: Arc::new(AtomicUsize::new(0)),
            unsupported: Vec::new(),
        }
    }

    /// Report `engine` as one this provider cannot acquire for.
    pub fn without_engine(mut self, engine: BrowserEngine) -> Self {
        self.unsupported.push(engine);
        self
    }

    fn postcode(mut self, postcode: &str) -> Self {
        self.postcode = postcode.to_string();
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl IdentityProvider for MockIdentityProvider {
    async fn acquire(
        &self,
        engine: BrowserEngine,
        postcode: Option<&str>,
    ) -> Result<AcquiredIdentity, AppError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        let mut results = self.results.lock().unwrap();
        if !results.is_empty() {
            return results.remove(0);
        }
        let postcode = postcode.unwrap_or(&self.postcode).to_string();
        Ok(AcquiredIdentity {
            engine,
            location: format!("Somewhere {postcode}"),
            postcode,
            cookies: vec![cookie("session-id", &n.to_string())],
        })
    }

    fn supports(&self, engine: BrowserEngine) -> bool {
        !self.unsupported.contains(&engine)
    }
}

// ---------------------------------------------------------------------------
// MockListingFetcher
// ---------------------------------------------------------------------------

/// Fetcher popping queued responses; an empty queue serves an empty last page.
#[derive(Clone, Default)]
pub struct MockListingFetcher {
    responses: Arc<Mutex<Vec<Result<ListingResponse, AppError>>>>,
    urls: Arc<Mutex<Vec<String>>>,
}

impl MockListingFetcher {
    pub fn with_responses(responses: Vec<Result<ListingResponse, AppError>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses)),
            urls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn calls(&self) -> usize {
        self.urls.lock().unwrap().len()
    }

    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }
}

impl ListingFetcher for MockListingFetcher {
    async fn fetch(&self, url: &str, _identity: &CrawlIdentity) -> Result<ListingResponse, AppError> {
        self.urls.lock().unwrap().push(url.to_string());
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            ok_listing(&listing_stream(0, 0, &[]))
        } else {
            responses.remove(0)
        }
    }
}

// ---------------------------------------------------------------------------
// MockSessionSource
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct MockSessionSource {
    checkouts: Arc<AtomicUsize>,
}

impl MockSessionSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn checkouts(&self) -> usize {
        self.checkouts.load(Ordering::SeqCst)
    }
}

impl SessionSource for MockSessionSource {
    async fn checkout(&self) -> Result<CrawlIdentity, AppError> {
        let n = self.checkouts.fetch_add(1, Ordering::SeqCst);
        Ok(CrawlIdentity {
            cookies: vec![cookie("session-id", &n.to_string())],
            proxy: None,
        })
    }
}

// ---------------------------------------------------------------------------
// RecordingSink
// ---------------------------------------------------------------------------

#[derive(Default)]
struct SinkState {
    known: HashMap<String, HashSet<String>>,
    pages: Vec<(String, u32, ListingPage)>,
    failures: Vec<(String, u32, String)>,
}

/// In-memory [`PageSink`] recording everything it is given.
#[derive(Clone, Default)]
pub struct RecordingSink {
    state: Arc<Mutex<SinkState>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_known(self, category: &str, ids: Vec<String>) -> Self {
        self.state
            .lock()
            .unwrap()
            .known
            .insert(category.to_string(), ids.into_iter().collect());
        self
    }

    /// Page numbers persisted for `category`.
    pub fn pages(&self, category: &str) -> Vec<u32> {
        self.state
            .lock()
            .unwrap()
            .pages
            .iter()
            .filter(|(c, _, _)| c == category)
            .map(|(_, p, _)| *p)
            .collect()
    }

    /// `(page, body)` of every rejected response for `category`.
    pub fn failures(&self, category: &str) -> Vec<(u32, String)> {
        self.state
            .lock()
            .unwrap()
            .failures
            .iter()
            .filter(|(c, _, _)| c == category)
            .map(|(_, p, b)| (*p, b.clone()))
            .collect()
    }
}

impl PageSink for RecordingSink {
    async fn known_ids(&self, category: &Category) -> Result<HashSet<String>, AppError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .known
            .get(&category.name)
            .cloned()
            .unwrap_or_default())
    }

    async fn persist_page(
        &self,
        category: &Category,
        page: u32,
        listing: &ListingPage,
        _body: &str,
    ) -> Result<(), AppError> {
        self.state
            .lock()
            .unwrap()
            .pages
            .push((category.name.clone(), page, listing.clone()));
        Ok(())
    }

    async fn persist_failure(
        &self,
        category: &Category,
        page: u32,
        _reason: &str,
        body: &str,
    ) -> Result<(), AppError> {
        self.state
            .lock()
            .unwrap()
            .failures
            .push((category.name.clone(), page, body.to_string()));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MockCategorySource
// ---------------------------------------------------------------------------

/// URL the mock category source serves `name` under.
pub fn mock_category_url(name: &str) -> String {
    format!(
        "https://www.amazon.com/s?rh=n%3A{}&fs=true",
        name.replace(' ', "+")
    )
}

#[derive(Default)]
struct CategoryState {
    keywords: HashMap<String, Vec<String>>,
    pages: HashMap<String, Vec<String>>,
    expansions: HashMap<String, usize>,
    closed: usize,
}

/// Category site as a static graph of names.
#[derive(Clone, Default)]
pub struct MockCategorySource {
    state: Arc<Mutex<CategoryState>>,
}

impl MockCategorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_keyword(self, keyword: &str, children: &[&str]) -> Self {
        self.state.lock().unwrap().keywords.insert(
            keyword.to_string(),
            children.iter().map(|c| c.to_string()).collect(),
        );
        self
    }

    pub fn with_page(self, name: &str, children: &[&str]) -> Self {
        self.state.lock().unwrap().pages.insert(
            mock_category_url(name),
            children.iter().map(|c| c.to_string()).collect(),
        );
        self
    }

    pub fn expansions_of(&self, name: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .expansions
            .get(&mock_category_url(name))
            .copied()
            .unwrap_or(0)
    }

    pub fn sessions_closed(&self) -> usize {
        self.state.lock().unwrap().closed
    }

    fn links(children: &[String]) -> Vec<SubcategoryLink> {
        children
            .iter()
            .map(|name| SubcategoryLink {
                name: name.clone(),
                url: mock_category_url(name),
            })
            .collect()
    }
}

impl CategorySource for MockCategorySource {
    type Session = ();

    async fn open(&self) -> Result<(), AppError> {
        Ok(())
    }

    async fn search(&self, _session: &(), keyword: &str) -> Result<Expansion, AppError> {
        let state = self.state.lock().unwrap();
        let children = state
            .keywords
            .get(keyword)
            .ok_or_else(|| AppError::InvalidInput(format!("No search scope named '{keyword}'")))?;
        Ok(Expansion {
            url: mock_category_url(keyword),
            links: Self::links(children),
        })
    }

    async fn expand(&self, _session: &(), url: &str) -> Result<Vec<SubcategoryLink>, AppError> {
        let mut state = self.state.lock().unwrap();
        *state.expansions.entry(url.to_string()).or_default() += 1;
        match state.pages.get(url) {
            Some(children) => Ok(Self::links(children)),
            None => Err(AppError::BrowserError(format!("No page at {url}"))),
        }
    }

    async fn close(&self, _session: ()) {
        self.state.lock().unwrap().closed += 1;
    }
}

// ---------------------------------------------------------------------------
// CountingHandler
// ---------------------------------------------------------------------------

/// [`MaintenanceHandler`] that only counts invocations.
#[derive(Clone, Default)]
pub struct CountingHandler {
    fills: Arc<AtomicUsize>,
    cleanups: Arc<AtomicUsize>,
}

impl CountingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fills(&self) -> usize {
        self.fills.load(Ordering::SeqCst)
    }

    pub fn cleanups(&self) -> usize {
        self.cleanups.load(Ordering::SeqCst)
    }
}

impl MaintenanceHandler for CountingHandler {
    async fn fill(&self, _independent_loop: bool, _cancel: CancellationToken) {
        self.fills.fetch_add(1, Ordering::SeqCst);
    }

    async fn cleanup(&self) {
        self.cleanups.fetch_add(1, Ordering::SeqCst);
    }
}
