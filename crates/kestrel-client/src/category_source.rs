use std::sync::Arc;
use std::time::Duration;

use kestrel_core::driver::{BrowserDriver, BrowserSession, SearchSelectors, SiteProfile};
use kestrel_core::error::AppError;
use kestrel_core::explorer::{CategorySource, Expansion, SubcategoryLink, normalize_links};
use kestrel_core::models::BrowserEngine;
use scraper::{Html, Selector};

/// [`CategorySource`] reading category pages through a browser session.
#[derive(Clone)]
pub struct DriverCategorySource<D> {
    driver: D,
    profile: Arc<SiteProfile>,
    engine: BrowserEngine,
    step_timeout: Duration,
    settle: Duration,
}

impl<D: BrowserDriver> DriverCategorySource<D> {
    pub fn new(driver: D, profile: Arc<SiteProfile>, engine: BrowserEngine) -> Self {
        Self {
            driver,
            profile,
            engine,
            step_timeout: Duration::from_secs(14),
            settle: Duration::from_millis(1500),
        }
    }

    /// Override the per-step timeout and the pause after each page load.
    pub fn with_timing(mut self, step_timeout: Duration, settle: Duration) -> Self {
        self.step_timeout = step_timeout;
        self.settle = settle;
        self
    }

    async fn read_links(&self, session: &D::Session) -> Result<Vec<SubcategoryLink>, AppError> {
        if !self.settle.is_zero() {
            tokio::time::sleep(self.settle).await;
        }
        let html = session.content().await?;
        let links = parse_subcategory_links(&html, &self.profile.search)?;
        Ok(normalize_links(&self.profile, links))
    }
}

/// Extract `(name, href)` pairs of the subcategory refinement list.
pub fn parse_subcategory_links(
    html: &str,
    selectors: &SearchSelectors,
) -> Result<Vec<SubcategoryLink>, AppError> {
    let links = Selector::parse(&selectors.subcategory_links).map_err(|e| {
        AppError::ConfigError(format!(
            "Invalid subcategory link selector '{}': {e:?}",
            selectors.subcategory_links
        ))
    })?;
    let names = Selector::parse(&selectors.subcategory_name).map_err(|e| {
        AppError::ConfigError(format!(
            "Invalid subcategory name selector '{}': {e:?}",
            selectors.subcategory_name
        ))
    })?;

    let document = Html::parse_document(html);
    let mut out = Vec::new();
    for anchor in document.select(&links) {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        let raw: String = match anchor.select(&names).next() {
            Some(name) => name.text().collect(),
            None => anchor.text().collect(),
        };
        let name = raw.split_whitespace().collect::<Vec<_>>().join(" ");
        if name.is_empty() {
            continue;
        }
        out.push(SubcategoryLink {
            name,
            url: href.to_string(),
        });
    }
    Ok(out)
}

impl<D> CategorySource for DriverCategorySource<D>
where
    D: BrowserDriver + 'static,
{
    type Session = D::Session;

    async fn open(&self) -> Result<D::Session, AppError> {
        self.driver.open(self.engine).await
    }

    async fn search(&self, session: &D::Session, keyword: &str) -> Result<Expansion, AppError> {
        let search = &self.profile.search;
        session
            .navigate(&self.profile.home_url(), self.step_timeout)
            .await?;

        let labels = session
            .option_labels(&search.scope_dropdown, self.step_timeout)
            .await?;
        let label = labels
            .iter()
            .find(|l| l.as_str() == keyword)
            .or_else(|| labels.iter().find(|l| l.eq_ignore_ascii_case(keyword)))
            .ok_or_else(|| AppError::InvalidInput(format!("No search scope named '{keyword}'")))?;

        session
            .select_option(&search.scope_dropdown, label, self.step_timeout)
            .await?;
        session
            .fill(&search.search_box, label, self.step_timeout)
            .await?;
        session
            .press_enter(&search.search_box, self.step_timeout)
            .await?;

        let links = self.read_links(session).await?;
        let url = session.current_url().await?;
        tracing::info!(keyword, subcategories = links.len(), "Search scope loaded");
        Ok(Expansion { url, links })
    }

    async fn expand(&self, session: &D::Session, url: &str) -> Result<Vec<SubcategoryLink>, AppError> {
        session.navigate(url, self.step_timeout).await?;
        self.read_links(session).await
    }

    async fn close(&self, session: D::Session) {
        if let Err(e) = session.close().await {
            tracing::warn!(error = %e, "Failed to close category session");
        }
    }
}
