//! Browser automation seam.
//!
//! The core never talks to a browser directly: identity acquisition and
//! category exploration drive a [`BrowserSession`] through CSS selectors
//! taken from a [`SiteProfile`]. Every step carries its own timeout and
//! reports expiry as [`AppError::Timeout`].

use std::future::Future;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::{BrowserEngine, Cookie};

/// Launches browser sessions.
pub trait BrowserDriver: Send + Sync + Clone {
    type Session: BrowserSession;

    /// Open a fresh, cookie-less session on `engine`.
    fn open(
        &self,
        engine: BrowserEngine,
    ) -> impl Future<Output = Result<Self::Session, AppError>> + Send;

    /// Whether [`open`](Self::open) can succeed for `engine` at all.
    fn supports(&self, engine: BrowserEngine) -> bool {
        let _ = engine;
        true
    }
}

/// One isolated browser context with a single page.
pub trait BrowserSession: Send + Sync {
    fn navigate(
        &self,
        url: &str,
        timeout: Duration,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Wait until `selector` matches, then return its visible text.
    fn text(
        &self,
        selector: &str,
        timeout: Duration,
    ) -> impl Future<Output = Result<String, AppError>> + Send;

    /// Whether `selector` currently matches, without waiting.
    fn exists(&self, selector: &str) -> impl Future<Output = Result<bool, AppError>> + Send;

    fn fill(
        &self,
        selector: &str,
        value: &str,
        timeout: Duration,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    fn click(
        &self,
        selector: &str,
        timeout: Duration,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    fn press_enter(
        &self,
        selector: &str,
        timeout: Duration,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Visible labels of the `<option>`s under a `<select>`.
    fn option_labels(
        &self,
        selector: &str,
        timeout: Duration,
    ) -> impl Future<Output = Result<Vec<String>, AppError>> + Send;

    /// Select the `<option>` whose visible label equals `label`.
    fn select_option(
        &self,
        selector: &str,
        label: &str,
        timeout: Duration,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Rendered HTML of the current page.
    fn content(&self) -> impl Future<Output = Result<String, AppError>> + Send;

    fn current_url(&self) -> impl Future<Output = Result<String, AppError>> + Send;

    /// Every cookie held by the session.
    fn cookies(&self) -> impl Future<Output = Result<Vec<Cookie>, AppError>> + Send;

    fn close(self) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// Selectors and markers describing the target site.
///
/// `Default` is the reference US storefront profile. A profile file may
/// override any field, nested ones included.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteProfile {
    /// Scheme and host, no trailing slash.
    pub root_url: String,
    /// Landing page used for location changes.
    pub home_path: String,
    /// Delivery postcodes identities are minted for.
    pub postcodes: Vec<String>,
    pub location: LocationSelectors,
    pub search: SearchSelectors,
    pub listing: ListingMarkers,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocationSelectors {
    pub popover_link: String,
    pub postcode_input: String,
    pub apply_button: String,
    pub close_button: String,
    pub invalid_postcode: String,
    pub invalid_postcode_message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSelectors {
    pub scope_dropdown: String,
    pub search_box: String,
    /// Anchors of the subcategory refinement list.
    pub subcategory_links: String,
    /// Name element inside each subcategory anchor.
    pub subcategory_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListingMarkers {
    /// Path of the streaming listing endpoint.
    pub query_path: String,
    /// Body marker of a redirect/captcha wall.
    pub redirect_marker: String,
    /// Body marker of the automated-traffic notice.
    pub automation_marker: String,
}

impl Default for SiteProfile {
    fn default() -> Self {
        Self {
            root_url: "https://www.amazon.com".to_string(),
            home_path: "/ref=nav_bb_logo".to_string(),
            postcodes: vec!["99501".to_string()],
            location: LocationSelectors::default(),
            search: SearchSelectors::default(),
            listing: ListingMarkers::default(),
        }
    }
}

impl Default for LocationSelectors {
    fn default() -> Self {
        Self {
            popover_link: "#nav-global-location-popover-link".to_string(),
            postcode_input: "#GLUXZipUpdateInput".to_string(),
            apply_button: "#GLUXZipUpdate input[type='submit']".to_string(),
            close_button: ".a-popover-footer .a-button-input".to_string(),
            invalid_postcode: "span#GLUXZipError[style*=\"display: inline;\"]".to_string(),
            invalid_postcode_message: "Please enter a valid US zip code".to_string(),
        }
    }
}

impl Default for SearchSelectors {
    fn default() -> Self {
        Self {
            scope_dropdown: "#searchDropdownBox".to_string(),
            search_box: "#twotabsearchtextbox".to_string(),
            subcategory_links:
                ".a-spacing-micro.s-navigation-indent-2 a.a-link-normal.s-navigation-item"
                    .to_string(),
            subcategory_name: "span.a-size-base.a-color-base".to_string(),
        }
    }
}

impl Default for ListingMarkers {
    fn default() -> Self {
        Self {
            query_path: "/s/query".to_string(),
            redirect_marker: "data-redirect".to_string(),
            automation_marker: "To discuss automated access".to_string(),
        }
    }
}

impl SiteProfile {
    /// Load a profile from a JSON file; missing fields take defaults.
    pub fn from_file(path: &Path) -> Result<Self, AppError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            AppError::ConfigError(format!("Failed to read site profile {}: {e}", path.display()))
        })?;
        let profile: SiteProfile = serde_json::from_str(&raw)?;
        profile.validate()?;
        Ok(profile)
    }

    /// `KESTREL_SITE_PROFILE` when set, defaults otherwise.
    pub fn from_env() -> Result<Self, AppError> {
        match std::env::var("KESTREL_SITE_PROFILE") {
            Ok(path) => Self::from_file(Path::new(&path)),
            Err(_) => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if url::Url::parse(&self.root_url).is_err() {
            return Err(AppError::ConfigError(format!(
                "Site profile root_url '{}' is not a valid URL",
                self.root_url
            )));
        }
        if self.postcodes.is_empty() {
            return Err(AppError::ConfigError(
                "Site profile must list at least one postcode".into(),
            ));
        }
        Ok(())
    }

    pub fn home_url(&self) -> String {
        format!("{}{}", self.root_url.trim_end_matches('/'), self.home_path)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn partial_profile_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"root_url": "https://shop.example", "postcodes": ["10001", "94105"], "listing": {{"redirect_marker": "captcha"}}}}"#
        )
        .unwrap();

        let profile = SiteProfile::from_file(file.path()).unwrap();
        assert_eq!(profile.root_url, "https://shop.example");
        assert_eq!(profile.postcodes.len(), 2);
        assert_eq!(profile.listing.redirect_marker, "captcha");
        assert_eq!(profile.listing.query_path, "/s/query");
        assert_eq!(profile.home_url(), "https://shop.example/ref=nav_bb_logo");
    }

    #[test]
    fn profile_file_overrides_nested_selectors() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r##"{{"location": {{"popover_link": "#where"}}, "search": {{"search_box": "input[name=q]"}}}}"##
        )
        .unwrap();

        let profile = SiteProfile::from_file(file.path()).unwrap();
        let reference = SiteProfile::default();
        assert_eq!(profile.location.popover_link, "#where");
        assert_eq!(profile.location.postcode_input, reference.location.postcode_input);
        assert_eq!(profile.search.search_box, "input[name=q]");
        assert_eq!(profile.search.scope_dropdown, reference.search.scope_dropdown);
        assert_eq!(profile.root_url, reference.root_url);
    }

    #[test]
    fn profile_without_postcodes_is_rejected() {
        let profile = SiteProfile {
            postcodes: vec![],
            ..SiteProfile::default()
        };
        assert!(matches!(profile.validate(), Err(AppError::ConfigError(_))));
    }
}
