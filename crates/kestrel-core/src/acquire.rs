//! Browser-driven identity acquisition.
//!
//! Opens a fresh session, sets the delivery location to a postcode, and
//! harvests the cookies the site issued. Every step runs under a jittered
//! timeout; locating the location widget is retried a bounded number of
//! times.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::driver::{BrowserDriver, BrowserSession, SiteProfile};
use crate::error::AppError;
use crate::models::{BrowserEngine, Cookie};
use crate::retry::{jittered, pick};

/// Cookies and location obtained by one successful acquisition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AcquiredIdentity {
    pub engine: BrowserEngine,
    pub postcode: String,
    pub location: String,
    pub cookies: Vec<Cookie>,
}

/// Produces new identities on demand.
pub trait IdentityProvider: Send + Sync + Clone {
    /// Acquire one identity. `postcode` overrides the profile's choice.
    fn acquire(
        &self,
        engine: BrowserEngine,
        postcode: Option<&str>,
    ) -> impl Future<Output = Result<AcquiredIdentity, AppError>> + Send;

    /// Engines this provider can never acquire for are skipped by fills.
    fn supports(&self, engine: BrowserEngine) -> bool {
        let _ = engine;
        true
    }
}

/// Timing knobs for [`DriverIdentityProvider`].
#[derive(Debug, Clone, Copy)]
pub struct AcquireConfig {
    /// Per-step timeout is drawn uniformly from this range.
    pub step_timeout: (Duration, Duration),
    /// Attempts at loading the landing page and opening the location widget.
    pub locate_attempts: u32,
    /// Consecutive "invalid postcode" observations before giving up.
    pub postcode_checks: u32,
    /// Pause after opening the widget, before typing.
    pub settle_before_input: Duration,
    /// Pause after applying the postcode, before closing the widget.
    pub settle_before_close: Duration,
    /// Pause after reloading, before reading the new location.
    pub settle_after_reload: Duration,
}

impl Default for AcquireConfig {
    fn default() -> Self {
        Self {
            step_timeout: (Duration::from_millis(8000), Duration::from_millis(14000)),
            locate_attempts: 3,
            postcode_checks: 2,
            settle_before_input: Duration::from_millis(400),
            settle_before_close: Duration::from_millis(765),
            settle_after_reload: Duration::from_millis(200),
        }
    }
}

/// [`IdentityProvider`] driving a real browser through a [`SiteProfile`].
#[derive(Debug, Clone)]
pub struct DriverIdentityProvider<D> {
    driver: D,
    profile: Arc<SiteProfile>,
    config: AcquireConfig,
}

impl<D: BrowserDriver> DriverIdentityProvider<D> {
    pub fn new(driver: D, profile: Arc<SiteProfile>) -> Self {
        Self::with_config(driver, profile, AcquireConfig::default())
    }

    pub fn with_config(driver: D, profile: Arc<SiteProfile>, config: AcquireConfig) -> Self {
        Self {
            driver,
            profile,
            config,
        }
    }

    fn step_timeout(&self) -> Duration {
        jittered(self.config.step_timeout.0, self.config.step_timeout.1)
    }

    async fn pause(duration: Duration) {
        if !duration.is_zero() {
            tokio::time::sleep(duration).await;
        }
    }

    /// Load the landing page and open the location widget. Returns the
    /// location text shown before the change.
    async fn open_location_widget(&self, session: &D::Session) -> Result<String, AppError> {
        let selectors = &self.profile.location;
        let home = self.profile.home_url();
        let mut last_err = None;

        for attempt in 1..=self.config.locate_attempts {
            let step = async {
                session.navigate(&home, self.step_timeout()).await?;
                let text = session
                    .text(&selectors.popover_link, self.step_timeout())
                    .await?;
                session
                    .click(&selectors.popover_link, self.step_timeout())
                    .await?;
                Ok::<String, AppError>(text)
            };
            match step.await {
                Ok(text) => return Ok(text),
                Err(e @ AppError::Timeout(_)) => {
                    tracing::info!(
                        attempt,
                        retries_left = self.config.locate_attempts - attempt,
                        "Location widget not ready"
                    );
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(AppError::BrowserError(format!(
            "Unable to locate postcode section: {}",
            last_err.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    /// True when the site keeps rejecting the postcode.
    async fn postcode_rejected(&self, session: &D::Session) -> Result<bool, AppError> {
        let selectors = &self.profile.location;
        let mut strikes = 0;
        for _ in 0..self.config.postcode_checks {
            if !session.exists(&selectors.invalid_postcode).await? {
                return Ok(false);
            }
            let message = match session
                .text(&selectors.invalid_postcode, self.step_timeout())
                .await
            {
                Ok(message) => message,
                Err(AppError::Timeout(_)) => return Ok(false),
                Err(e) => return Err(e),
            };
            if message.trim() != selectors.invalid_postcode_message {
                return Ok(false);
            }
            strikes += 1;
        }
        Ok(strikes >= self.config.postcode_checks && self.config.postcode_checks > 0)
    }

    async fn run(
        &self,
        session: &D::Session,
        engine: BrowserEngine,
        postcode: &str,
    ) -> Result<AcquiredIdentity, AppError> {
        let selectors = &self.profile.location;

        let old_location = self.open_location_widget(session).await?;
        tracing::info!(%postcode, "Opened location widget");

        Self::pause(self.config.settle_before_input).await;
        session
            .fill(&selectors.postcode_input, postcode, self.step_timeout())
            .await?;
        session
            .click(&selectors.apply_button, self.step_timeout())
            .await?;
        tracing::info!(%postcode, "Submitted postcode");

        if self.postcode_rejected(session).await? {
            return Err(AppError::InvalidInput(format!(
                "Invalid postal code: {postcode}"
            )));
        }

        Self::pause(self.config.settle_before_close).await;
        session
            .click(&selectors.close_button, self.step_timeout())
            .await?;
        session
            .navigate(&self.profile.home_url(), self.step_timeout())
            .await?;
        Self::pause(self.config.settle_after_reload).await;

        let new_location = session
            .text(&selectors.popover_link, self.step_timeout())
            .await?;
        if new_location == old_location {
            return Err(AppError::BrowserError(format!(
                "Postcode {postcode} not applied: location unchanged"
            )));
        }

        let cookies = session.cookies().await?;
        Ok(AcquiredIdentity {
            engine,
            postcode: postcode.to_string(),
            location: location_label(&new_location),
            cookies,
        })
    }
}

/// The widget renders "Deliver to\n<location>"; keep the second part.
pub fn location_label(widget_text: &str) -> String {
    match widget_text.split_once('\n') {
        Some((_, rest)) => rest.trim().to_string(),
        None => widget_text.trim().to_string(),
    }
}

impl<D: BrowserDriver> IdentityProvider for DriverIdentityProvider<D> {
    async fn acquire(
        &self,
        engine: BrowserEngine,
        postcode: Option<&str>,
    ) -> Result<AcquiredIdentity, AppError> {
        let postcode = match postcode {
            Some(p) => p.to_string(),
            None => pick(&self.profile.postcodes)
                .cloned()
                .ok_or_else(|| AppError::ConfigError("No postcodes configured".into()))?,
        };

        let session = self.driver.open(engine).await?;
        let result = self.run(&session, engine, &postcode).await;
        if let Err(e) = session.close().await {
            tracing::warn!(error = %e, "Failed to close browser session");
        }
        result
    }

    fn supports(&self, engine: BrowserEngine) -> bool {
        self.driver.supports(engine)
    }
}
