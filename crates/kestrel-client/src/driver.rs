//! Browser driver selection.
//!
//! [`HeadlessDriver`] is the concrete driver binaries hold. Without the
//! `browser` feature it still exists but every `open` fails, so callers
//! compile the same way in both builds.

use std::convert::Infallible;
use std::path::PathBuf;
use std::time::Duration;

use kestrel_core::driver::{BrowserDriver, BrowserSession};
use kestrel_core::error::AppError;
use kestrel_core::models::{BrowserEngine, Cookie};

#[cfg(feature = "browser")]
use crate::chromium::{ChromiumDriver, ChromiumSession};

/// Browser launch options.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub headless: bool,
    pub chrome_bin: Option<PathBuf>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            headless: true,
            chrome_bin: None,
        }
    }
}

impl DriverConfig {
    /// Read configuration from environment variables.
    ///
    /// - `KESTREL_HEADLESS` (`true` | `false`, defaults to `true`)
    /// - `CHROME_BIN` (optional explicit browser binary)
    pub fn from_env() -> Result<Self, AppError> {
        let headless = match std::env::var("KESTREL_HEADLESS") {
            Err(_) => true,
            Ok(raw) => match raw.trim().to_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" => false,
                _ => {
                    return Err(AppError::ConfigError(format!(
                        "Invalid KESTREL_HEADLESS '{raw}': expected true or false"
                    )));
                }
            },
        };
        let chrome_bin = std::env::var("CHROME_BIN")
            .ok()
            .map(PathBuf::from)
            .filter(|p| p.exists());
        Ok(Self {
            headless,
            chrome_bin,
        })
    }
}

#[derive(Clone)]
pub enum HeadlessDriver {
    #[cfg(feature = "browser")]
    Chromium(ChromiumDriver),
    Unavailable,
}

impl HeadlessDriver {
    /// Launch the browser this build supports.
    pub async fn launch(config: &DriverConfig) -> Result<Self, AppError> {
        #[cfg(feature = "browser")]
        {
            Ok(HeadlessDriver::Chromium(ChromiumDriver::launch(config).await?))
        }
        #[cfg(not(feature = "browser"))]
        {
            let _ = config;
            tracing::warn!("Built without the `browser` feature; identity acquisition is disabled");
            Ok(HeadlessDriver::Unavailable)
        }
    }
}

impl BrowserDriver for HeadlessDriver {
    type Session = HeadlessSession;

    async fn open(&self, engine: BrowserEngine) -> Result<HeadlessSession, AppError> {
        match self {
            #[cfg(feature = "browser")]
            HeadlessDriver::Chromium(driver) => Ok(HeadlessSession::Chromium(driver.open(engine).await?)),
            HeadlessDriver::Unavailable => Err(AppError::BrowserError(format!(
                "No browser available for {engine}: built without the `browser` feature"
            ))),
        }
    }

    fn supports(&self, engine: BrowserEngine) -> bool {
        match self {
            #[cfg(feature = "browser")]
            HeadlessDriver::Chromium(driver) => driver.supports(engine),
            HeadlessDriver::Unavailable => {
                let _ = engine;
                false
            }
        }
    }
}

pub enum HeadlessSession {
    #[cfg(feature = "browser")]
    Chromium(ChromiumSession),
    Unavailable(Infallible),
}

macro_rules! delegate {
    ($self:ident, $session:ident => $call:expr) => {
        match $self {
            #[cfg(feature = "browser")]
            HeadlessSession::Chromium($session) => $call,
            HeadlessSession::Unavailable(never) => match *never {},
        }
    };
}

impl BrowserSession for HeadlessSession {
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<(), AppError> {
        delegate!(self, s => s.navigate(url, timeout).await)
    }

    async fn text(&self, selector: &str, timeout: Duration) -> Result<String, AppError> {
        delegate!(self, s => s.text(selector, timeout).await)
    }

    async fn exists(&self, selector: &str) -> Result<bool, AppError> {
        delegate!(self, s => s.exists(selector).await)
    }

    async fn fill(&self, selector: &str, value: &str, timeout: Duration) -> Result<(), AppError> {
        delegate!(self, s => s.fill(selector, value, timeout).await)
    }

    async fn click(&self, selector: &str, timeout: Duration) -> Result<(), AppError> {
        delegate!(self, s => s.click(selector, timeout).await)
    }

    async fn press_enter(&self, selector: &str, timeout: Duration) -> Result<(), AppError> {
        delegate!(self, s => s.press_enter(selector, timeout).await)
    }

    async fn option_labels(&self, selector: &str, timeout: Duration) -> Result<Vec<String>, AppError> {
        delegate!(self, s => s.option_labels(selector, timeout).await)
    }

    async fn select_option(&self, selector: &str, label: &str, timeout: Duration) -> Result<(), AppError> {
        delegate!(self, s => s.select_option(selector, label, timeout).await)
    }

    async fn content(&self) -> Result<String, AppError> {
        delegate!(self, s => s.content().await)
    }

    async fn current_url(&self) -> Result<String, AppError> {
        delegate!(self, s => s.current_url().await)
    }

    async fn cookies(&self) -> Result<Vec<Cookie>, AppError> {
        delegate!(self, s => s.cookies().await)
    }

    async fn close(self) -> Result<(), AppError> {
        match self {
            #[cfg(feature = "browser")]
            HeadlessSession::Chromium(s) => s.close().await,
            HeadlessSession::Unavailable(never) => match never {},
        }
    }
}
