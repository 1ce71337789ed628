use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::cdp::browser_protocol::target::{
    BrowserContextId, CreateBrowserContextParams, CreateTargetParams, DisposeBrowserContextParams,
};
use chromiumoxide::element::Element;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use kestrel_core::driver::{BrowserDriver, BrowserSession};
use kestrel_core::error::AppError;
use kestrel_core::models::{BrowserEngine, Cookie};

use crate::driver::DriverConfig;

const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Chromium driven over the Chrome DevTools Protocol.
///
/// A single Chromium process is shared across all clones; every
/// [`BrowserDriver::open`] creates a fresh incognito browser context, so
/// sessions never share cookies.
#[derive(Clone)]
pub struct ChromiumDriver {
    browser: Arc<Browser>,
}

impl ChromiumDriver {
    pub async fn launch(config: &DriverConfig) -> Result<Self, AppError> {
        let mut builder = BrowserConfig::builder();
        builder = builder.no_sandbox().disable_default_args();

        if let Some(bin) = config.chrome_bin.clone().or_else(find_chrome_binary) {
            tracing::info!("Using Chrome binary: {}", bin.display());
            builder = builder.chrome_executable(bin);
        }
        if config.headless {
            builder = builder.arg("--headless=new");
        } else {
            builder = builder.with_head();
        }

        let browser_config = builder
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--disable-popup-blocking")
            .arg("--disable-translate")
            .arg("--no-first-run")
            .window_size(1366, 900)
            .build()
            .map_err(|e| AppError::BrowserError(format!("Browser config error: {e}")))?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| AppError::BrowserError(format!("Failed to launch browser: {e}")))?;

        // The CDP handler must be polled continuously for the connection to work.
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    tracing::warn!("Browser CDP handler error: {event:?}");
                    break;
                }
            }
        });

        Ok(Self {
            browser: Arc::new(browser),
        })
    }
}

/// Locate the real Chrome/Chromium binary.
///
/// The snap wrapper at `/snap/bin/chromium` strips unknown CLI flags and
/// breaks headless mode, so the binary inside the snap is tried first.
/// `None` lets `chromiumoxide` do its own lookup.
fn find_chrome_binary() -> Option<PathBuf> {
    let candidates: &[&str] = &[
        "/snap/chromium/current/usr/lib/chromium-browser/chrome",
        "/var/lib/flatpak/exports/bin/org.chromium.Chromium",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/google-chrome",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
    ];
    candidates.iter().map(PathBuf::from).find(|p| p.exists())
}

impl BrowserDriver for ChromiumDriver {
    type Session = ChromiumSession;

    fn supports(&self, engine: BrowserEngine) -> bool {
        engine == BrowserEngine::Chromium
    }

    async fn open(&self, engine: BrowserEngine) -> Result<ChromiumSession, AppError> {
        if !self.supports(engine) {
            return Err(AppError::BrowserError(format!(
                "Engine {engine} is not available in the Chromium driver"
            )));
        }

        let context = self
            .browser
            .execute(CreateBrowserContextParams::default())
            .await
            .map_err(|e| AppError::BrowserError(format!("Failed to create browser context: {e}")))?
            .result
            .browser_context_id;

        let target = CreateTargetParams::builder()
            .url("about:blank")
            .browser_context_id(context.clone())
            .build()
            .map_err(AppError::BrowserError)?;
        let page = self
            .browser
            .new_page(target)
            .await
            .map_err(|e| AppError::BrowserError(format!("Failed to open page: {e}")))?;

        Ok(ChromiumSession {
            browser: self.browser.clone(),
            context,
            page,
        })
    }
}

pub struct ChromiumSession {
    browser: Arc<Browser>,
    context: BrowserContextId,
    page: Page,
}

fn browser_error(action: &str) -> impl Fn(chromiumoxide::error::CdpError) -> AppError + '_ {
    move |e| AppError::BrowserError(format!("{action}: {e}"))
}

fn js_string(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

impl ChromiumSession {
    /// Poll for `selector` until it matches or `timeout` elapses.
    async fn wait_for(&self, selector: &str, timeout: Duration) -> Result<Element, AppError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Ok(element) = self.page.find_element(selector).await {
                return Ok(element);
            }
            if tokio::time::Instant::now() >= deadline {
                tracing::debug!(selector, "Selector wait timed out");
                return Err(AppError::Timeout(timeout.as_secs()));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

impl BrowserSession for ChromiumSession {
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<(), AppError> {
        match tokio::time::timeout(timeout, self.page.goto(url)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(AppError::BrowserError(format!("Failed to navigate to {url}: {e}"))),
            Err(_) => Err(AppError::Timeout(timeout.as_secs())),
        }
    }

    async fn text(&self, selector: &str, timeout: Duration) -> Result<String, AppError> {
        let element = self.wait_for(selector, timeout).await?;
        let text = element
            .inner_text()
            .await
            .map_err(browser_error("Failed to read element text"))?;
        Ok(text.unwrap_or_default())
    }

    async fn exists(&self, selector: &str) -> Result<bool, AppError> {
        Ok(self.page.find_element(selector).await.is_ok())
    }

    async fn fill(&self, selector: &str, value: &str, timeout: Duration) -> Result<(), AppError> {
        let element = self.wait_for(selector, timeout).await?;
        element
            .call_js_fn("function() { this.value = ''; }", false)
            .await
            .map_err(browser_error("Failed to clear input"))?;
        element
            .click()
            .await
            .map_err(browser_error("Failed to focus input"))?;
        element
            .type_str(value)
            .await
            .map_err(browser_error("Failed to type into input"))?;
        Ok(())
    }

    async fn click(&self, selector: &str, timeout: Duration) -> Result<(), AppError> {
        let element = self.wait_for(selector, timeout).await?;
        element
            .click()
            .await
            .map_err(browser_error("Failed to click"))?;
        Ok(())
    }

    async fn press_enter(&self, selector: &str, timeout: Duration) -> Result<(), AppError> {
        let element = self.wait_for(selector, timeout).await?;
        element
            .press_key("Enter")
            .await
            .map_err(browser_error("Failed to press Enter"))?;
        Ok(())
    }

    async fn option_labels(&self, selector: &str, timeout: Duration) -> Result<Vec<String>, AppError> {
        self.wait_for(selector, timeout).await?;
        let script = format!(
            "Array.from(document.querySelector({}).options).map(o => o.textContent.trim())",
            js_string(selector)
        );
        self.page
            .evaluate(script)
            .await
            .map_err(browser_error("Failed to list options"))?
            .into_value::<Vec<String>>()
            .map_err(|e| AppError::BrowserError(format!("Unexpected option list: {e}")))
    }

    async fn select_option(&self, selector: &str, label: &str, timeout: Duration) -> Result<(), AppError> {
        self.wait_for(selector, timeout).await?;
        let script = format!(
            r#"(() => {{
                const select = document.querySelector({sel});
                const option = Array.from(select.options).find(o => o.textContent.trim() === {label});
                if (!option) return false;
                select.value = option.value;
                select.dispatchEvent(new Event('change', {{ bubbles: true }}));
                return true;
            }})()"#,
            sel = js_string(selector),
            label = js_string(label),
        );
        let selected = self
            .page
            .evaluate(script)
            .await
            .map_err(browser_error("Failed to select option"))?
            .into_value::<bool>()
            .map_err(|e| AppError::BrowserError(format!("Unexpected select result: {e}")))?;
        if selected {
            Ok(())
        } else {
            Err(AppError::InvalidInput(format!("No option labelled '{label}'")))
        }
    }

    async fn content(&self) -> Result<String, AppError> {
        self.page
            .content()
            .await
            .map_err(browser_error("Failed to read page content"))
    }

    async fn current_url(&self) -> Result<String, AppError> {
        Ok(self
            .page
            .url()
            .await
            .map_err(browser_error("Failed to read page URL"))?
            .unwrap_or_default())
    }

    async fn cookies(&self) -> Result<Vec<Cookie>, AppError> {
        let cookies = self
            .page
            .get_cookies()
            .await
            .map_err(browser_error("Failed to read cookies"))?;
        Ok(cookies
            .into_iter()
            .map(|c| Cookie {
                name: c.name,
                value: c.value,
                domain: c.domain,
                path: c.path,
                expires: c.expires,
                http_only: c.http_only,
                secure: c.secure,
                same_site: c.same_site.map(|s| format!("{s:?}")),
            })
            .collect())
    }

    async fn close(self) -> Result<(), AppError> {
        self.page
            .close()
            .await
            .map_err(browser_error("Failed to close page"))?;
        self.browser
            .execute(DisposeBrowserContextParams::new(self.context))
            .await
            .map_err(browser_error("Failed to dispose browser context"))?;
        Ok(())
    }
}
