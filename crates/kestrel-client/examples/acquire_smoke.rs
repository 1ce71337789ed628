/// Smoke-test for `ChromiumDriver`.
///
/// Launches Chromium, sets the delivery location to the first postcode of
/// the site profile, and prints the identity that came back.
///
/// Run with:
///   cargo run --example acquire_smoke --features browser
use std::sync::Arc;

use kestrel_client::{ChromiumDriver, DriverConfig};
use kestrel_core::acquire::{DriverIdentityProvider, IdentityProvider};
use kestrel_core::driver::SiteProfile;
use kestrel_core::models::BrowserEngine;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let profile = Arc::new(SiteProfile::from_env()?);
    println!("Launching browser...");
    let driver = ChromiumDriver::launch(&DriverConfig::from_env()?).await?;
    let provider = DriverIdentityProvider::new(driver, profile);

    let identity = provider.acquire(BrowserEngine::Chromium, None).await?;
    assert!(!identity.cookies.is_empty(), "No cookies received");

    println!(
        "OK: {} cookies for '{}' ({})",
        identity.cookies.len(),
        identity.location,
        identity.postcode
    );
    Ok(())
}
