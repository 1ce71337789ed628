pub mod category_source;
pub mod driver;
pub mod fetcher;
pub mod remote;

#[cfg(feature = "browser")]
pub mod chromium;

pub use category_source::DriverCategorySource;
pub use driver::{DriverConfig, HeadlessDriver, HeadlessSession};
pub use fetcher::ReqwestListingFetcher;
pub use remote::ApiSessionSource;

#[cfg(feature = "browser")]
pub use chromium::{ChromiumDriver, ChromiumSession};
