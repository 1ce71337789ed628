pub mod acquire;
pub mod category;
pub mod config;
pub mod deque;
pub mod driver;
pub mod error;
pub mod explorer;
pub mod identity;
pub mod listing;
pub mod lock;
pub mod maintenance;
pub mod models;
pub mod pool;
pub mod proxy;
pub mod retry;
pub mod scheduler;
pub mod sink;
pub mod walker;

#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

pub use acquire::{AcquiredIdentity, DriverIdentityProvider, IdentityProvider};
pub use category::{CategoryGraph, CategoryStore, MemoryCategoryStore};
pub use driver::{BrowserDriver, BrowserSession, SiteProfile};
pub use error::AppError;
pub use explorer::{CategoryExplorer, CategoryNode, CategorySource, ExplorerConfig};
pub use identity::IdentityPool;
pub use lock::{CriticalSection, SharedLock};
pub use maintenance::PoolMaintainer;
pub use models::{
    BrowserEngine, Category, Cookie, IdentityPolicy, IdentitySet, NewCategory, ProxyPartition,
    ProxyRecord, ProxyType,
};
pub use pool::{BoundedPool, MemoryBackend, PoolBackend};
pub use proxy::{MemoryProxyStore, ProxyPool, ProxyStore};
pub use scheduler::{MaintenanceHandler, Scheduler, SchedulerConfig};
pub use sink::JsonFileSink;
pub use walker::{ListingFetcher, PageSink, ProductWalker, SessionSource, WalkerConfig};
