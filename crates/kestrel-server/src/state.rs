use std::sync::Arc;

use kestrel_client::HeadlessDriver;
use kestrel_core::acquire::DriverIdentityProvider;
use kestrel_core::category::CategoryGraph;
use kestrel_core::config::PoolConfig;
use kestrel_core::error::AppError;
use kestrel_core::identity::IdentityPool;
use kestrel_core::lock::SharedLock;
use kestrel_core::maintenance::PoolMaintainer;
use kestrel_core::models::BrowserEngine;
use kestrel_core::proxy::ProxyPool;
use kestrel_core::scheduler::{Scheduler, SchedulerConfig};
use kestrel_db::{CategoryBackend, Database, IdentityBackend, ProxyBackend, build_identity_pool};

pub type Provider = DriverIdentityProvider<HeadlessDriver>;
pub type Maintainer = PoolMaintainer<IdentityBackend, Provider>;

/// Shared application state, available to all route handlers via `State<Arc<AppState>>`.
pub struct AppState {
    pub database: Option<Database>,
    pub identities: IdentityPool<IdentityBackend>,
    pub proxies: ProxyPool<ProxyBackend>,
    pub categories: CategoryGraph<CategoryBackend>,
    pub provider: Provider,
    pub scheduler: Arc<Scheduler<Maintainer>>,
    /// Engine used when a request does not name one.
    pub default_engine: BrowserEngine,
    /// Admin token for protecting write endpoints (None = admin endpoints disabled).
    pub admin_token: Option<String>,
}

impl AppState {
    /// Build every pool from configuration. Proxies and categories live in
    /// PostgreSQL whenever a database is given.
    pub fn new(
        database: Option<Database>,
        pools: &PoolConfig,
        scheduler: SchedulerConfig,
        provider: Provider,
        admin_token: Option<String>,
    ) -> Result<Self, AppError> {
        let identities = build_identity_pool(pools, database.as_ref(), SharedLock::new())?;
        if !identities.is_initialized() {
            return Err(AppError::ConfigError(
                "No identity partitions configured".to_string(),
            ));
        }
        let proxies = ProxyPool::new(ProxyBackend::new(database.as_ref()));
        let categories = CategoryGraph::new(CategoryBackend::new(database.as_ref()));

        let maintainer = PoolMaintainer::new(identities.clone(), provider.clone());
        let scheduler = Arc::new(Scheduler::new(maintainer, scheduler));

        let default_engine = if pools.engines.contains(&pools.default_engine) {
            pools.default_engine
        } else {
            identities.partitions().first().copied().unwrap_or(pools.default_engine)
        };

        Ok(Self {
            database,
            identities,
            proxies,
            categories,
            provider,
            scheduler,
            default_engine,
            admin_token,
        })
    }
}
