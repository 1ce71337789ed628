//! Configuration-selected storage: the in-process stores from `kestrel-core`
//! or their PostgreSQL counterparts, behind the same traits.

use kestrel_core::category::{CategoryStore, MemoryCategoryStore};
use kestrel_core::config::{PoolBackendKind, PoolConfig};
use kestrel_core::error::AppError;
use kestrel_core::identity::IdentityPool;
use kestrel_core::lock::SharedLock;
use kestrel_core::models::{Category, IdentitySet, NewCategory, ProxyPartition, ProxyRecord, ProxyType};
use kestrel_core::pool::{MemoryBackend, PoolBackend};
use kestrel_core::proxy::{MemoryProxyStore, ProxyStore};

use crate::category_store::PgCategoryStore;
use crate::database::Database;
use crate::identity_store::PgIdentityStore;
use crate::proxy_store::PgProxyStore;

#[derive(Debug, Clone)]
pub enum IdentityBackend {
    Memory(MemoryBackend<IdentitySet>),
    Postgres(PgIdentityStore),
}

impl PoolBackend<IdentitySet> for IdentityBackend {
    async fn insert(&self, item: IdentitySet) -> Result<bool, AppError> {
        match self {
            IdentityBackend::Memory(b) => b.insert(item).await,
            IdentityBackend::Postgres(b) => b.insert(item).await,
        }
    }

    async fn take(&self) -> Result<Option<IdentitySet>, AppError> {
        match self {
            IdentityBackend::Memory(b) => b.take().await,
            IdentityBackend::Postgres(b) => b.take().await,
        }
    }

    async fn sweep(&self) -> Result<u64, AppError> {
        match self {
            IdentityBackend::Memory(b) => b.sweep().await,
            IdentityBackend::Postgres(b) => b.sweep().await,
        }
    }

    async fn current_size(&self) -> Result<usize, AppError> {
        match self {
            IdentityBackend::Memory(b) => b.current_size().await,
            IdentityBackend::Postgres(b) => b.current_size().await,
        }
    }

    fn max_size(&self) -> usize {
        match self {
            IdentityBackend::Memory(b) => b.max_size(),
            IdentityBackend::Postgres(b) => b.max_size(),
        }
    }
}

/// Build the identity pool `config` describes, one partition per engine.
///
/// The PostgreSQL backend needs a connected `database`.
pub fn build_identity_pool(
    config: &PoolConfig,
    database: Option<&Database>,
    lock: SharedLock,
) -> Result<IdentityPool<IdentityBackend>, AppError> {
    let mut pool = IdentityPool::new(config.policy, lock);
    for &engine in &config.engines {
        let backend = match config.backend {
            PoolBackendKind::Memory => IdentityBackend::Memory(MemoryBackend::new(config.max_size)),
            PoolBackendKind::Postgres => {
                let db = database.ok_or_else(|| {
                    AppError::ConfigError(
                        "KESTREL_POOL_BACKEND=postgres requires DATABASE_URL".into(),
                    )
                })?;
                IdentityBackend::Postgres(db.identity_store(engine, config.max_size))
            }
        };
        pool = pool.with_partition(engine, backend);
    }
    Ok(pool)
}

#[derive(Debug, Clone)]
pub enum ProxyBackend {
    Memory(MemoryProxyStore),
    Postgres(PgProxyStore),
}

impl ProxyBackend {
    pub fn new(database: Option<&Database>) -> Self {
        match database {
            Some(db) => ProxyBackend::Postgres(db.proxy_store()),
            None => ProxyBackend::Memory(MemoryProxyStore::new()),
        }
    }
}

impl ProxyStore for ProxyBackend {
    async fn replace(&self, partition: &ProxyPartition, contents: &[String]) -> Result<u64, AppError> {
        match self {
            ProxyBackend::Memory(s) => s.replace(partition, contents).await,
            ProxyBackend::Postgres(s) => s.replace(partition, contents).await,
        }
    }

    async fn rotate(&self, partition: &ProxyPartition) -> Result<Option<ProxyRecord>, AppError> {
        match self {
            ProxyBackend::Memory(s) => s.rotate(partition).await,
            ProxyBackend::Postgres(s) => s.rotate(partition).await,
        }
    }

    async fn count(&self, partition: &ProxyPartition) -> Result<u64, AppError> {
        match self {
            ProxyBackend::Memory(s) => s.count(partition).await,
            ProxyBackend::Postgres(s) => s.count(partition).await,
        }
    }

    async fn tags(&self, proxy_type: ProxyType) -> Result<Vec<String>, AppError> {
        match self {
            ProxyBackend::Memory(s) => s.tags(proxy_type).await,
            ProxyBackend::Postgres(s) => s.tags(proxy_type).await,
        }
    }
}

#[derive(Debug, Clone)]
pub enum CategoryBackend {
    Memory(MemoryCategoryStore),
    Postgres(PgCategoryStore),
}

impl CategoryBackend {
    pub fn new(database: Option<&Database>) -> Self {
        match database {
            Some(db) => CategoryBackend::Postgres(db.category_store()),
            None => CategoryBackend::Memory(MemoryCategoryStore::new()),
        }
    }
}

impl CategoryStore for CategoryBackend {
    async fn replace(&self, categories: &[NewCategory]) -> Result<u64, AppError> {
        match self {
            CategoryBackend::Memory(s) => s.replace(categories).await,
            CategoryBackend::Postgres(s) => s.replace(categories).await,
        }
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<Category>, AppError> {
        match self {
            CategoryBackend::Memory(s) => s.get_by_name(name).await,
            CategoryBackend::Postgres(s) => s.get_by_name(name).await,
        }
    }

    async fn get_by_depth(&self, depth: i32, strict: bool) -> Result<Vec<Category>, AppError> {
        match self {
            CategoryBackend::Memory(s) => s.get_by_depth(depth, strict).await,
            CategoryBackend::Postgres(s) => s.get_by_depth(depth, strict).await,
        }
    }

    async fn get_by_ancestor(&self, ancestor: &str) -> Result<Vec<Category>, AppError> {
        match self {
            CategoryBackend::Memory(s) => s.get_by_ancestor(ancestor).await,
            CategoryBackend::Postgres(s) => s.get_by_ancestor(ancestor).await,
        }
    }

    async fn get_by_parent(&self, parent: &str) -> Result<Vec<Category>, AppError> {
        match self {
            CategoryBackend::Memory(s) => s.get_by_parent(parent).await,
            CategoryBackend::Postgres(s) => s.get_by_parent(parent).await,
        }
    }

    async fn get_by_leaf(&self, is_leaf: bool) -> Result<Vec<Category>, AppError> {
        match self {
            CategoryBackend::Memory(s) => s.get_by_leaf(is_leaf).await,
            CategoryBackend::Postgres(s) => s.get_by_leaf(is_leaf).await,
        }
    }

    async fn get_by_ancestors_and_depth(
        &self,
        ancestors: &[String],
        depth: i32,
    ) -> Result<Vec<Category>, AppError> {
        match self {
            CategoryBackend::Memory(s) => s.get_by_ancestors_and_depth(ancestors, depth).await,
            CategoryBackend::Postgres(s) => s.get_by_ancestors_and_depth(ancestors, depth).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_core::models::BrowserEngine;

    #[test]
    fn memory_pool_has_one_partition_per_engine() {
        let config = PoolConfig {
            engines: vec![BrowserEngine::Firefox, BrowserEngine::Chromium],
            max_size: 7,
            ..PoolConfig::default()
        };
        let pool = build_identity_pool(&config, None, SharedLock::new()).unwrap();
        assert_eq!(pool.partitions(), vec![BrowserEngine::Firefox, BrowserEngine::Chromium]);
        assert_eq!(pool.max_pool_size(BrowserEngine::Firefox), 7);
    }

    #[tokio::test]
    async fn default_pool_declares_firefox_with_nothing_in_it() {
        let pool = build_identity_pool(&PoolConfig::default(), None, SharedLock::new()).unwrap();
        assert!(pool.partitions().contains(&BrowserEngine::Firefox));
        assert_eq!(pool.pool_size(BrowserEngine::Firefox).await, 0);
        assert_eq!(pool.max_pool_size(BrowserEngine::Firefox), 20);
        assert_eq!(pool.is_empty(BrowserEngine::Firefox).await, Some(true));
    }

    #[test]
    fn postgres_pool_without_database_is_a_config_error() {
        let config = PoolConfig {
            backend: PoolBackendKind::Postgres,
            ..PoolConfig::default()
        };
        let err = build_identity_pool(&config, None, SharedLock::new()).unwrap_err();
        assert!(matches!(err, AppError::ConfigError(_)));
    }

    #[tokio::test]
    async fn memory_proxy_backend_delegates() {
        let backend = ProxyBackend::new(None);
        let partition = ProxyPartition::default();
        let n = backend
            .replace(&partition, &["h:1:u:p".to_string(), "h:2:u:p".to_string()])
            .await
            .unwrap();
        assert_eq!(n, 2);
        assert_eq!(backend.count(&partition).await.unwrap(), 2);
    }
}
