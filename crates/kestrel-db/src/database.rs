use kestrel_core::AppError;
use kestrel_core::models::BrowserEngine;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use crate::category_store::PgCategoryStore;
use crate::config::DatabaseConfig;
use crate::identity_store::PgIdentityStore;
use crate::proxy_store::PgProxyStore;

/// Central database facade: owns the connection pool, runs migrations,
/// and vends store instances.
#[derive(Debug, Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Connect to PostgreSQL with the given configuration.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, AppError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to connect: {e}")))?;

        Ok(Self { pool })
    }

    /// Create a `Database` from an existing pool (useful for testing).
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run all pending migrations.
    pub async fn migrate(&self) -> Result<(), AppError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Migration failed: {e}")))?;
        Ok(())
    }

    /// Identity storage for one engine partition, capped at `max_size` rows.
    pub fn identity_store(&self, engine: BrowserEngine, max_size: usize) -> PgIdentityStore {
        PgIdentityStore::new(self.pool.clone(), engine, max_size)
    }

    pub fn proxy_store(&self) -> PgProxyStore {
        PgProxyStore::new(self.pool.clone())
    }

    pub fn category_store(&self) -> PgCategoryStore {
        PgCategoryStore::new(self.pool.clone())
    }

    /// Check that the database answers a trivial query.
    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;
        Ok(())
    }

    /// Get a reference to the underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
