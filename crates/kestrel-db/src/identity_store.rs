use chrono::{DateTime, Utc};
use sqlx::{PgPool, Pool, Postgres};
use uuid::Uuid;

use kestrel_core::error::AppError;
use kestrel_core::models::{BrowserEngine, Cookie, IdentitySet};
use kestrel_core::pool::PoolBackend;

/// PostgreSQL storage for one identity partition (`cookie_sets` rows of a
/// single `browser_type`).
///
/// Inserts serialize on a per-partition advisory lock so the capacity check
/// and the insert are atomic. Checkouts lock the selected row with
/// `FOR UPDATE SKIP LOCKED`, so concurrent callers never receive the same
/// set twice.
#[derive(Debug, Clone)]
pub struct PgIdentityStore {
    pool: Pool<Postgres>,
    engine: BrowserEngine,
    max_size: usize,
}

impl PgIdentityStore {
    pub fn new(pool: PgPool, engine: BrowserEngine, max_size: usize) -> Self {
        Self {
            pool,
            engine,
            max_size,
        }
    }

    pub fn engine(&self) -> BrowserEngine {
        self.engine
    }
}

// -- Internal row type for sqlx deserialization --

#[derive(sqlx::FromRow)]
struct CookieSetRow {
    id: Uuid,
    browser_type: String,
    postcode: String,
    location: String,
    cookies: serde_json::Value,
    expires: DateTime<Utc>,
    usable_times: i32,
    last_used: Option<DateTime<Utc>>,
}

impl CookieSetRow {
    fn into_identity(self, fallback: BrowserEngine) -> Result<IdentitySet, AppError> {
        let cookies: Vec<Cookie> = serde_json::from_value(self.cookies)?;
        Ok(IdentitySet {
            id: self.id,
            engine: self.browser_type.parse().unwrap_or(fallback),
            postcode: self.postcode,
            location: self.location,
            cookies,
            expires_at: self.expires,
            usable_times: self.usable_times.max(0) as u32,
            last_used: self.last_used,
        })
    }
}

const SWEEP: &str = r#"
    DELETE FROM cookie_sets
    WHERE browser_type = $1 AND (expires <= NOW() OR usable_times <= 0)
"#;

impl PoolBackend<IdentitySet> for PgIdentityStore {
    async fn insert(&self, item: IdentitySet) -> Result<bool, AppError> {
        let cookies = serde_json::to_value(&item.cookies)?;
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        sqlx::query("SELECT pg_advisory_xact_lock(hashtext('cookie_sets:' || $1))")
            .bind(self.engine.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM cookie_sets WHERE browser_type = $1")
                .bind(self.engine.as_str())
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        if count as usize >= self.max_size {
            tx.rollback()
                .await
                .map_err(|e| AppError::DatabaseError(e.to_string()))?;
            return Ok(false);
        }

        sqlx::query(
            r#"
            INSERT INTO cookie_sets
                (id, browser_type, postcode, location, cookies, expires, usable_times, last_used)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(item.id)
        .bind(self.engine.as_str())
        .bind(&item.postcode)
        .bind(&item.location)
        .bind(cookies)
        .bind(item.expires_at)
        .bind(item.usable_times as i32)
        .bind(item.last_used)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;
        Ok(true)
    }

    async fn take(&self) -> Result<Option<IdentitySet>, AppError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        sqlx::query(SWEEP)
            .bind(self.engine.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        let row = sqlx::query_as::<_, CookieSetRow>(
            r#"
            UPDATE cookie_sets
            SET usable_times = usable_times - 1, last_used = NOW()
            WHERE id = (
                SELECT id FROM cookie_sets
                WHERE browser_type = $1 AND expires > NOW() AND usable_times > 0
                ORDER BY expires ASC, last_used DESC
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING id, browser_type, postcode, location, cookies, expires, usable_times, last_used
            "#,
        )
        .bind(self.engine.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        row.map(|r| r.into_identity(self.engine)).transpose()
    }

    async fn sweep(&self) -> Result<u64, AppError> {
        let result = sqlx::query(SWEEP)
            .bind(self.engine.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;
        Ok(result.rows_affected())
    }

    async fn current_size(&self) -> Result<usize, AppError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM cookie_sets WHERE browser_type = $1")
                .bind(self.engine.as_str())
                .fetch_one(&self.pool)
                .await
                .map_err(|e| AppError::DatabaseError(e.to_string()))?;
        Ok(count as usize)
    }

    fn max_size(&self) -> usize {
        self.max_size
    }
}
