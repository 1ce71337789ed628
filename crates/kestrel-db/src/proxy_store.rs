use chrono::{DateTime, Utc};
use sqlx::{PgPool, Pool, Postgres};
use uuid::Uuid;

use kestrel_core::error::AppError;
use kestrel_core::models::{ProxyPartition, ProxyRecord, ProxyType};
use kestrel_core::proxy::{ProxyStore, validate_contents};

/// PostgreSQL-backed proxy table, one partition per `(tag, provider, proxy_type)`.
#[derive(Debug, Clone)]
pub struct PgProxyStore {
    pool: Pool<Postgres>,
}

impl PgProxyStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct ProxyRow {
    id: Uuid,
    tag: String,
    provider: String,
    proxy_type: String,
    content: String,
    last_used: Option<DateTime<Utc>>,
}

impl From<ProxyRow> for ProxyRecord {
    fn from(row: ProxyRow) -> Self {
        ProxyRecord {
            id: row.id,
            tag: row.tag,
            provider: row.provider,
            proxy_type: row.proxy_type.parse().unwrap_or_default(),
            content: row.content,
            last_used: row.last_used,
        }
    }
}

impl ProxyStore for PgProxyStore {
    async fn replace(&self, partition: &ProxyPartition, contents: &[String]) -> Result<u64, AppError> {
        validate_contents(contents)?;
        let contents: Vec<String> = contents.iter().map(|c| c.trim().to_string()).collect();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        sqlx::query("DELETE FROM proxies WHERE tag = $1 AND provider = $2 AND proxy_type = $3")
            .bind(&partition.tag)
            .bind(&partition.provider)
            .bind(partition.proxy_type.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO proxies (tag, provider, proxy_type, content)
            SELECT $1, $2, $3, content FROM UNNEST($4::text[]) AS content
            "#,
        )
        .bind(&partition.tag)
        .bind(&partition.provider)
        .bind(partition.proxy_type.as_str())
        .bind(&contents)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(inserted.rows_affected())
    }

    async fn rotate(&self, partition: &ProxyPartition) -> Result<Option<ProxyRecord>, AppError> {
        let row = sqlx::query_as::<_, ProxyRow>(
            r#"
            UPDATE proxies
            SET last_used = NOW()
            WHERE id = (
                SELECT id FROM proxies
                WHERE tag = $1 AND provider = $2 AND proxy_type = $3
                ORDER BY last_used ASC NULLS FIRST, created_at ASC
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING id, tag, provider, proxy_type, content, last_used
            "#,
        )
        .bind(&partition.tag)
        .bind(&partition.provider)
        .bind(partition.proxy_type.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(row.map(Into::into))
    }

    async fn count(&self, partition: &ProxyPartition) -> Result<u64, AppError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM proxies WHERE tag = $1 AND provider = $2 AND proxy_type = $3",
        )
        .bind(&partition.tag)
        .bind(&partition.provider)
        .bind(partition.proxy_type.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;
        Ok(count as u64)
    }

    async fn tags(&self, proxy_type: ProxyType) -> Result<Vec<String>, AppError> {
        sqlx::query_scalar("SELECT DISTINCT tag FROM proxies WHERE proxy_type = $1 ORDER BY tag")
            .bind(proxy_type.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))
    }
}
