use sqlx::{PgPool, Pool, Postgres};
use uuid::Uuid;

use kestrel_core::category::{CategoryStore, dedup_last_wins, validate};
use kestrel_core::error::AppError;
use kestrel_core::models::{Category, NewCategory};

/// PostgreSQL-backed category graph.
#[derive(Debug, Clone)]
pub struct PgCategoryStore {
    pool: Pool<Postgres>,
}

impl PgCategoryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn select(&self, filter: &str, bind: Filter<'_>) -> Result<Vec<Category>, AppError> {
        let sql = format!(
            "SELECT id, name, depth, ancestor, parent, path, url, is_leaf \
             FROM categories WHERE {filter} ORDER BY depth ASC, name ASC"
        );
        let query = sqlx::query_as::<_, CategoryRow>(&sql);
        let query = match bind {
            Filter::Text(value) => query.bind(value),
            Filter::Depth(depth) => query.bind(depth),
            Filter::Leaf(is_leaf) => query.bind(is_leaf),
            Filter::Ancestors(ancestors, depth) => query.bind(ancestors).bind(depth),
        };
        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;
        Ok(rows.into_iter().map(Into::into).collect())
    }
}

enum Filter<'a> {
    Text(&'a str),
    Depth(i32),
    Leaf(bool),
    Ancestors(&'a [String], i32),
}

#[derive(sqlx::FromRow)]
struct CategoryRow {
    id: Uuid,
    name: String,
    depth: i32,
    ancestor: Option<String>,
    parent: Option<String>,
    path: String,
    url: String,
    is_leaf: bool,
}

impl From<CategoryRow> for Category {
    fn from(row: CategoryRow) -> Self {
        Category {
            id: row.id,
            name: row.name,
            depth: row.depth,
            ancestor: row.ancestor,
            parent: row.parent,
            path: row.path,
            url: row.url,
            is_leaf: row.is_leaf,
        }
    }
}

impl CategoryStore for PgCategoryStore {
    async fn replace(&self, categories: &[NewCategory]) -> Result<u64, AppError> {
        validate(categories)?;
        let rows = dedup_last_wins(categories);

        let mut names = Vec::with_capacity(rows.len());
        let mut depths = Vec::with_capacity(rows.len());
        let mut ancestors = Vec::with_capacity(rows.len());
        let mut parents = Vec::with_capacity(rows.len());
        let mut paths = Vec::with_capacity(rows.len());
        let mut urls = Vec::with_capacity(rows.len());
        let mut leaves = Vec::with_capacity(rows.len());
        for row in rows {
            names.push(row.name);
            depths.push(row.depth);
            ancestors.push(row.ancestor);
            parents.push(row.parent);
            paths.push(row.path);
            urls.push(row.url);
            leaves.push(row.is_leaf);
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        sqlx::query("DELETE FROM categories")
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO categories (name, depth, ancestor, parent, path, url, is_leaf)
            SELECT * FROM UNNEST(
                $1::varchar[], $2::int4[], $3::varchar[], $4::varchar[],
                $5::varchar[], $6::varchar[], $7::bool[]
            )
            "#,
        )
        .bind(&names)
        .bind(&depths)
        .bind(&ancestors)
        .bind(&parents)
        .bind(&paths)
        .bind(&urls)
        .bind(&leaves)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(inserted.rows_affected())
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<Category>, AppError> {
        Ok(self
            .select("name = $1", Filter::Text(name))
            .await?
            .into_iter()
            .next())
    }

    async fn get_by_depth(&self, depth: i32, strict: bool) -> Result<Vec<Category>, AppError> {
        let filter = if strict { "depth = $1" } else { "depth <= $1" };
        self.select(filter, Filter::Depth(depth)).await
    }

    async fn get_by_ancestor(&self, ancestor: &str) -> Result<Vec<Category>, AppError> {
        self.select("ancestor = $1", Filter::Text(ancestor)).await
    }

    async fn get_by_parent(&self, parent: &str) -> Result<Vec<Category>, AppError> {
        self.select("parent = $1", Filter::Text(parent)).await
    }

    async fn get_by_leaf(&self, is_leaf: bool) -> Result<Vec<Category>, AppError> {
        self.select("is_leaf = $1", Filter::Leaf(is_leaf)).await
    }

    async fn get_by_ancestors_and_depth(
        &self,
        ancestors: &[String],
        depth: i32,
    ) -> Result<Vec<Category>, AppError> {
        self.select(
            "ancestor = ANY($1) AND depth <= $2",
            Filter::Ancestors(ancestors, depth),
        )
        .await
    }
}
