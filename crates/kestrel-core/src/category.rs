//! Category graph store: written once per exploration run, queried by the
//! product walker and the API.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use uuid::Uuid;

use crate::error::AppError;
use crate::models::{Category, NewCategory};

pub trait CategoryStore: Send + Sync + Clone {
    /// Swap the whole graph for `categories` in one atomic step.
    /// Duplicate `(name, depth)` keys resolve to the last occurrence.
    fn replace(
        &self,
        categories: &[NewCategory],
    ) -> impl Future<Output = Result<u64, AppError>> + Send;

    fn get_by_name(
        &self,
        name: &str,
    ) -> impl Future<Output = Result<Option<Category>, AppError>> + Send;

    /// `strict` selects `depth == d`, otherwise `depth <= d`.
    fn get_by_depth(
        &self,
        depth: i32,
        strict: bool,
    ) -> impl Future<Output = Result<Vec<Category>, AppError>> + Send;

    fn get_by_ancestor(
        &self,
        ancestor: &str,
    ) -> impl Future<Output = Result<Vec<Category>, AppError>> + Send;

    fn get_by_parent(
        &self,
        parent: &str,
    ) -> impl Future<Output = Result<Vec<Category>, AppError>> + Send;

    fn get_by_leaf(
        &self,
        is_leaf: bool,
    ) -> impl Future<Output = Result<Vec<Category>, AppError>> + Send;

    /// Categories under any of `ancestors` with `depth <= d`.
    fn get_by_ancestors_and_depth(
        &self,
        ancestors: &[String],
        depth: i32,
    ) -> impl Future<Output = Result<Vec<Category>, AppError>> + Send;
}

/// Collapse duplicate `(name, depth)` keys, last write wins, keeping the
/// position of the first occurrence.
pub fn dedup_last_wins(categories: &[NewCategory]) -> Vec<NewCategory> {
    let mut index: HashMap<(&str, i32), usize> = HashMap::new();
    let mut out: Vec<NewCategory> = Vec::with_capacity(categories.len());
    for category in categories {
        match index.get(&(category.name.as_str(), category.depth)) {
            Some(&pos) => out[pos] = category.clone(),
            None => {
                index.insert((category.name.as_str(), category.depth), out.len());
                out.push(category.clone());
            }
        }
    }
    out
}

/// Synthetic depth marking leaf selection.
pub const LEAF_DEPTH: i32 = -1;

/// Reject depths below the synthetic `-1` marker.
pub fn validate(categories: &[NewCategory]) -> Result<(), AppError> {
    if let Some(bad) = categories.iter().find(|c| c.depth < -1) {
        return Err(AppError::InvalidInput(format!(
            "Category '{}' has depth {} (minimum is -1)",
            bad.name, bad.depth
        )));
    }
    Ok(())
}

/// In-process [`CategoryStore`].
#[derive(Debug, Clone, Default)]
pub struct MemoryCategoryStore {
    rows: Arc<Mutex<Vec<Category>>>,
}

impl MemoryCategoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn select<F: Fn(&Category) -> bool>(&self, filter: F) -> Result<Vec<Category>, AppError> {
        let rows = self
            .rows
            .lock()
            .map_err(|_| AppError::Generic("category table mutex poisoned".into()))?;
        let mut out: Vec<Category> = rows.iter().filter(|c| filter(c)).cloned().collect();
        out.sort_by(|a, b| a.depth.cmp(&b.depth).then_with(|| a.name.cmp(&b.name)));
        Ok(out)
    }
}

impl CategoryStore for MemoryCategoryStore {
    async fn replace(&self, categories: &[NewCategory]) -> Result<u64, AppError> {
        validate(categories)?;
        let fresh: Vec<Category> = dedup_last_wins(categories)
            .into_iter()
            .map(|c| Category::from_new(Uuid::new_v4(), c))
            .collect();
        let count = fresh.len() as u64;
        let mut rows = self
            .rows
            .lock()
            .map_err(|_| AppError::Generic("category table mutex poisoned".into()))?;
        *rows = fresh;
        Ok(count)
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<Category>, AppError> {
        Ok(self.select(|c| c.name == name)?.into_iter().next())
    }

    async fn get_by_depth(&self, depth: i32, strict: bool) -> Result<Vec<Category>, AppError> {
        self.select(|c| if strict { c.depth == depth } else { c.depth <= depth })
    }

    async fn get_by_ancestor(&self, ancestor: &str) -> Result<Vec<Category>, AppError> {
        self.select(|c| c.ancestor.as_deref() == Some(ancestor))
    }

    async fn get_by_parent(&self, parent: &str) -> Result<Vec<Category>, AppError> {
        self.select(|c| c.parent.as_deref() == Some(parent))
    }

    async fn get_by_leaf(&self, is_leaf: bool) -> Result<Vec<Category>, AppError> {
        self.select(|c| c.is_leaf == is_leaf)
    }

    async fn get_by_ancestors_and_depth(
        &self,
        ancestors: &[String],
        depth: i32,
    ) -> Result<Vec<Category>, AppError> {
        self.select(|c| {
            c.depth <= depth
                && c
                    .ancestor
                    .as_ref()
                    .is_some_and(|a| ancestors.iter().any(|x| x == a))
        })
    }
}

/// Error-containing facade over a [`CategoryStore`].
#[derive(Debug, Clone)]
pub struct CategoryGraph<S> {
    store: S,
}

impl<S: CategoryStore> CategoryGraph<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn replace(&self, categories: &[NewCategory]) -> bool {
        match self.store.replace(categories).await {
            Ok(stored) => {
                tracing::info!(received = categories.len(), stored, "Category graph replaced");
                true
            }
            Err(e) => {
                tracing::error!(error = %e, "Can't replace categories");
                false
            }
        }
    }

    pub async fn get_by_name(&self, name: &str) -> Option<Category> {
        self.store.get_by_name(name).await.unwrap_or_else(|e| {
            tracing::error!(%name, error = %e, "Error getting category by name");
            None
        })
    }

    /// Matching categories and their count.
    pub async fn get_by_depth(&self, depth: i32, strict: bool) -> (Vec<Category>, usize) {
        let categories = self
            .store
            .get_by_depth(depth, strict)
            .await
            .unwrap_or_else(|e| {
                tracing::error!(depth, strict, error = %e, "Error getting categories by depth");
                Vec::new()
            });
        let count = categories.len();
        (categories, count)
    }

    pub async fn get_by_ancestor(&self, ancestor: &str) -> Vec<Category> {
        self.store.get_by_ancestor(ancestor).await.unwrap_or_else(|e| {
            tracing::error!(%ancestor, error = %e, "Error getting categories by ancestor");
            Vec::new()
        })
    }

    pub async fn get_by_parent(&self, parent: &str) -> Vec<Category> {
        self.store.get_by_parent(parent).await.unwrap_or_else(|e| {
            tracing::error!(%parent, error = %e, "Error getting categories by parent");
            Vec::new()
        })
    }

    pub async fn get_by_leaf(&self, is_leaf: bool) -> Vec<Category> {
        self.store.get_by_leaf(is_leaf).await.unwrap_or_else(|e| {
            tracing::error!(is_leaf, error = %e, "Error getting categories by leaf flag");
            Vec::new()
        })
    }

    /// Categories a product crawl at `depth` should walk. [`LEAF_DEPTH`]
    /// selects every leaf regardless of depth.
    pub async fn crawl_targets(&self, depth: i32, strict: bool) -> Vec<Category> {
        if depth == LEAF_DEPTH {
            self.get_by_leaf(true).await
        } else {
            self.get_by_depth(depth, strict).await.0
        }
    }

    pub async fn get_by_ancestors_and_depth(&self, ancestors: &[String], depth: i32) -> Vec<Category> {
        self.store
            .get_by_ancestors_and_depth(ancestors, depth)
            .await
            .unwrap_or_else(|e| {
                tracing::error!(?ancestors, depth, error = %e, "Error getting categories by ancestors and depth");
                Vec::new()
            })
    }
}
