//! JSON file sink for listing pages and category trees.
//!
//! Layout under the root directory:
//!
//! ```text
//! <root>/<category>@<depth>/page_0001_<uuid>.json         persisted page
//! <root>/<category>@<depth>/failed_page_0002_<uuid>.json  rejected response
//! <root>/trees/<keyword>.tree.json                        explored keyword tree
//! <root>/trees/aggregated.json                            every tree of a run
//! ```
//!
//! Every write gets a fresh uuid, so re-runs and concurrent walkers add
//! files instead of replacing them.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::explorer::CategoryNode;
use crate::listing::ListingPage;
use crate::models::Category;
use crate::walker::PageSink;

const TREE_SUFFIX: &str = ".tree.json";
const AGGREGATE_FILE: &str = "aggregated.json";

/// On-disk form of a persisted page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredPage {
    pub category: String,
    pub depth: i32,
    pub page: u32,
    pub fetched_at: DateTime<Utc>,
    #[serde(flatten)]
    pub listing: ListingPage,
    pub body: String,
}

/// On-disk form of a rejected response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredFailure {
    pub category: String,
    pub depth: i32,
    pub page: u32,
    pub reason: String,
    pub fetched_at: DateTime<Utc>,
    pub body: String,
}

/// Make a category or keyword name safe to use as a path segment.
pub fn file_stem(name: &str) -> String {
    let stem: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || " -_&,'".contains(c) {
                c
            } else {
                '_'
            }
        })
        .collect();
    if stem.is_empty() { "_".to_string() } else { stem }
}

/// [`PageSink`] writing one JSON file per page.
#[derive(Debug, Clone)]
pub struct JsonFileSink {
    root: PathBuf,
}

impl JsonFileSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Categories are unique per `(name, depth)`, so both name the directory.
    fn category_dir(&self, category: &Category) -> PathBuf {
        self.root
            .join(format!("{}@{}", file_stem(&category.name), category.depth))
    }

    fn trees_dir(&self) -> PathBuf {
        self.root.join("trees")
    }

    async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), AppError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_vec_pretty(value)?;
        tokio::fs::write(path, json).await?;
        Ok(())
    }

    /// Write one keyword's tree; returns the file written.
    pub async fn write_tree(&self, tree: &CategoryNode) -> Result<PathBuf, AppError> {
        let path = self
            .trees_dir()
            .join(format!("{}{TREE_SUFFIX}", file_stem(&tree.name)));
        Self::write_json(&path, tree).await?;
        tracing::info!(keyword = %tree.name, path = %path.display(), "Wrote category tree");
        Ok(path)
    }

    /// Write every tree of a run into one file.
    pub async fn write_aggregate(&self, trees: &[CategoryNode]) -> Result<PathBuf, AppError> {
        let path = self.trees_dir().join(AGGREGATE_FILE);
        Self::write_json(&path, &trees).await?;
        Ok(path)
    }

    /// Load every per-keyword tree, ordered by file name.
    pub async fn read_trees(&self) -> Result<Vec<CategoryNode>, AppError> {
        let dir = self.trees_dir();
        let mut paths = Vec::new();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_tree = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(TREE_SUFFIX));
            if is_tree {
                paths.push(path);
            }
        }
        paths.sort();

        let mut trees = Vec::with_capacity(paths.len());
        for path in paths {
            let raw = tokio::fs::read(&path).await?;
            trees.push(serde_json::from_slice(&raw)?);
        }
        Ok(trees)
    }
}

impl PageSink for JsonFileSink {
    async fn known_ids(&self, category: &Category) -> Result<HashSet<String>, AppError> {
        let dir = self.category_dir(category);
        let mut ids = HashSet::new();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ids),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_page = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("page_") && n.ends_with(".json"));
            if !is_page {
                continue;
            }
            let raw = tokio::fs::read(&path).await?;
            match serde_json::from_slice::<StoredPage>(&raw) {
                Ok(page) => ids.extend(page.listing.item_ids),
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable page file"),
            }
        }
        Ok(ids)
    }

    async fn persist_page(
        &self,
        category: &Category,
        page: u32,
        listing: &ListingPage,
        body: &str,
    ) -> Result<(), AppError> {
        let path = self
            .category_dir(category)
            .join(format!("page_{page:04}_{}.json", Uuid::new_v4().simple()));
        let stored = StoredPage {
            category: category.name.clone(),
            depth: category.depth,
            page,
            fetched_at: Utc::now(),
            listing: listing.clone(),
            body: body.to_string(),
        };
        Self::write_json(&path, &stored).await
    }

    async fn persist_failure(
        &self,
        category: &Category,
        page: u32,
        reason: &str,
        body: &str,
    ) -> Result<(), AppError> {
        let path = self
            .category_dir(category)
            .join(format!("failed_page_{page:04}_{}.json", Uuid::new_v4().simple()));
        let stored = StoredFailure {
            category: category.name.clone(),
            depth: category.depth,
            page,
            reason: reason.to_string(),
            fetched_at: Utc::now(),
            body: body.to_string(),
        };
        Self::write_json(&path, &stored).await
    }
}
