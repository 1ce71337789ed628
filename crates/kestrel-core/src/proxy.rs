//! Proxy pool: partitioned by `(tag, provider, proxy_type)`, handed out
//! least-recently-used first.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{ProxyPartition, ProxyRecord, ProxyType};

/// Persistence for proxy partitions.
pub trait ProxyStore: Send + Sync + Clone {
    /// Atomically replace every proxy in `partition` with `contents`.
    /// Returns the number inserted.
    fn replace(
        &self,
        partition: &ProxyPartition,
        contents: &[String],
    ) -> impl Future<Output = Result<u64, AppError>> + Send;

    /// Stamp and return the proxy used longest ago (never-used first).
    fn rotate(
        &self,
        partition: &ProxyPartition,
    ) -> impl Future<Output = Result<Option<ProxyRecord>, AppError>> + Send;

    fn count(
        &self,
        partition: &ProxyPartition,
    ) -> impl Future<Output = Result<u64, AppError>> + Send;

    /// Distinct tags holding proxies of `proxy_type`.
    fn tags(
        &self,
        proxy_type: ProxyType,
    ) -> impl Future<Output = Result<Vec<String>, AppError>> + Send;
}

/// Split a pasted provider export into proxy lines, trimmed, blanks dropped.
pub fn split_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Reject blank lines before any store is touched.
pub fn validate_contents(contents: &[String]) -> Result<(), AppError> {
    if let Some(pos) = contents.iter().position(|c| c.trim().is_empty()) {
        return Err(AppError::InvalidInput(format!(
            "Proxy entry {pos} has empty content"
        )));
    }
    Ok(())
}

#[derive(Debug, Default)]
struct ProxyTable {
    partitions: HashMap<ProxyPartition, Vec<ProxyRecord>>,
}

/// In-process [`ProxyStore`].
#[derive(Debug, Clone, Default)]
pub struct MemoryProxyStore {
    table: Arc<Mutex<ProxyTable>>,
}

impl MemoryProxyStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, ProxyTable>, AppError> {
        self.table
            .lock()
            .map_err(|_| AppError::Generic("proxy table mutex poisoned".into()))
    }
}

impl ProxyStore for MemoryProxyStore {
    async fn replace(&self, partition: &ProxyPartition, contents: &[String]) -> Result<u64, AppError> {
        validate_contents(contents)?;
        let mut table = self.lock()?;
        let mut records = Vec::with_capacity(contents.len());
        for content in contents {
            records.push(ProxyRecord {
                id: Uuid::new_v4(),
                tag: partition.tag.clone(),
                provider: partition.provider.clone(),
                proxy_type: partition.proxy_type,
                content: content.trim().to_string(),
                last_used: None,
            });
        }
        let inserted = records.len() as u64;
        table.partitions.insert(partition.clone(), records);
        Ok(inserted)
    }

    async fn rotate(&self, partition: &ProxyPartition) -> Result<Option<ProxyRecord>, AppError> {
        let mut table = self.lock()?;
        let Some(records) = table.partitions.get_mut(partition) else {
            return Ok(None);
        };
        // `None < Some(_)`, so never-used proxies sort first; ties keep insertion order.
        let Some(oldest) = records.iter_mut().min_by_key(|r| r.last_used) else {
            return Ok(None);
        };
        oldest.last_used = Some(Utc::now());
        Ok(Some(oldest.clone()))
    }

    async fn count(&self, partition: &ProxyPartition) -> Result<u64, AppError> {
        Ok(self
            .lock()?
            .partitions
            .get(partition)
            .map(|r| r.len() as u64)
            .unwrap_or(0))
    }

    async fn tags(&self, proxy_type: ProxyType) -> Result<Vec<String>, AppError> {
        let table = self.lock()?;
        let mut tags: Vec<String> = table
            .partitions
            .iter()
            .filter(|(p, records)| p.proxy_type == proxy_type && !records.is_empty())
            .map(|(p, _)| p.tag.clone())
            .collect();
        tags.sort();
        tags.dedup();
        Ok(tags)
    }
}

/// Error-containing facade over a [`ProxyStore`].
#[derive(Debug, Clone)]
pub struct ProxyPool<S> {
    store: S,
}

impl<S: ProxyStore> ProxyPool<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Swap the partition's contents. `false` leaves the old set in place.
    pub async fn replace(&self, partition: &ProxyPartition, contents: &[String]) -> bool {
        match self.store.replace(partition, contents).await {
            Ok(inserted) => {
                tracing::info!(%partition, inserted, "Proxy partition replaced");
                true
            }
            Err(e) => {
                tracing::error!(%partition, error = %e, "Failed to replace proxies");
                false
            }
        }
    }

    pub async fn rotate(&self, partition: &ProxyPartition) -> Option<ProxyRecord> {
        match self.store.rotate(partition).await {
            Ok(record) => record,
            Err(e) => {
                tracing::error!(%partition, error = %e, "Failed to rotate proxy");
                None
            }
        }
    }

    pub async fn current_size(&self, partition: &ProxyPartition) -> u64 {
        match self.store.count(partition).await {
            Ok(n) => n,
            Err(e) => {
                tracing::error!(%partition, error = %e, "Failed to count proxies");
                0
            }
        }
    }

    pub async fn is_empty(&self, partition: &ProxyPartition) -> bool {
        self.current_size(partition).await == 0
    }

    pub async fn tags(&self, proxy_type: ProxyType) -> Vec<String> {
        match self.store.tags(proxy_type).await {
            Ok(tags) => tags,
            Err(e) => {
                tracing::error!(%proxy_type, error = %e, "Failed to list proxy tags");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn split_lines_trims_and_drops_blanks() {
        let text = "host1:80:u:p\r\n  host2:81  \n\n\r\nhost3:82";
        assert_eq!(split_lines(text), lines(&["host1:80:u:p", "host2:81", "host3:82"]));
    }

    #[tokio::test]
    async fn rotate_cycles_least_recently_used() {
        let pool = ProxyPool::new(MemoryProxyStore::new());
        let partition = ProxyPartition::default();
        assert!(pool.replace(&partition, &lines(&["a:1", "b:2"])).await);

        let first = pool.rotate(&partition).await.unwrap();
        let second = pool.rotate(&partition).await.unwrap();
        let third = pool.rotate(&partition).await.unwrap();

        assert_eq!(first.content, "a:1");
        assert_eq!(second.content, "b:2");
        assert_eq!(third.content, "a:1");
        assert!(third.last_used.is_some());
    }

    #[tokio::test]
    async fn replace_swaps_the_whole_partition() {
        let pool = ProxyPool::new(MemoryProxyStore::new());
        let partition = ProxyPartition::default();
        pool.replace(&partition, &lines(&["a:1", "b:2", "c:3"])).await;
        pool.replace(&partition, &lines(&["d:4"])).await;

        assert_eq!(pool.current_size(&partition).await, 1);
        assert_eq!(pool.rotate(&partition).await.unwrap().content, "d:4");
    }

    #[tokio::test]
    async fn failed_replace_leaves_old_contents() {
        let pool = ProxyPool::new(MemoryProxyStore::new());
        let partition = ProxyPartition::default();
        pool.replace(&partition, &lines(&["a:1", "b:2"])).await;

        assert!(!pool.replace(&partition, &lines(&["c:3", "  "])).await);
        assert_eq!(pool.current_size(&partition).await, 2);
    }

    #[tokio::test]
    async fn partitions_are_scoped() {
        let pool = ProxyPool::new(MemoryProxyStore::new());
        let general = ProxyPartition::default();
        let residential = ProxyPartition::new("residential", "iproyal", ProxyType::Static);
        pool.replace(&residential, &lines(&["r:1"])).await;

        assert!(pool.is_empty(&general).await);
        assert!(pool.rotate(&general).await.is_none());
        assert_eq!(pool.current_size(&residential).await, 1);
        assert_eq!(pool.tags(ProxyType::Static).await, vec!["residential"]);
        assert!(pool.tags(ProxyType::Dynamic).await.is_empty());
    }
}
