//! Cookie identity pool, partitioned by browser engine.

use std::collections::HashMap;

use crate::lock::{CriticalSection, SharedLock};
use crate::models::{BrowserEngine, Cookie, IdentityPolicy, IdentitySet};
use crate::pool::{BoundedPool, PoolBackend};

/// One [`BoundedPool`] per browser engine, all sharing one lock.
///
/// Unknown partitions are an expected condition: `get` answers `None`,
/// `add` answers `false`, sizes answer 0.
#[derive(Debug)]
pub struct IdentityPool<B> {
    partitions: HashMap<BrowserEngine, BoundedPool<IdentitySet, B>>,
    policy: IdentityPolicy,
    lock: SharedLock,
}

impl<B: Clone> Clone for IdentityPool<B> {
    fn clone(&self) -> Self {
        Self {
            partitions: self.partitions.clone(),
            policy: self.policy,
            lock: self.lock.clone(),
        }
    }
}

impl<B: PoolBackend<IdentitySet>> IdentityPool<B> {
    pub fn new(policy: IdentityPolicy, lock: SharedLock) -> Self {
        Self {
            partitions: HashMap::new(),
            policy,
            lock,
        }
    }

    /// Register `backend` as the storage for `engine`.
    pub fn with_partition(mut self, engine: BrowserEngine, backend: B) -> Self {
        self.partitions
            .insert(engine, BoundedPool::with_lock(backend, self.lock.clone()));
        self
    }

    /// True once at least one partition is registered. Consumers check this
    /// before serving instead of relying on construction side effects.
    pub fn is_initialized(&self) -> bool {
        !self.partitions.is_empty()
    }

    pub fn policy(&self) -> IdentityPolicy {
        self.policy
    }

    /// The lock callers must enter to build a [`CriticalSection`] for this pool.
    pub fn lock(&self) -> &SharedLock {
        &self.lock
    }

    /// Registered engines, in a stable order.
    pub fn partitions(&self) -> Vec<BrowserEngine> {
        BrowserEngine::ALL
            .into_iter()
            .filter(|e| self.partitions.contains_key(e))
            .collect()
    }

    pub fn partition(&self, engine: BrowserEngine) -> Option<&BoundedPool<IdentitySet, B>> {
        self.partitions.get(&engine)
    }

    /// Mint an identity from freshly acquired cookies and store it.
    pub async fn add(
        &self,
        engine: BrowserEngine,
        postcode: &str,
        location: &str,
        cookies: Vec<Cookie>,
        section: Option<&CriticalSection<'_>>,
    ) -> bool {
        let Some(pool) = self.partitions.get(&engine) else {
            tracing::warn!(%engine, "Add to unknown identity partition");
            return false;
        };
        let set = IdentitySet::new(engine, postcode, location, cookies, self.policy);
        pool.add(set, section).await
    }

    /// Check out one identity, consuming a use.
    pub async fn get(
        &self,
        engine: BrowserEngine,
        section: Option<&CriticalSection<'_>>,
    ) -> Option<IdentitySet> {
        match self.partitions.get(&engine) {
            Some(pool) => pool.get(section).await,
            None => {
                tracing::warn!(%engine, "Get from unknown identity partition");
                None
            }
        }
    }

    pub async fn clean(&self, engine: BrowserEngine, section: Option<&CriticalSection<'_>>) -> u64 {
        match self.partitions.get(&engine) {
            Some(pool) => pool.clean(section).await,
            None => 0,
        }
    }

    pub async fn pool_size(&self, engine: BrowserEngine) -> usize {
        match self.partitions.get(&engine) {
            Some(pool) => pool.current_size().await,
            None => 0,
        }
    }

    pub fn max_pool_size(&self, engine: BrowserEngine) -> usize {
        self.partitions
            .get(&engine)
            .map(BoundedPool::max_size)
            .unwrap_or(0)
    }

    pub async fn is_full(&self, engine: BrowserEngine) -> Option<bool> {
        match self.partitions.get(&engine) {
            Some(pool) => Some(pool.is_full().await),
            None => None,
        }
    }

    pub async fn is_empty(&self, engine: BrowserEngine) -> Option<bool> {
        match self.partitions.get(&engine) {
            Some(pool) => Some(pool.is_empty().await),
            None => None,
        }
    }
}
