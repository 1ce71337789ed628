//! Generic bounded resource pool.
//!
//! [`PoolBackend`] is the storage seam (in-process deque here, relational
//! store in `kestrel-db`). [`BoundedPool`] wraps a backend with the locking
//! and error-containment contract: capacity and emptiness are answered with
//! `bool`/`Option`, backend failures are logged and swallowed.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use crate::deque::BoundedDeque;
use crate::error::AppError;
use crate::lock::{CriticalSection, SharedLock};
use crate::models::IdentitySet;

/// A resource with a liveness predicate and a consumption side effect.
pub trait Perishable: Clone + Send + Sync + 'static {
    fn is_alive(&self, now: DateTime<Utc>) -> bool;

    /// Applied to an item as it leaves the pool.
    fn on_checkout(&mut self, now: DateTime<Utc>) {
        let _ = now;
    }
}

impl Perishable for IdentitySet {
    fn is_alive(&self, now: DateTime<Utc>) -> bool {
        self.is_usable(now)
    }

    fn on_checkout(&mut self, now: DateTime<Utc>) {
        self.usable_times = self.usable_times.saturating_sub(1);
        self.last_used = Some(now);
    }
}

/// Storage for one pool partition.
///
/// `take` must sweep and select in one atomic step with respect to other
/// callers of the same backend.
pub trait PoolBackend<T>: Send + Sync + Clone {
    /// Store `item`; `Ok(false)` when at capacity.
    fn insert(&self, item: T) -> impl Future<Output = Result<bool, AppError>> + Send;

    /// Sweep, then remove and return one eligible item.
    fn take(&self) -> impl Future<Output = Result<Option<T>, AppError>> + Send;

    /// Remove every dead item. Returns how many were removed.
    fn sweep(&self) -> impl Future<Output = Result<u64, AppError>> + Send;

    fn current_size(&self) -> impl Future<Output = Result<usize, AppError>> + Send;

    fn max_size(&self) -> usize;
}

/// In-process backend: newest items at the head, consumed from the head,
/// dead items swept from the tail.
#[derive(Debug, Clone)]
pub struct MemoryBackend<T> {
    items: Arc<Mutex<BoundedDeque<T>>>,
    max_size: usize,
}

impl<T> MemoryBackend<T> {
    pub fn new(max_size: usize) -> Self {
        Self {
            items: Arc::new(Mutex::new(BoundedDeque::with_capacity(max_size))),
            max_size,
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BoundedDeque<T>>, AppError> {
        self.items
            .lock()
            .map_err(|_| AppError::Generic("pool storage mutex poisoned".into()))
    }
}

impl<T: Perishable> MemoryBackend<T> {
    /// Snapshot head-to-tail, newest first.
    pub fn snapshot(&self) -> Result<Vec<T>, AppError> {
        Ok(self.lock()?.iter().cloned().collect())
    }
}

impl<T: Perishable> PoolBackend<T> for MemoryBackend<T> {
    async fn insert(&self, item: T) -> Result<bool, AppError> {
        Ok(self.lock()?.push_front(item).is_ok())
    }

    async fn take(&self) -> Result<Option<T>, AppError> {
        let now = Utc::now();
        let mut items = self.lock()?;
        items.retain(|item| item.is_alive(now));
        Ok(items.pop_front().map(|mut item| {
            item.on_checkout(now);
            item
        }))
    }

    async fn sweep(&self) -> Result<u64, AppError> {
        let now = Utc::now();
        Ok(self.lock()?.retain(|item| item.is_alive(now)) as u64)
    }

    async fn current_size(&self) -> Result<usize, AppError> {
        Ok(self.lock()?.len())
    }

    fn max_size(&self) -> usize {
        self.max_size
    }
}

/// Locking and error-containment wrapper over a [`PoolBackend`].
///
/// Every mutating method takes `Option<&CriticalSection>`: with `Some`, the
/// caller already holds its shared lock and the call runs inside it; with
/// `None`, the pool enters its own fallback lock for the single operation.
#[derive(Debug)]
pub struct BoundedPool<T, B> {
    backend: B,
    fallback: SharedLock,
    _item: PhantomData<fn() -> T>,
}

impl<T, B: Clone> Clone for BoundedPool<T, B> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            fallback: self.fallback.clone(),
            _item: PhantomData,
        }
    }
}

impl<T, B> BoundedPool<T, B>
where
    T: Send,
    B: PoolBackend<T>,
{
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            fallback: SharedLock::new(),
            _item: PhantomData,
        }
    }

    /// Use `lock` as the fallback, so callers holding a section of the same
    /// lock and callers passing `None` are serialized against each other.
    pub fn with_lock(backend: B, lock: SharedLock) -> Self {
        Self {
            backend,
            fallback: lock,
            _item: PhantomData,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub async fn add(&self, item: T, section: Option<&CriticalSection<'_>>) -> bool {
        let _own = match section {
            Some(_) => None,
            None => Some(self.fallback.enter().await),
        };
        match self.backend.insert(item).await {
            Ok(stored) => stored,
            Err(e) => {
                tracing::error!(error = %e, "Failed to add item to pool");
                false
            }
        }
    }

    pub async fn get(&self, section: Option<&CriticalSection<'_>>) -> Option<T> {
        let _own = match section {
            Some(_) => None,
            None => Some(self.fallback.enter().await),
        };
        match self.backend.take().await {
            Ok(item) => item,
            Err(e) => {
                tracing::error!(error = %e, "Failed to get item from pool");
                None
            }
        }
    }

    /// Remove dead items. Safe to call repeatedly.
    pub async fn clean(&self, section: Option<&CriticalSection<'_>>) -> u64 {
        let _own = match section {
            Some(_) => None,
            None => Some(self.fallback.enter().await),
        };
        match self.backend.sweep().await {
            Ok(removed) => removed,
            Err(e) => {
                tracing::error!(error = %e, "Failed to clean pool");
                0
            }
        }
    }

    pub async fn current_size(&self) -> usize {
        match self.backend.current_size().await {
            Ok(size) => size,
            Err(e) => {
                tracing::error!(error = %e, "Failed to count pool items");
                0
            }
        }
    }

    pub fn max_size(&self) -> usize {
        self.backend.max_size()
    }

    pub async fn is_full(&self) -> bool {
        self.current_size().await >= self.max_size()
    }

    pub async fn is_empty(&self) -> bool {
        self.current_size().await == 0
    }
}
