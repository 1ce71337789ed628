//! Caller-held critical sections.
//!
//! A [`SharedLock`] is handed to every party that must serialize a
//! multi-step pool operation (the maintenance scheduler, the API's fill
//! handler). Holding a [`CriticalSection`] is the proof that the lock is
//! taken; pool methods accept `Option<&CriticalSection>` and never re-acquire
//! a section they were given.

use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};

/// An async mutex guarding no data, only a region of work.
#[derive(Debug, Clone, Default)]
pub struct SharedLock {
    inner: Arc<Mutex<()>>,
}

impl SharedLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for the lock and enter the critical section.
    pub async fn enter(&self) -> CriticalSection<'_> {
        CriticalSection {
            _guard: self.inner.lock().await,
        }
    }

    /// Enter only if nobody else holds the lock.
    pub fn try_enter(&self) -> Option<CriticalSection<'_>> {
        self.inner
            .try_lock()
            .ok()
            .map(|guard| CriticalSection { _guard: guard })
    }
}

/// Scoped proof of lock ownership; released on drop.
#[derive(Debug)]
pub struct CriticalSection<'a> {
    _guard: MutexGuard<'a, ()>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn section_excludes_other_holders_until_dropped() {
        let lock = SharedLock::new();
        let other = lock.clone();

        let section = lock.enter().await;
        assert!(other.try_enter().is_none());
        drop(section);
        assert!(other.try_enter().is_some());
    }
}
