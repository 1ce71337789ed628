//! Fill and cleanup passes over the identity pool.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::acquire::IdentityProvider;
use crate::identity::IdentityPool;
use crate::models::{BrowserEngine, IdentitySet};
use crate::pool::PoolBackend;
use crate::scheduler::MaintenanceHandler;

/// Outcome of one fill pass over a partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillOutcome {
    Full,
    Added,
    Rejected,
    AcquireFailed,
    /// The provider cannot acquire for this engine; nothing was attempted.
    Unsupported,
}

/// Keeps an [`IdentityPool`] topped up with identities from an
/// [`IdentityProvider`].
#[derive(Debug, Clone)]
pub struct PoolMaintainer<B, I> {
    identities: IdentityPool<B>,
    provider: I,
    loop_pause: Duration,
}

impl<B, I> PoolMaintainer<B, I>
where
    B: PoolBackend<IdentitySet> + 'static,
    I: IdentityProvider + 'static,
{
    pub fn new(identities: IdentityPool<B>, provider: I) -> Self {
        Self {
            identities,
            provider,
            loop_pause: Duration::from_secs(1),
        }
    }

    /// Pause between passes of an independent fill loop.
    pub fn with_loop_pause(mut self, pause: Duration) -> Self {
        self.loop_pause = pause;
        self
    }

    pub fn identities(&self) -> &IdentityPool<B> {
        &self.identities
    }

    pub fn provider(&self) -> &I {
        &self.provider
    }

    /// One acquisition attempt for `engine`, stored only on success.
    pub async fn fill_partition(&self, engine: BrowserEngine) -> FillOutcome {
        if !self.provider.supports(engine) {
            tracing::debug!(%engine, "No driver for engine, partition left as declared");
            return FillOutcome::Unsupported;
        }
        if self.identities.is_full(engine).await.unwrap_or(true) {
            let pool_size = self.identities.pool_size(engine).await;
            tracing::info!(%engine, pool_size, "Cookie set pool is full");
            return FillOutcome::Full;
        }

        let acquired = match self.provider.acquire(engine, None).await {
            Ok(acquired) => acquired,
            Err(e) => {
                tracing::warn!(%engine, error = %e, "Identity acquisition failed");
                return FillOutcome::AcquireFailed;
            }
        };
        tracing::info!(
            %engine,
            postcode = %acquired.postcode,
            location = %acquired.location,
            "Identity acquired"
        );

        let section = self.identities.lock().enter().await;
        let before = self.identities.pool_size(engine).await;
        let stored = self
            .identities
            .add(
                engine,
                &acquired.postcode,
                &acquired.location,
                acquired.cookies,
                Some(&section),
            )
            .await;
        let after = self.identities.pool_size(engine).await;
        drop(section);

        tracing::info!(%engine, before, after, "Pool size before/after adding");
        if stored {
            FillOutcome::Added
        } else {
            FillOutcome::Rejected
        }
    }

    /// One fill pass over every partition.
    pub async fn start_add_task(&self) -> Vec<(BrowserEngine, FillOutcome)> {
        let mut outcomes = Vec::new();
        for engine in self.identities.partitions() {
            outcomes.push((engine, self.fill_partition(engine).await));
        }
        outcomes
    }

    /// Sweep every partition, logging sizes around each sweep.
    pub async fn start_cleanup_task(&self) -> u64 {
        let mut removed = 0;
        for engine in self.identities.partitions() {
            let section = self.identities.lock().enter().await;
            let before = self.identities.pool_size(engine).await;
            removed += self.identities.clean(engine, Some(&section)).await;
            let after = self.identities.pool_size(engine).await;
            drop(section);
            tracing::info!(%engine, before, after, "Pool size before/after cleaning");
        }
        removed
    }
}

impl<B, I> MaintenanceHandler for PoolMaintainer<B, I>
where
    B: PoolBackend<IdentitySet> + 'static,
    I: IdentityProvider + 'static,
{
    async fn fill(&self, independent_loop: bool, cancel: CancellationToken) {
        if !independent_loop {
            self.start_add_task().await;
            return;
        }
        loop {
            tokio::select! {
                _ = self.start_add_task() => {}
                () = cancel.cancelled() => break,
            }
            tokio::select! {
                () = tokio::time::sleep(self.loop_pause) => {}
                () = cancel.cancelled() => break,
            }
        }
    }

    async fn cleanup(&self) {
        self.start_cleanup_task().await;
    }
}
