use std::sync::Arc;
use std::time::Duration;

use custodian_core::AppResult;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::{PolicyRepository, PolicySnapshot};

#[derive(Clone)]
struct CachedSnapshot {
    snapshot: Arc<PolicySnapshot>,
    loaded_at: Instant,
}

/// Policy snapshot cache with bounded staleness.
///
/// A snapshot older than `max_staleness` is never served. Role change
/// notifications call [`PolicyCache::invalidate`] to apply immediately.
#[derive(Clone)]
pub struct PolicyCache {
    repository: Arc<dyn PolicyRepository>,
    max_staleness: Duration,
    cached: Arc<RwLock<Option<CachedSnapshot>>>,
}

impl PolicyCache {
    /// Creates a cache over a policy repository.
    #[must_use]
    pub fn new(repository: Arc<dyn PolicyRepository>, max_staleness: Duration) -> Self {
        Self {
            repository,
            max_staleness,
            cached: Arc::new(RwLock::new(None)),
        }
    }

    /// Returns a snapshot no older than the staleness bound.
    pub async fn snapshot(&self) -> AppResult<Arc<PolicySnapshot>> {
        if let Some(cached) = self.cached.read().await.as_ref()
            && cached.loaded_at.elapsed() <= self.max_staleness
        {
            return Ok(cached.snapshot.clone());
        }

        let mut cached = self.cached.write().await;
        if let Some(current) = cached.as_ref()
            && current.loaded_at.elapsed() <= self.max_staleness
        {
            return Ok(current.snapshot.clone());
        }

        let snapshot = Arc::new(self.repository.load_snapshot().await?);
        *cached = Some(CachedSnapshot {
            snapshot: snapshot.clone(),
            loaded_at: Instant::now(),
        });
        Ok(snapshot)
    }

    /// Drops the cached snapshot so the next lookup reloads it.
    pub async fn invalidate(&self) {
        self.cached.write().await.take();
    }

    /// Returns the configured staleness bound.
    #[must_use]
    pub fn max_staleness(&self) -> Duration {
        self.max_staleness
    }
}

#[cfg(test)]
mod tests;
