//! Per-session schema snapshot cache

use crate::ai_sql::schema::{SchemaExtractor, SchemaSnapshot};
use crate::database::DataSource;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Entry in the schema cache
#[derive(Debug, Clone)]
struct CacheEntry {
    snapshot: Arc<SchemaSnapshot>,
    created_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, ttl: Option<Duration>) -> bool {
        ttl.is_some_and(|ttl| self.created_at.elapsed() > ttl)
    }
}

/// Schema snapshot shared by every turn of a session.
///
/// Filled lazily; concurrent callers wait on the write lock so only one of them
/// introspects. Degraded snapshots are never stored.
#[derive(Debug, Default)]
pub struct SchemaCache {
    entry: RwLock<Option<CacheEntry>>,
    ttl: Option<Duration>,
    hits: AtomicUsize,
    misses: AtomicUsize,
}

impl SchemaCache {
    /// Create a cache that holds its snapshot for the whole session
    pub fn new() -> Self {
        Self::default()
    }

    /// Create cache with custom TTL
    pub fn with_ttl(ttl: Option<Duration>) -> Self {
        Self {
            ttl,
            ..Self::default()
        }
    }

    async fn fresh(&self) -> Option<Arc<SchemaSnapshot>> {
        let guard = self.entry.read().await;
        guard
            .as_ref()
            .filter(|entry| !entry.is_expired(self.ttl))
            .map(|entry| Arc::clone(&entry.snapshot))
    }

    /// Return the cached snapshot, introspecting `source` when there is none
    pub async fn get_or_refresh(
        &self,
        extractor: &SchemaExtractor,
        source: &dyn DataSource,
    ) -> Arc<SchemaSnapshot> {
        if let Some(snapshot) = self.fresh().await {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return snapshot;
        }

        let mut guard = self.entry.write().await;
        // Another caller may have refreshed while we waited for the lock
        if let Some(entry) = guard.as_ref().filter(|e| !e.is_expired(self.ttl)) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Arc::clone(&entry.snapshot);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let snapshot = Arc::new(extractor.introspect(source).await);
        if snapshot.is_degraded() {
            warn!("Schema snapshot is degraded, not caching it");
            *guard = None;
        } else {
            debug!("Caching schema snapshot");
            *guard = Some(CacheEntry {
                snapshot: Arc::clone(&snapshot),
                created_at: Instant::now(),
            });
        }
        snapshot
    }

    /// Drop the cached snapshot
    pub async fn evict(&self) {
        *self.entry.write().await = None;
        debug!("Schema cache evicted");
    }

    pub async fn is_cached(&self) -> bool {
        self.fresh().await.is_some()
    }

    /// Get cache statistics (hits, misses)
    pub fn stats(&self) -> (usize, usize) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }
}
