//! Process-wide key cache: user pool id -> current [`KeySet`].
//!
//! The cache is created once per process, filled eagerly at cold start from
//! the issuer directory, and refreshed per issuer whenever a token names a
//! `kid` the cached set does not contain. It is never torn down.
//!
//! # Concurrency
//!
//! Lookups are lock-free reads of a `DashMap` shard and hand out an
//! `Arc<KeySet>` snapshot. A refresh swaps the whole `Arc` in one insert, so a
//! reader sees either the old set or the new one, never a mix. Refreshes of
//! the same issuer are serialised by a per-issuer async mutex; a caller that
//! waited while another task replaced the set reuses that result instead of
//! fetching again.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::{Issuer, KeySet, KeySource};
use crate::audit::{self, AuditEvent};
use crate::directory::IssuerDirectory;
use crate::{Error, Result};

/// Cache statistics tracked atomically
#[derive(Debug, Default)]
struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    refreshes: AtomicU64,
    refresh_failures: AtomicU64,
}

/// Point-in-time view of the cache counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStatsSnapshot {
    /// Issuers with a cached key set
    pub issuers: usize,
    /// Keys across all cached sets
    pub keys: usize,
    /// Lookups answered from the cache
    pub hits: u64,
    /// Lookups that found no usable key
    pub misses: u64,
    /// Successful JWKS fetches
    pub refreshes: u64,
    /// Failed JWKS fetches
    pub refresh_failures: u64,
}

/// Outcome of the cold-start warm-up
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InitSummary {
    /// Issuers returned by the directory
    pub listed: usize,
    /// Issuers whose keys were fetched
    pub loaded: usize,
    /// Issuers whose fetch failed (resolvable after a later refresh)
    pub failed: usize,
}

/// Default bound on listing issuers at cold start
pub const DEFAULT_DIRECTORY_TIMEOUT: Duration = Duration::from_secs(10);

/// Mapping from issuer to its current key set.
pub struct KeyCache {
    base_url: String,
    directory_timeout: Duration,
    sets: DashMap<String, Arc<KeySet>>,
    refresh_locks: DashMap<String, Arc<Mutex<()>>>,
    source: Arc<dyn KeySource>,
    stats: CacheStats,
}

impl KeyCache {
    /// Create an empty cache for issuers under `base_url`.
    #[must_use]
    pub fn new(base_url: impl Into<String>, source: Arc<dyn KeySource>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            directory_timeout: DEFAULT_DIRECTORY_TIMEOUT,
            sets: DashMap::new(),
            refresh_locks: DashMap::new(),
            source,
            stats: CacheStats::default(),
        }
    }

    /// Bound the directory listing done by [`KeyCache::initialize`].
    #[must_use]
    pub fn with_directory_timeout(mut self, timeout: Duration) -> Self {
        self.directory_timeout = timeout;
        self
    }

    /// Identity-provider base URL all issuers live under
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build the [`Issuer`] for a pool id under this cache's base URL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an invalid pool id.
    pub fn issuer(&self, pool_id: &str) -> Result<Issuer> {
        Issuer::new(&self.base_url, pool_id)
    }

    /// Enumerate all registered issuers and fetch each one's key set.
    ///
    /// Fetches run concurrently. A failing issuer is logged and skipped; it
    /// stays unresolvable until a later refresh succeeds. A failing or stalled
    /// directory leaves the cache empty, and keys are then discovered lazily.
    pub async fn initialize(&self, directory: &dyn IssuerDirectory) -> InitSummary {
        let listed = tokio::time::timeout(self.directory_timeout, directory.list_issuers())
            .await
            .unwrap_or_else(|_| {
                Err(Error::Directory(format!(
                    "listing issuers timed out after {:?}",
                    self.directory_timeout
                )))
            });
        let pool_ids = match listed {
            Ok(ids) => ids,
            Err(e) => {
                warn!(error = %e, "Issuer directory unavailable; key cache starts empty");
                return InitSummary::default();
            }
        };

        let mut summary = InitSummary {
            listed: pool_ids.len(),
            ..InitSummary::default()
        };

        let issuers: Vec<Issuer> = pool_ids
            .iter()
            .filter(|id| !self.sets.contains_key(id.as_str()))
            .filter_map(|id| match self.issuer(id) {
                Ok(issuer) => Some(issuer),
                Err(e) => {
                    warn!(pool_id = %id, error = %e, "Skipping invalid pool id from directory");
                    None
                }
            })
            .collect();

        let results = join_all(issuers.iter().map(|issuer| self.refresh(issuer))).await;
        for result in results {
            match result {
                Ok(_) => summary.loaded += 1,
                Err(_) => summary.failed += 1,
            }
        }

        info!(
            listed = summary.listed,
            loaded = summary.loaded,
            failed = summary.failed,
            "Key cache initialized"
        );
        summary
    }

    /// Cached key set for a pool id, if any.
    #[must_use]
    pub fn get(&self, pool_id: &str) -> Option<Arc<KeySet>> {
        self.sets.get(pool_id).map(|entry| Arc::clone(entry.value()))
    }

    /// Snapshot of every cached key set.
    #[must_use]
    pub fn all(&self) -> Vec<Arc<KeySet>> {
        self.sets.iter().map(|entry| Arc::clone(entry.value())).collect()
    }

    /// Pool ids with a cached key set
    #[must_use]
    pub fn issuers(&self) -> Vec<String> {
        self.sets.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Fetch `issuer`'s key set and replace the cached entry wholesale.
    ///
    /// On failure the previous entry (if any) is left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeyDiscovery`] if the endpoint is unreachable, times
    /// out, or answers with a non-2xx status.
    pub async fn refresh(&self, issuer: &Issuer) -> Result<Arc<KeySet>> {
        let lock = self.refresh_lock(issuer.pool_id());
        let _guard = lock.lock().await;
        self.fetch_and_store(issuer).await
    }

    /// Refresh after a lookup miss against `seen` (the set the caller looked
    /// at, or `None` if the issuer was not cached).
    ///
    /// If another task replaced the set while this one waited for the
    /// per-issuer lock, the newer set is returned without another fetch.
    pub(crate) async fn refresh_after_miss(
        &self,
        issuer: &Issuer,
        seen: Option<&Arc<KeySet>>,
    ) -> Result<Arc<KeySet>> {
        let lock = self.refresh_lock(issuer.pool_id());
        let _guard = lock.lock().await;

        let current = self.get(issuer.pool_id());
        match (current, seen) {
            (Some(current), Some(seen)) if !Arc::ptr_eq(&current, seen) => return Ok(current),
            (Some(current), None) => return Ok(current),
            _ => {}
        }
        self.fetch_and_store(issuer).await
    }

    async fn fetch_and_store(&self, issuer: &Issuer) -> Result<Arc<KeySet>> {
        match self.source.fetch(issuer).await {
            Ok(set) => {
                let set = Arc::new(set);
                self.sets
                    .insert(issuer.pool_id().to_string(), Arc::clone(&set));
                self.stats.refreshes.fetch_add(1, Ordering::Relaxed);
                telemetry_metrics::counter!("jwks_refresh_total", "outcome" => "success").increment(1);
                audit::emit(&AuditEvent::keys_refreshed(issuer.pool_id(), set.len()));
                Ok(set)
            }
            Err(e) => {
                self.stats.refresh_failures.fetch_add(1, Ordering::Relaxed);
                telemetry_metrics::counter!("jwks_refresh_total", "outcome" => "failure").increment(1);
                let reason = match &e {
                    Error::KeyDiscovery { reason, body, .. } => match body {
                        Some(body) if !body.is_empty() => format!("{reason}: {body}"),
                        _ => reason.clone(),
                    },
                    other => other.to_string(),
                };
                audit::emit(&AuditEvent::discovery_failed(issuer.pool_id(), reason));
                self.forget_unknown(issuer.pool_id());
                Err(e)
            }
        }
    }

    fn refresh_lock(&self, pool_id: &str) -> Arc<Mutex<()>> {
        Arc::clone(
            self.refresh_locks
                .entry(pool_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        )
    }

    /// Drop the refresh lock of a pool that has no cached set, so unknown
    /// pool ids named by rejected tokens do not accumulate.
    fn forget_unknown(&self, pool_id: &str) {
        if !self.sets.contains_key(pool_id) {
            self.refresh_locks.remove(pool_id);
        }
    }

    #[cfg(test)]
    pub(crate) fn refresh_lock_count(&self) -> usize {
        self.refresh_locks.len()
    }

    pub(crate) fn record_hit(&self) {
        self.stats.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.stats.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Current counters
    #[must_use]
    pub fn stats(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            issuers: self.sets.len(),
            keys: self.sets.iter().map(|entry| entry.value().len()).sum(),
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            refreshes: self.stats.refreshes.load(Ordering::Relaxed),
            refresh_failures: self.stats.refresh_failures.load(Ordering::Relaxed),
        }
    }
}
