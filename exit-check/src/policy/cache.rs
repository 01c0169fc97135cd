//! Per-port memoization of resolved rule sequences
//!
//! A [`PortCache`] belongs to exactly one generation and is dropped with it,
//! so a reload always starts from an empty cache. Entries are filled lazily by
//! readers; concurrent misses on the same port may both compute, and the
//! first stored sequence wins. Both computations are equal, so this is never
//! observable beyond the duplicated work.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use super::matcher::MatchRule;

/// Resolved rules for one port, in canonical order
pub type ResolvedRules = Arc<[MatchRule]>;

/// Statistics for the port cache
#[derive(Debug, Default)]
pub struct PortCacheStats {
    /// Lookups answered from the cache
    pub hits: AtomicU64,
    /// Lookups that had to resolve
    pub misses: AtomicU64,
}

impl PortCacheStats {
    /// Get a snapshot of current stats
    #[must_use]
    pub fn snapshot(&self) -> PortCacheStatsSnapshot {
        PortCacheStatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of cache statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortCacheStatsSnapshot {
    /// Lookups answered from the cache
    pub hits: u64,
    /// Lookups that had to resolve
    pub misses: u64,
}

impl PortCacheStatsSnapshot {
    /// Fraction of lookups answered from the cache
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Port-keyed cache of resolved rule sequences
#[derive(Debug, Default)]
pub struct PortCache {
    entries: DashMap<u16, ResolvedRules>,
    stats: PortCacheStats,
}

impl PortCache {
    /// Create an empty cache
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached sequence for `port`, resolving it on a miss
    ///
    /// `resolve` runs without holding any cache lock.
    pub fn get_or_resolve(&self, port: u16, resolve: impl FnOnce() -> Vec<MatchRule>) -> ResolvedRules {
        if let Some(hit) = self.entries.get(&port) {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(port, rules = hit.len(), "port cache hit");
            return Arc::clone(hit.value());
        }

        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        let resolved: ResolvedRules = resolve().into();
        tracing::debug!(port, rules = resolved.len(), "port cache miss, resolved");

        Arc::clone(self.entries.entry(port).or_insert(resolved).value())
    }

    /// Look up `port` without resolving
    #[must_use]
    pub fn get(&self, port: u16) -> Option<ResolvedRules> {
        self.entries.get(&port).map(|e| Arc::clone(e.value()))
    }

    /// Number of cached ports
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if nothing is cached
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Cache statistics
    #[must_use]
    pub fn stats(&self) -> PortCacheStatsSnapshot {
        self.stats.snapshot()
    }
}
