//! Bounded, time-aware cache of resolution results.
//!
//! ## Semantics
//!
//! | Operation        | Effect                                                     |
//! |------------------|------------------------------------------------------------|
//! | `get`            | miss if absent, expired (removed, `expired += 1`) or stale |
//! | `put`            | insert or overwrite; evicts the LRU entry when full        |
//! | `purge_expired`  | drop every expired entry at once                           |
//! | `clear`          | drop everything (project edits call this)                  |
//!
//! Entries are handed out as snapshots; callers never see the live map.
//!
//! Recency is tracked with a monotonic access counter rather than wall-clock
//! timestamps, so two accesses within the same clock tick still order
//! deterministically.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::debug;

use crate::lookup::LookupKind;
use crate::syntax::{Location, SymbolNode};

/// Deterministic identity of a lookup.
///
/// Same file, same position, same lookup kind and same file content produce
/// the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct CacheKey {
    path: PathBuf,
    line: u32,
    column: u32,
    kind: LookupKind,
    fingerprint: Option<u64>,
}

impl CacheKey {
    /// Key for a position without a content fingerprint.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, line: u32, column: u32, kind: LookupKind) -> Self {
        Self {
            path: path.into(),
            line,
            column,
            kind,
            fingerprint: None,
        }
    }

    /// Qualify the key with the content fingerprint of its file.
    #[must_use]
    pub fn with_fingerprint(mut self, fingerprint: u64) -> Self {
        self.fingerprint = Some(fingerprint);
        self
    }

    /// Key for a symbol occurrence, qualified by its file's fingerprint.
    #[must_use]
    pub fn for_node(node: &SymbolNode, kind: LookupKind) -> Self {
        Self::new(node.path(), node.line(), node.column(), kind).with_fingerprint(node.fingerprint())
    }

    /// File the key refers to.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 1-indexed line.
    #[must_use]
    pub fn line(&self) -> u32 {
        self.line
    }

    /// 1-indexed column.
    #[must_use]
    pub fn column(&self) -> u32 {
        self.column
    }

    /// Lookup kind.
    #[must_use]
    pub fn kind(&self) -> LookupKind {
        self.kind
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.path.display(),
            self.line,
            self.column,
            self.kind
        )?;
        if let Some(fingerprint) = self.fingerprint {
            write!(f, "@{fingerprint:016x}")?;
        }
        Ok(())
    }
}

/// Snapshot of a cached resolution.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    locations: Arc<Vec<Location>>,
    created_at: Instant,
    last_accessed: Instant,
    access_count: u64,
    ttl: Duration,
    fingerprints: BTreeMap<PathBuf, u64>,
    recency: u64,
}

impl CacheEntry {
    /// Resolved locations.
    #[must_use]
    pub fn locations(&self) -> &[Location] {
        &self.locations
    }

    /// When the entry was stored.
    #[must_use]
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// When the entry was last read (or stored).
    #[must_use]
    pub fn last_accessed(&self) -> Instant {
        self.last_accessed
    }

    /// Number of reads plus the initial store.
    #[must_use]
    pub fn access_count(&self) -> u64 {
        self.access_count
    }

    /// Time-to-live of this entry.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Content fingerprints of the files the result mentions.
    #[must_use]
    pub fn fingerprints(&self) -> &BTreeMap<PathBuf, u64> {
        &self.fingerprints
    }

    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) > self.ttl
    }
}

/// Read-only cache statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Live entries (expired ones not yet read still count)
    pub entries: usize,
    /// Successful reads since creation or `clear`
    pub accesses: u64,
    /// Entries dropped because their TTL elapsed
    pub expired: u64,
    /// Entries dropped because a referenced file changed
    pub stale: u64,
    /// Entries dropped to make room
    pub evicted: u64,
    /// Capacity
    pub max_entries: usize,
    /// Default TTL
    pub ttl: Duration,
}

impl CacheStats {
    /// Hit percentage against a query total; 0 when there were no queries.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_rate(&self, total_queries: u64) -> f64 {
        if total_queries == 0 {
            return 0.0;
        }
        self.accesses as f64 / total_queries as f64 * 100.0
    }
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<CacheKey, CacheEntry>,
    tick: u64,
    accesses: u64,
    expired: u64,
    stale: u64,
    evicted: u64,
}

impl CacheState {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn evict_least_recent(&mut self) {
        let victim = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.recency)
            .map(|(key, _)| key.clone());

        if let Some(key) = victim {
            self.entries.remove(&key);
            self.evicted += 1;
            debug!(key = %key, "Evicted least recently used cache entry");
        }
    }
}

/// Per-project resolution cache.
///
/// Thread-safe; all methods take `&self`. A poisoned lock is recovered, since
/// every mutation leaves the map consistent before it can panic.
#[derive(Debug)]
pub struct ResolutionCache {
    state: RwLock<CacheState>,
    max_entries: usize,
    ttl: Duration,
}

impl ResolutionCache {
    /// Create a cache holding at most `max_entries` entries for `ttl` each.
    #[must_use]
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        Self {
            state: RwLock::new(CacheState::default()),
            max_entries,
            ttl,
        }
    }

    /// Read an entry, dropping it if its TTL has elapsed.
    #[must_use]
    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.get_current(key, |_, _| true)
    }

    /// Read an entry, also dropping it if `is_current` rejects any recorded
    /// file fingerprint.
    pub fn get_current<F>(&self, key: &CacheKey, is_current: F) -> Option<CacheEntry>
    where
        F: Fn(&Path, u64) -> bool,
    {
        let now = Instant::now();
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);

        let entry = state.entries.get(key)?;

        if entry.is_expired(now) {
            state.entries.remove(key);
            state.expired += 1;
            debug!(key = %key, "Cache entry expired");
            return None;
        }

        if !entry
            .fingerprints
            .iter()
            .all(|(path, fingerprint)| is_current(path, *fingerprint))
        {
            state.entries.remove(key);
            state.stale += 1;
            debug!(key = %key, "Cache entry refers to changed files");
            return None;
        }

        let tick = state.next_tick();
        state.accesses += 1;

        let entry = state.entries.get_mut(key)?;
        entry.last_accessed = now;
        entry.access_count += 1;
        entry.recency = tick;
        Some(entry.clone())
    }

    /// Store a result with the default TTL.
    pub fn put(&self, key: CacheKey, locations: Vec<Location>) {
        self.put_with_fingerprints(key, locations, BTreeMap::new());
    }

    /// Store a result along with the fingerprints of the files it mentions.
    pub fn put_with_fingerprints(
        &self,
        key: CacheKey,
        locations: Vec<Location>,
        fingerprints: BTreeMap<PathBuf, u64>,
    ) {
        if self.max_entries == 0 {
            return;
        }

        let now = Instant::now();
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);

        if !state.entries.contains_key(&key) && state.entries.len() >= self.max_entries {
            state.evict_least_recent();
        }

        let tick = state.next_tick();
        debug!(key = %key, locations = locations.len(), "Caching resolution");
        state.entries.insert(
            key,
            CacheEntry {
                locations: Arc::new(locations),
                created_at: now,
                last_accessed: now,
                access_count: 1,
                ttl: self.ttl,
                fingerprints,
                recency: tick,
            },
        );
    }

    /// Remove every expired entry, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);

        let before = state.entries.len();
        state.entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before - state.entries.len();

        state.expired += removed as u64;
        if removed > 0 {
            debug!(removed, "Purged expired cache entries");
        }
        removed
    }

    /// Remove all entries and reset counters.
    pub fn clear(&self) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        *state = CacheState::default();
    }

    /// Current statistics.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        CacheStats {
            entries: state.entries.len(),
            accesses: state.accesses,
            expired: state.expired,
            stale: state.stale,
            evicted: state.evicted,
            max_entries: self.max_entries,
            ttl: self.ttl,
        }
    }

    /// Number of entries currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }

    /// Whether the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
