//! A thread-safe in-memory cache of flag evaluation results. [`FlagCache`] is shared between
//! readers (flag evaluation) and writers (API fetches and the background refresh thread).
//!
//! The cache holds two kinds of data:
//! - per-flag entries, keyed by flag key and optional target id, holding the value returned by
//!   the single-flag endpoint;
//! - a bulk snapshot of all flag metadata, used to evaluate flags locally.
//!
//! Both expire after the configured TTL. Expired entries are kept until they are evicted or
//! refreshed, so they can still serve as a stale fallback.
use std::{
    collections::HashMap,
    mem::size_of,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use chrono::{DateTime, TimeDelta, Utc};

use crate::FlagMetadata;

/// Cache statistics returned by [`Client::cache_stats`](crate::Client::cache_stats).
#[derive(Debug, Clone, PartialEq)]
pub struct CacheStats {
    /// Number of per-flag entries, including expired ones.
    pub size: usize,
    /// Fraction of lookups served from the cache, `0.0` if there were no lookups.
    pub hit_rate: f64,
    /// Number of per-flag entries whose TTL has elapsed.
    pub expired_entries: usize,
    /// Rough estimate of the memory held by the cache, in bytes.
    pub memory_usage: usize,
    /// Number of lookups served from the cache.
    pub hits: u64,
    /// Number of lookups that had to go to the API.
    pub misses: u64,
}

/// Cache state of a single flag, returned by [`Client::debug_flag`](crate::Client::debug_flag).
#[derive(Debug, Clone, PartialEq)]
pub struct FlagDebugInfo {
    /// The flag key that was inspected.
    pub flag_key: String,
    /// Whether a (possibly expired) value is cached.
    pub cached: bool,
    /// Cached value, if any.
    pub value: Option<bool>,
    /// When the value was fetched.
    pub cached_at: Option<DateTime<Utc>>,
    /// When the value expires.
    pub expires_at: Option<DateTime<Utc>>,
    /// Remaining lifetime; `Some(Duration::ZERO)` once expired.
    pub time_until_expiry: Option<Duration>,
    /// When the value was last served from the cache.
    pub last_accessed: Option<DateTime<Utc>>,
}

/// Result of a cache lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Lookup {
    Fresh(bool),
    /// The entry outlived its TTL. Holds the last fetched value.
    Expired(bool),
    Missing,
}

/// Entries are keyed by the flag and target pair itself, so flag keys may contain any character.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    flag_key: String,
    target_id: Option<String>,
}

impl CacheKey {
    fn new(flag_key: &str, target_id: Option<&str>) -> CacheKey {
        CacheKey {
            flag_key: flag_key.to_owned(),
            target_id: target_id.map(str::to_owned),
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: bool,
    cached_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    last_accessed: DateTime<Utc>,
}

impl CacheEntry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug)]
struct BulkSnapshot {
    flags: Arc<HashMap<String, FlagMetadata>>,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<CacheKey, CacheEntry>,
    bulk: Option<BulkSnapshot>,
    hits: u64,
    misses: u64,
}

pub(crate) struct FlagCache {
    ttl: TimeDelta,
    max_size: usize,
    state: Mutex<CacheState>,
}

/// Convert a `std` duration, saturating at a century (effectively "never").
fn to_time_delta(duration: Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or_else(|_| TimeDelta::weeks(52 * 100))
}

fn deadline(now: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    now.checked_add_signed(to_time_delta(window))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

impl FlagCache {
    pub(crate) fn new(ttl: Duration, max_size: usize) -> FlagCache {
        FlagCache {
            ttl: to_time_delta(ttl),
            max_size,
            state: Mutex::new(CacheState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, CacheState> {
        // Err() is possible only if the lock is poisoned (a thread panicked while holding the
        // lock), which should never happen.
        self.state
            .lock()
            .expect("thread holding cache lock should not panic")
    }

    fn expiry(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_add_signed(self.ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Look up a flag value, recording a hit or a miss.
    pub(crate) fn get(
        &self,
        flag_key: &str,
        target_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Lookup {
        let mut state = self.state();
        let lookup = match state.entries.get_mut(&CacheKey::new(flag_key, target_id)) {
            Some(entry) if entry.is_expired(now) => Lookup::Expired(entry.value),
            Some(entry) => {
                entry.last_accessed = now;
                Lookup::Fresh(entry.value)
            }
            None => Lookup::Missing,
        };
        match lookup {
            Lookup::Fresh(_) => state.hits += 1,
            Lookup::Expired(_) | Lookup::Missing => state.misses += 1,
        }
        lookup
    }

    /// Store a freshly fetched value, evicting the least recently used entry if the cache is full.
    pub(crate) fn insert(
        &self,
        flag_key: &str,
        target_id: Option<&str>,
        value: bool,
        now: DateTime<Utc>,
    ) {
        if self.max_size == 0 {
            return;
        }

        let key = CacheKey::new(flag_key, target_id);
        let expires_at = self.expiry(now);
        let mut state = self.state();

        if !state.entries.contains_key(&key) && state.entries.len() >= self.max_size {
            state.entries.retain(|_, entry| !entry.is_expired(now));
            while state.entries.len() >= self.max_size {
                let Some(lru_key) = state
                    .entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.last_accessed)
                    .map(|(key, _)| key.clone())
                else {
                    break;
                };
                log::trace!(target: "flagvault",
                            flag_key = lru_key.flag_key.as_str(),
                            target_id = lru_key.target_id.as_deref();
                            "evicting least recently used cache entry");
                state.entries.remove(&lru_key);
            }
        }

        state.entries.insert(
            key,
            CacheEntry {
                value,
                cached_at: now,
                expires_at,
                last_accessed: now,
            },
        );
    }

    /// Look up a flag in the bulk snapshot. Returns `None` if there is no fresh snapshot or the
    /// flag is not part of it. A snapshot hit is recorded as a cache hit.
    pub(crate) fn bulk_flag(&self, flag_key: &str, now: DateTime<Utc>) -> Option<FlagMetadata> {
        let mut state = self.state();
        let flag = match &state.bulk {
            Some(bulk) if now < bulk.expires_at => bulk.flags.get(flag_key).cloned(),
            _ => None,
        };
        if flag.is_some() {
            state.hits += 1;
        }
        flag
    }

    /// Return the bulk snapshot if it is still fresh.
    pub(crate) fn all_flags(
        &self,
        now: DateTime<Utc>,
    ) -> Option<Arc<HashMap<String, FlagMetadata>>> {
        match &self.state().bulk {
            Some(bulk) if now < bulk.expires_at => Some(bulk.flags.clone()),
            _ => None,
        }
    }

    pub(crate) fn set_all_flags(
        &self,
        flags: Arc<HashMap<String, FlagMetadata>>,
        now: DateTime<Utc>,
    ) {
        let expires_at = self.expiry(now);
        self.state().bulk = Some(BulkSnapshot { flags, expires_at });
    }

    /// Keys of untargeted entries that expire within `window` of `now` (already expired entries
    /// included).
    pub(crate) fn expiring_flags(&self, now: DateTime<Utc>, window: Duration) -> Vec<String> {
        let deadline = deadline(now, window);
        self.state()
            .entries
            .iter()
            .filter(|(key, entry)| key.target_id.is_none() && entry.expires_at <= deadline)
            .map(|(key, _)| key.flag_key.clone())
            .collect()
    }

    /// Whether a bulk snapshot exists and expires within `window` of `now`.
    pub(crate) fn bulk_expiring(&self, now: DateTime<Utc>, window: Duration) -> bool {
        let deadline = deadline(now, window);
        matches!(&self.state().bulk, Some(bulk) if bulk.expires_at <= deadline)
    }

    pub(crate) fn stats(&self, now: DateTime<Utc>) -> CacheStats {
        let state = self.state();

        let lookups = state.hits + state.misses;
        let hit_rate = if lookups == 0 {
            0.0
        } else {
            state.hits as f64 / lookups as f64
        };

        let entries_usage: usize = state
            .entries
            .iter()
            .map(|(key, _)| {
                key.flag_key.len()
                    + key.target_id.as_ref().map_or(0, String::len)
                    + size_of::<CacheKey>()
                    + size_of::<CacheEntry>()
            })
            .sum();
        let bulk_usage: usize = state.bulk.as_ref().map_or(0, |bulk| {
            bulk.flags
                .iter()
                .map(|(key, flag)| {
                    key.len()
                        + flag.key.len()
                        + flag.name.len()
                        + flag.rollout_seed.as_ref().map_or(0, String::len)
                        + size_of::<FlagMetadata>()
                })
                .sum()
        });

        CacheStats {
            size: state.entries.len(),
            hit_rate,
            expired_entries: state
                .entries
                .values()
                .filter(|entry| entry.is_expired(now))
                .count(),
            memory_usage: entries_usage + bulk_usage,
            hits: state.hits,
            misses: state.misses,
        }
    }

    pub(crate) fn debug(&self, flag_key: &str, now: DateTime<Utc>) -> FlagDebugInfo {
        let state = self.state();
        match state.entries.get(&CacheKey::new(flag_key, None)) {
            Some(entry) => FlagDebugInfo {
                flag_key: flag_key.to_owned(),
                cached: true,
                value: Some(entry.value),
                cached_at: Some(entry.cached_at),
                expires_at: Some(entry.expires_at),
                time_until_expiry: Some(
                    (entry.expires_at - now).to_std().unwrap_or(Duration::ZERO),
                ),
                last_accessed: Some(entry.last_accessed),
            },
            None => FlagDebugInfo {
                flag_key: flag_key.to_owned(),
                cached: false,
                value: None,
                cached_at: None,
                expires_at: None,
                time_until_expiry: None,
                last_accessed: None,
            },
        }
    }

    /// Drop all entries, the bulk snapshot, and statistics.
    pub(crate) fn clear(&self) {
        *self.state() = CacheState::default();
    }
}
