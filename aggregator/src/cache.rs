//! Time-boxed store of aggregated records.
//!
//! An entry past its `expires_at` is a miss and is dropped on the read that
//! notices it. Entries nobody reads again are evicted by moka once their TTL
//! runs out or the cache is full. Reads never extend the TTL and writes
//! replace the whole entry.

use crate::clock::Clock;
use crate::record::AggregatedRecord;
use crate::types::SubjectId;
use chrono::{DateTime, TimeDelta, Utc};
use moka::Expiry;
use moka::ops::compute::Op;
use moka::sync::Cache;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const GLOBAL_KEY: &str = "analytics:global";

/// Upper bound on a single entry's lifetime
const MAX_ENTRY_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

pub fn subject_key(subject: &SubjectId) -> String {
    format!("analytics:user:{subject}")
}

pub fn feed_key(subject: &SubjectId, limit: usize) -> String {
    format!("feed:user:{subject}:{limit}")
}

#[derive(thiserror::Error, Debug)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),
}

pub trait ResultCache: Send + Sync {
    /// Returns the record stored under `key` unless it is absent or expired.
    fn get(&self, key: &str) -> Result<Option<AggregatedRecord>, CacheError>;

    /// Stores `value` under `key` for `ttl`, replacing any previous entry.
    fn put(&self, key: &str, value: AggregatedRecord, ttl: Duration) -> Result<(), CacheError>;
}

#[derive(Debug)]
pub struct CacheEntry {
    pub value: AggregatedRecord,
    pub expires_at: DateTime<Utc>,
    ttl: Duration,
}

/// Lets moka evict every entry after its own TTL, read or not.
struct EntryTtl;

impl Expiry<String, Arc<CacheEntry>> for EntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        entry: &Arc<CacheEntry>,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(entry.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        entry: &Arc<CacheEntry>,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(entry.ttl)
    }
}

/// In-process [`ResultCache`] bounded to `max_entries`.
///
/// Freshness is decided against the injected [`Clock`]; moka's own expiry
/// and size bound only reclaim memory.
pub struct MemoryCache {
    entries: Cache<String, Arc<CacheEntry>>,
    clock: Arc<dyn Clock>,
}

impl MemoryCache {
    pub fn new(clock: Arc<dyn Clock>, max_entries: u64) -> Self {
        let entries = Cache::builder()
            .max_capacity(max_entries)
            .expire_after(EntryTtl)
            .build();

        MemoryCache { entries, clock }
    }

    #[cfg(test)]
    pub fn len(&self) -> u64 {
        self.entries.run_pending_tasks();
        self.entries.entry_count()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ResultCache for MemoryCache {
    fn get(&self, key: &str) -> Result<Option<AggregatedRecord>, CacheError> {
        let now = self.clock.now();

        let Some(entry) = self.entries.get(key) else {
            return Ok(None);
        };

        if now < entry.expires_at {
            return Ok(Some(entry.value.clone()));
        }

        // Only drop the entry we saw; a concurrent writer may have replaced it
        let _ = self
            .entries
            .entry_by_ref(key)
            .and_compute_with(|current| match current {
                Some(current) if Arc::ptr_eq(current.value(), &entry) => Op::Remove,
                _ => Op::Nop,
            });

        Ok(None)
    }

    fn put(&self, key: &str, value: AggregatedRecord, ttl: Duration) -> Result<(), CacheError> {
        let now = self.clock.now();
        let ttl = ttl.min(MAX_ENTRY_TTL);
        let expires_at = TimeDelta::from_std(ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        let entry = Arc::new(CacheEntry {
            value,
            expires_at,
            ttl,
        });
        self.entries.insert(key.to_string(), entry);
        Ok(())
    }
}
