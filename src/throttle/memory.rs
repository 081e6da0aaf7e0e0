//! In-memory visitor store.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::trace;

use super::clock::{Clock, SystemClock};
use super::record::VisitorRecord;
use super::store::VisitorStore;
use crate::config::StoreConfig;
use crate::error::Result;

/// How often `put` sweeps expired entries unless configured otherwise.
const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

struct Entry {
    payload: String,
    expires_at_ms: i64,
}

/// A process-local store holding serialized records with per-key expiry.
///
/// Records are kept as JSON payloads, the same shape a shared cache would
/// hold, so decoding failures surface here as they would against a real
/// backend. Data is lost on process restart.
///
/// Expired entries are evicted when read, and `put` sweeps the whole map at
/// most once per cleanup interval so identifiers that never return do not
/// accumulate.
pub struct InMemoryVisitorStore {
    entries: DashMap<String, Entry>,
    clock: Arc<dyn Clock>,
    writes: AtomicU64,
    cleanup_interval_ms: i64,
    last_cleanup_ms: AtomicI64,
}

impl InMemoryVisitorStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a store whose expiry follows the given clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        let now_ms = clock.now().timestamp_millis();
        Self {
            entries: DashMap::new(),
            clock,
            writes: AtomicU64::new(0),
            cleanup_interval_ms: duration_ms(DEFAULT_CLEANUP_INTERVAL),
            last_cleanup_ms: AtomicI64::new(now_ms),
        }
    }

    /// Create a store using the cleanup interval from `config`.
    pub fn from_config(config: &StoreConfig, clock: Arc<dyn Clock>) -> Self {
        Self::with_clock(clock)
            .with_cleanup_interval(Duration::from_secs(config.cleanup_interval_secs))
    }

    /// Set the minimum time between sweeps of expired entries.
    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval_ms = duration_ms(interval);
        self
    }

    /// Number of successful `put` calls so far.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Number of entries currently held, including expired ones not yet evicted.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every expired entry.
    pub fn purge_expired(&self) {
        self.purge_at(self.clock.now().timestamp_millis());
    }

    fn purge_at(&self, now_ms: i64) {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at_ms > now_ms);
        trace!(
            evicted = before.saturating_sub(self.entries.len()),
            "Purged expired visitor records"
        );
    }

    /// Sweep if the cleanup interval has passed since the last sweep.
    fn maybe_purge(&self, now_ms: i64) {
        let last = self.last_cleanup_ms.load(Ordering::Acquire);
        if now_ms.saturating_sub(last) < self.cleanup_interval_ms {
            return;
        }

        // Only the caller that wins the stamp update sweeps.
        if self
            .last_cleanup_ms
            .compare_exchange(last, now_ms, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.purge_at(now_ms);
        }
    }

    /// Clear all entries.
    pub fn clear(&self) {
        self.entries.clear();
    }
}

impl Default for InMemoryVisitorStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VisitorStore for InMemoryVisitorStore {
    async fn get(&self, key: &str) -> Result<Option<VisitorRecord>> {
        let now_ms = self.clock.now().timestamp_millis();

        // The shard guard must be released before evicting.
        let (payload, expired) = match self.entries.get(key) {
            Some(entry) => (entry.payload.clone(), entry.expires_at_ms <= now_ms),
            None => return Ok(None),
        };

        if expired {
            self.entries
                .remove_if(key, |_, entry| entry.expires_at_ms <= now_ms);
            trace!(key = %key, "Evicted expired visitor record");
            return Ok(None);
        }

        VisitorRecord::from_json(&payload).map(Some)
    }

    async fn put(&self, key: &str, record: &VisitorRecord, ttl: Duration) -> Result<()> {
        let payload = record.to_json()?;
        let now_ms = self.clock.now().timestamp_millis();
        let expires_at_ms = now_ms.saturating_add(duration_ms(ttl));

        self.entries.insert(
            key.to_string(),
            Entry {
                payload,
                expires_at_ms,
            },
        );
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.maybe_purge(now_ms);

        Ok(())
    }
}

fn duration_ms(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}
