//! Visitor store trait for abstracting the TTL key/value backend.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use super::record::VisitorRecord;
use crate::config::StoreConfig;
use crate::error::{Result, ThrottlerError};

/// A key/value store with per-key expiry.
///
/// A `get` followed by a `put` is not expected to be atomic. Implementations
/// must report unreachable backends as errors instead of returning `None`.
#[async_trait]
pub trait VisitorStore: Send + Sync {
    /// Fetch the record stored under `key`, if it has not expired.
    async fn get(&self, key: &str) -> Result<Option<VisitorRecord>>;

    /// Store `record` under `key`, discarding it once `ttl` has elapsed.
    async fn put(&self, key: &str, record: &VisitorRecord, ttl: Duration) -> Result<()>;
}

#[async_trait]
impl<S: VisitorStore + ?Sized> VisitorStore for Arc<S> {
    async fn get(&self, key: &str) -> Result<Option<VisitorRecord>> {
        (**self).get(key).await
    }

    async fn put(&self, key: &str, record: &VisitorRecord, ttl: Duration) -> Result<()> {
        (**self).put(key, record, ttl).await
    }
}

/// Wrap `inner` according to the store configuration.
pub fn configured_store<S: VisitorStore + 'static>(
    inner: S,
    config: &StoreConfig,
) -> Arc<dyn VisitorStore> {
    match config.timeout_ms {
        Some(ms) => Arc::new(TimeoutStore::new(inner, Duration::from_millis(ms))),
        None => Arc::new(inner),
    }
}

/// Bounds every call to the wrapped store by a deadline.
pub struct TimeoutStore<S> {
    inner: S,
    timeout: Duration,
}

impl<S: VisitorStore> TimeoutStore<S> {
    pub fn new(inner: S, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn elapsed(&self, op: &str, key: &str) -> ThrottlerError {
        let timeout_ms = self.timeout.as_millis() as u64;
        warn!(op = op, key = %key, timeout_ms = timeout_ms, "Visitor store timed out");
        ThrottlerError::StoreTimeout(timeout_ms)
    }
}

#[async_trait]
impl<S: VisitorStore> VisitorStore for TimeoutStore<S> {
    async fn get(&self, key: &str) -> Result<Option<VisitorRecord>> {
        tokio::time::timeout(self.timeout, self.inner.get(key))
            .await
            .map_err(|_| self.elapsed("get", key))?
    }

    async fn put(&self, key: &str, record: &VisitorRecord, ttl: Duration) -> Result<()> {
        tokio::time::timeout(self.timeout, self.inner.put(key, record, ttl))
            .await
            .map_err(|_| self.elapsed("put", key))?
    }
}
