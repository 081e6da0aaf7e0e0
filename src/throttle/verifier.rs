//! Core throttle verification.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, trace, warn};

use super::clock::{Clock, SystemClock};
use super::identity::ClientRecognizer;
use super::period::AttemptPeriod;
use super::record::VisitorRecord;
use super::result::VerificationResult;
use super::store::VisitorStore;
use crate::config::ThrottleConfig;
use crate::error::Result;

/// Limits in force for one verification after applying call-site overrides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EffectiveLimits {
    pub attempt_count: u64,
    pub period: AttemptPeriod,
}

/// Decides whether a visitor may proceed, keeping its counters in a
/// [`VisitorStore`].
///
/// The verifier holds no per-visitor state and can be shared across tasks.
/// The read and the write of one verification are separate store calls, so
/// two concurrent calls for the same identifier may both read the same count
/// and one increment can be lost. Calls for different identifiers never
/// interact.
pub struct ThrottleVerifier<S: ?Sized> {
    config: ThrottleConfig,
    clock: Arc<dyn Clock>,
    store: Arc<S>,
}

impl<S: VisitorStore + ?Sized> ThrottleVerifier<S> {
    /// Create a verifier over `store` using wall-clock time.
    pub fn new(store: Arc<S>, config: ThrottleConfig) -> Result<Self> {
        Self::with_clock(store, config, Arc::new(SystemClock))
    }

    /// Create a verifier with an explicit time source.
    ///
    /// Fails if the configured defaults are not usable limits.
    pub fn with_clock(
        store: Arc<S>,
        config: ThrottleConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            clock,
            store,
        })
    }

    pub fn config(&self) -> &ThrottleConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Current instant according to the verifier's clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Verify a raw identifier. Every call counts as a new request instance.
    pub async fn verify_client(
        &self,
        identifier: &str,
        permitted_attempt_count: Option<u64>,
        permitted_attempt_period: Option<u64>,
    ) -> Result<VerificationResult> {
        self.verify(
            identifier,
            permitted_attempt_count,
            permitted_attempt_period,
            None,
        )
        .await
    }

    /// Resolve the client behind `request` and verify it, de-duplicating on
    /// the request instance token the recognizer supplies.
    pub async fn verify_request<R, C>(
        &self,
        recognizer: &C,
        request: &R,
        permitted_attempt_count: Option<u64>,
        permitted_attempt_period: Option<u64>,
    ) -> Result<VerificationResult>
    where
        R: ?Sized + Sync,
        C: ClientRecognizer<R> + ?Sized,
    {
        let identity = recognizer.identify(request).await?;
        self.verify(
            &identity.identifier,
            permitted_attempt_count,
            permitted_attempt_period,
            identity.request_instance_id.as_deref(),
        )
        .await
    }

    /// Check `identifier` against its attempt limit and record the attempt
    /// if it is permitted.
    ///
    /// Overrides of `None` or zero fall back to the configured defaults.
    /// A permitted attempt restarts the window at now + period. A denied
    /// attempt leaves the stored record untouched. When `request_instance_id`
    /// matches the instance that last mutated the record, the attempt is not
    /// counted again.
    ///
    /// Store failures are returned as errors; the visitor is never treated as
    /// new because its record could not be read.
    pub async fn verify(
        &self,
        identifier: &str,
        permitted_attempt_count: Option<u64>,
        permitted_attempt_period: Option<u64>,
        request_instance_id: Option<&str>,
    ) -> Result<VerificationResult> {
        let limits = self.effective_limits(permitted_attempt_count, permitted_attempt_period);
        let fresh_reset_time = reset_time_after(self.clock.now(), limits.period);
        let key = self.config.storage_key(identifier);

        trace!(
            key = %key,
            limit = limits.attempt_count,
            period = %limits.period,
            "Verifying visitor"
        );

        let record = match self.store.get(&key).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                debug!(key = %key, reset_time = fresh_reset_time, "New visitor");
                VisitorRecord::new_visitor(fresh_reset_time)
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to read visitor record");
                return Err(e);
            }
        };

        let request_permitted = record.attempt_count < limits.attempt_count;

        let mut attempt_count = record.attempt_count.saturating_add(1);

        let reset_time = if !request_permitted {
            debug!(
                key = %key,
                count = record.attempt_count,
                limit = limits.attempt_count,
                "Attempt limit reached"
            );
            record.reset_time
        } else if record.is_duplicate_of(request_instance_id) {
            debug!(
                key = %key,
                request_instance_id = ?request_instance_id,
                "Request instance already counted"
            );
            // Already counted by its first verification.
            attempt_count = record.attempt_count;
            record.reset_time
        } else {
            let renewed = VisitorRecord {
                attempt_count: record.attempt_count.saturating_add(1),
                reset_time: fresh_reset_time,
                last_request_id: request_instance_id.map(str::to_string),
            };

            if let Err(e) = self.store.put(&key, &renewed, limits.period.duration()).await {
                warn!(key = %key, error = %e, "Failed to write visitor record");
                return Err(e);
            }

            trace!(
                key = %key,
                count = renewed.attempt_count,
                reset_time = fresh_reset_time,
                "Window renewed"
            );
            fresh_reset_time
        };

        Ok(VerificationResult {
            max_attempt_count: limits.attempt_count,
            attempt_count,
            reset_time,
            request_permitted,
        })
    }

    /// Apply call-site overrides; zero counts as "not overridden".
    pub fn effective_limits(
        &self,
        permitted_attempt_count: Option<u64>,
        permitted_attempt_period: Option<u64>,
    ) -> EffectiveLimits {
        let attempt_count = permitted_attempt_count
            .filter(|count| *count > 0)
            .unwrap_or(self.config.max_attempts);
        let magnitude = permitted_attempt_period
            .filter(|period| *period > 0)
            .unwrap_or(self.config.max_attempt_period);

        EffectiveLimits {
            attempt_count,
            period: AttemptPeriod::new(magnitude, self.config.ttl_units),
        }
    }
}

/// Epoch seconds of `now + period`, rounded down.
fn reset_time_after(now: DateTime<Utc>, period: AttemptPeriod) -> i64 {
    let period_ms = i64::try_from(period.duration().as_millis()).unwrap_or(i64::MAX);
    now.timestamp_millis()
        .saturating_add(period_ms)
        .div_euclid(1000)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ThrottlerError;
    use crate::throttle::clock::ManualClock;
    use crate::throttle::identity::ClientIdentity;
    use crate::throttle::memory::InMemoryVisitorStore;
    use crate::throttle::period::TimeUnit;
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};

    const START: i64 = 1_700_000_000;

    struct Harness {
        clock: Arc<ManualClock>,
        store: Arc<InMemoryVisitorStore>,
        verifier: ThrottleVerifier<InMemoryVisitorStore>,
    }

    fn harness(max_attempts: u64, period: u64, unit: TimeUnit) -> Harness {
        let clock = Arc::new(ManualClock::at_timestamp(START));
        let store = Arc::new(InMemoryVisitorStore::with_clock(clock.clone()));
        let config = ThrottleConfig {
            max_attempts,
            max_attempt_period: period,
            ttl_units: unit,
            cache_storage: "test".to_string(),
        };
        let verifier = ThrottleVerifier::with_clock(store.clone(), config, clock.clone()).unwrap();
        Harness {
            clock,
            store,
            verifier,
        }
    }

    async fn stored(h: &Harness, identifier: &str) -> Option<VisitorRecord> {
        h.store.get(&format!("test:{}", identifier)).await.unwrap()
    }

    #[tokio::test]
    async fn test_first_call_is_permitted() {
        let h = harness(3, 1, TimeUnit::Minute);

        let result = h.verifier.verify_client("visitor", None, None).await.unwrap();

        assert!(result.request_permitted);
        assert_eq!(result.attempt_count, 1);
        assert_eq!(result.max_attempt_count, 3);
        assert_eq!(result.reset_time, START + 60);
    }

    #[tokio::test]
    async fn test_limit_sequence() {
        let h = harness(3, 1, TimeUnit::Minute);

        for expected in 1..=3 {
            let result = h.verifier.verify_client("visitor", None, None).await.unwrap();
            assert!(result.request_permitted, "Request {} should be permitted", expected);
            assert_eq!(result.attempt_count, expected);
        }

        let result = h.verifier.verify_client("visitor", None, None).await.unwrap();
        assert!(!result.request_permitted);
        assert_eq!(result.attempt_count, 4);
        assert_eq!(result.remaining(), 0);

        let record = stored(&h, "visitor").await.unwrap();
        assert_eq!(record.attempt_count, 3);
    }

    #[tokio::test]
    async fn test_denial_does_not_write() {
        let h = harness(2, 1, TimeUnit::Minute);
        h.verifier.verify_client("visitor", None, None).await.unwrap();
        h.verifier.verify_client("visitor", None, None).await.unwrap();
        let before = stored(&h, "visitor").await.unwrap();
        assert_eq!(h.store.write_count(), 2);

        for _ in 0..5 {
            h.clock.advance(Duration::from_secs(5));
            let result = h.verifier.verify_client("visitor", None, None).await.unwrap();
            assert!(!result.request_permitted);
            assert_eq!(result.attempt_count, 3);
            assert_eq!(result.reset_time, before.reset_time);
        }

        assert_eq!(h.store.write_count(), 2);
        assert_eq!(stored(&h, "visitor").await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_permitted_call_renews_window() {
        let h = harness(5, 1, TimeUnit::Minute);

        h.verifier.verify_client("visitor", None, None).await.unwrap();
        assert_eq!(stored(&h, "visitor").await.unwrap().reset_time, START + 60);

        h.clock.advance(Duration::from_secs(40));
        let result = h.verifier.verify_client("visitor", None, None).await.unwrap();
        assert_eq!(result.reset_time, START + 100);
        assert_eq!(stored(&h, "visitor").await.unwrap().reset_time, START + 100);

        // Past the first window's reset time, but the renewed record is still live.
        h.clock.advance(Duration::from_secs(40));
        let result = h.verifier.verify_client("visitor", None, None).await.unwrap();
        assert_eq!(result.attempt_count, 3);
        assert_eq!(result.reset_time, START + 140);
    }

    #[tokio::test]
    async fn test_expiry_behaves_like_first_call() {
        let h = harness(2, 30, TimeUnit::Second);
        h.verifier.verify_client("visitor", None, None).await.unwrap();
        h.verifier.verify_client("visitor", None, None).await.unwrap();
        assert!(!h.verifier.verify_client("visitor", None, None).await.unwrap().request_permitted);

        h.clock.advance(Duration::from_secs(30));
        let result = h.verifier.verify_client("visitor", None, None).await.unwrap();

        assert!(result.request_permitted);
        assert_eq!(result.attempt_count, 1);
        assert_eq!(result.reset_time, START + 60);
    }

    #[tokio::test]
    async fn test_duplicate_instance_counted_once() {
        let h = harness(3, 1, TimeUnit::Minute);

        let first = h.verifier.verify("visitor", None, None, Some("req-1")).await.unwrap();
        h.clock.advance(Duration::from_secs(10));
        let second = h.verifier.verify("visitor", None, None, Some("req-1")).await.unwrap();

        assert!(first.request_permitted);
        assert!(second.request_permitted);
        assert_eq!(h.store.write_count(), 1);
        assert_eq!(second.attempt_count, first.attempt_count);
        assert_eq!(second.reset_time, first.reset_time);
        assert_eq!(stored(&h, "visitor").await.unwrap().attempt_count, 1);

        // The next distinct request is counted.
        let third = h.verifier.verify("visitor", None, None, Some("req-2")).await.unwrap();
        assert_eq!(third.attempt_count, 2);
        assert_eq!(h.store.write_count(), 2);
        assert_eq!(
            stored(&h, "visitor").await.unwrap().last_request_id.as_deref(),
            Some("req-2")
        );
    }

    #[tokio::test]
    async fn test_duplicate_reports_same_counters() {
        let h = harness(3, 1, TimeUnit::Minute);
        h.verifier.verify("visitor", None, None, Some("req-0")).await.unwrap();

        let first = h.verifier.verify("visitor", None, None, Some("req-1")).await.unwrap();
        let second = h.verifier.verify("visitor", None, None, Some("req-1")).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(second.attempt_count, 2);
        assert_eq!(second.remaining(), 1);
        assert_eq!(stored(&h, "visitor").await.unwrap().attempt_count, 2);
    }

    #[tokio::test]
    async fn test_missing_instance_disables_dedup() {
        let h = harness(5, 1, TimeUnit::Minute);

        h.verifier.verify("visitor", None, None, None).await.unwrap();
        h.verifier.verify("visitor", None, None, None).await.unwrap();

        assert_eq!(h.store.write_count(), 2);
        assert_eq!(stored(&h, "visitor").await.unwrap().attempt_count, 2);
    }

    #[tokio::test]
    async fn test_duplicate_is_still_denied_at_limit() {
        let h = harness(1, 1, TimeUnit::Minute);

        h.verifier.verify("visitor", None, None, Some("req-1")).await.unwrap();
        let again = h.verifier.verify("visitor", None, None, Some("req-1")).await.unwrap();

        assert!(!again.request_permitted);
        assert_eq!(h.store.write_count(), 1);
    }

    #[tokio::test]
    async fn test_overrides_replace_defaults() {
        let h = harness(100, 1, TimeUnit::Minute);

        let result = h.verifier.verify_client("visitor", Some(2), Some(10)).await.unwrap();
        assert_eq!(result.max_attempt_count, 2);
        assert_eq!(result.reset_time, START + 600);

        h.verifier.verify_client("visitor", Some(2), Some(10)).await.unwrap();
        let result = h.verifier.verify_client("visitor", Some(2), Some(10)).await.unwrap();
        assert!(!result.request_permitted);
    }

    #[tokio::test]
    async fn test_zero_overrides_fall_back_to_defaults() {
        let h = harness(4, 2, TimeUnit::Minute);

        let limits = h.verifier.effective_limits(Some(0), Some(0));
        assert_eq!(limits.attempt_count, 4);
        assert_eq!(limits.period, AttemptPeriod::new(2, TimeUnit::Minute));

        let result = h.verifier.verify_client("visitor", Some(0), Some(0)).await.unwrap();
        assert!(result.request_permitted);
        assert_eq!(result.max_attempt_count, 4);
        assert_eq!(result.reset_time, START + 120);
    }

    #[tokio::test]
    async fn test_identifiers_are_independent() {
        let h = harness(1, 1, TimeUnit::Minute);

        assert!(h.verifier.verify_client("a", None, None).await.unwrap().request_permitted);
        assert!(!h.verifier.verify_client("a", None, None).await.unwrap().request_permitted);
        assert!(h.verifier.verify_client("b", None, None).await.unwrap().request_permitted);
    }

    #[tokio::test]
    async fn test_partitions_namespace_keys() {
        let clock = Arc::new(ManualClock::at_timestamp(START));
        let store = Arc::new(InMemoryVisitorStore::with_clock(clock.clone()));
        let config = |partition: &str| ThrottleConfig {
            max_attempts: 1,
            cache_storage: partition.to_string(),
            ..Default::default()
        };
        let login =
            ThrottleVerifier::with_clock(store.clone(), config("login"), clock.clone()).unwrap();
        let api =
            ThrottleVerifier::with_clock(store.clone(), config("api"), clock.clone()).unwrap();

        assert!(login.verify_client("visitor", None, None).await.unwrap().request_permitted);
        assert!(api.verify_client("visitor", None, None).await.unwrap().request_permitted);
        assert!(!login.verify_client("visitor", None, None).await.unwrap().request_permitted);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_sub_second_period_rounds_down() {
        let h = harness(1, 1500, TimeUnit::Millisecond);
        h.clock.advance(Duration::from_millis(700));

        let result = h.verifier.verify_client("visitor", None, None).await.unwrap();
        assert_eq!(result.reset_time, START + 2);
    }

    #[test]
    fn test_invalid_defaults_fail_construction() {
        let store = Arc::new(InMemoryVisitorStore::new());
        let config = ThrottleConfig {
            max_attempts: 0,
            ..Default::default()
        };

        let Err(err) = ThrottleVerifier::new(store, config) else {
            panic!("zero max_attempts should be rejected");
        };
        assert!(matches!(err, ThrottlerError::Config(_)));
    }

    struct Request {
        client: &'static str,
        correlation_id: &'static str,
    }

    struct ByClient;

    #[async_trait]
    impl ClientRecognizer<Request> for ByClient {
        async fn identify(&self, request: &Request) -> Result<ClientIdentity> {
            Ok(ClientIdentity::new(request.client).with_request_instance(request.correlation_id))
        }
    }

    #[tokio::test]
    async fn test_verify_request_uses_recognizer() {
        let h = harness(3, 1, TimeUnit::Minute);
        let request = Request {
            client: "10.0.0.1",
            correlation_id: "corr-1",
        };

        h.verifier.verify_request(&ByClient, &request, None, None).await.unwrap();
        h.verifier.verify_request(&ByClient, &request, None, None).await.unwrap();

        let record = stored(&h, "10.0.0.1").await.unwrap();
        assert_eq!(record.attempt_count, 1);
        assert_eq!(record.last_request_id.as_deref(), Some("corr-1"));
    }

    /// Fails every call, as an unreachable backend would.
    struct UnreachableStore;

    #[async_trait]
    impl VisitorStore for UnreachableStore {
        async fn get(&self, _key: &str) -> Result<Option<VisitorRecord>> {
            Err(ThrottlerError::Store("connection refused".to_string()))
        }

        async fn put(&self, _key: &str, _record: &VisitorRecord, _ttl: Duration) -> Result<()> {
            Err(ThrottlerError::Store("connection refused".to_string()))
        }
    }

    #[tokio::test]
    async fn test_store_failure_is_propagated() {
        let verifier =
            ThrottleVerifier::new(Arc::new(UnreachableStore), ThrottleConfig::default()).unwrap();

        let err = assert_err!(verifier.verify_client("visitor", None, None).await);
        assert!(matches!(err, ThrottlerError::Store(_)));
    }

    #[tokio::test]
    async fn test_dyn_store_verifier() {
        let store: Arc<dyn VisitorStore> = Arc::new(InMemoryVisitorStore::new());
        let verifier = ThrottleVerifier::new(store, ThrottleConfig::default()).unwrap();

        let result = assert_ok!(verifier.verify_client("visitor", None, None).await);
        assert!(result.request_permitted);
    }

    #[tokio::test]
    async fn test_concurrent_identifiers() {
        let h = harness(1, 1, TimeUnit::Minute);
        let verifier = &h.verifier;

        let ids: Vec<String> = (0..32).map(|_| uuid::Uuid::new_v4().to_string()).collect();
        let results = futures::future::join_all(
            ids.iter().map(|id| verifier.verify_client(id, None, None)),
        )
        .await;

        assert!(results.iter().all(|r| r.as_ref().unwrap().request_permitted));
        assert_eq!(h.store.len(), 32);
    }
}
