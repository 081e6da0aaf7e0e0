//! Request guard: resolves, verifies and enforces in one step.

use std::sync::Arc;

use tracing::{debug, instrument, warn};

use super::headers::RateLimitHeaders;
use super::rejection::Rejection;
use crate::config::{LimitExceptionConfig, ThrottlerConfig};
use crate::error::{Result, ThrottlerError};
use crate::throttle::{
    configured_store, ClientRecognizer, Clock, SystemClock, ThrottleVerifier, VisitorStore,
};

/// Per-route overrides of the configured limits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouteLimits {
    pub attempt_count: Option<u64>,
    /// Window length in the configured unit
    pub period: Option<u64>,
}

impl RouteLimits {
    pub fn new(attempt_count: u64, period: u64) -> Self {
        Self {
            attempt_count: Some(attempt_count),
            period: Some(period),
        }
    }

    /// Parse route arguments of the form `[attempts, period]`.
    ///
    /// Missing or empty arguments keep the configured defaults.
    pub fn parse(args: &[&str]) -> Result<Self> {
        if args.len() > 2 {
            return Err(ThrottlerError::Config(format!(
                "Expected at most 2 route limit arguments, got {}",
                args.len()
            )));
        }

        let parse = |name: &str, arg: Option<&&str>| -> Result<Option<u64>> {
            match arg.map(|a| a.trim()) {
                None | Some("") => Ok(None),
                Some(value) => value.parse().map(Some).map_err(|_| {
                    ThrottlerError::Config(format!("Invalid {} '{}'", name, value))
                }),
            }
        };

        Ok(Self {
            attempt_count: parse("attempt count", args.first())?,
            period: parse("attempt period", args.get(1))?,
        })
    }
}

/// Applies throttling at the request boundary.
///
/// A permitted request yields the headers to attach to the response. A denied
/// request yields [`ThrottlerError::RequestLimited`]. If verification itself
/// fails the request is not admitted and the error is returned unchanged.
pub struct RequestGuard<S: ?Sized, C> {
    verifier: Arc<ThrottleVerifier<S>>,
    recognizer: C,
    limit_exception: LimitExceptionConfig,
}

impl<C> RequestGuard<dyn VisitorStore, C> {
    /// Build a guard from loaded configuration over the given store.
    pub fn from_config<S: VisitorStore + 'static>(
        store: S,
        recognizer: C,
        config: &ThrottlerConfig,
    ) -> Result<Self> {
        Self::from_config_with_clock(store, recognizer, config, Arc::new(SystemClock))
    }

    pub fn from_config_with_clock<S: VisitorStore + 'static>(
        store: S,
        recognizer: C,
        config: &ThrottlerConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        let store = configured_store(store, &config.store);
        let verifier = ThrottleVerifier::with_clock(store, config.throttle.clone(), clock)?;
        Ok(Self::new(
            Arc::new(verifier),
            recognizer,
            config.limit_exception.clone(),
        ))
    }
}

impl<S: VisitorStore + ?Sized, C> RequestGuard<S, C> {
    pub fn new(
        verifier: Arc<ThrottleVerifier<S>>,
        recognizer: C,
        limit_exception: LimitExceptionConfig,
    ) -> Self {
        Self {
            verifier,
            recognizer,
            limit_exception,
        }
    }

    pub fn verifier(&self) -> &Arc<ThrottleVerifier<S>> {
        &self.verifier
    }

    /// Throttle `request` under `limits`.
    #[instrument(skip_all, fields(attempt_count = ?limits.attempt_count, period = ?limits.period))]
    pub async fn check<R>(&self, request: &R, limits: RouteLimits) -> Result<RateLimitHeaders>
    where
        R: ?Sized + Sync,
        C: ClientRecognizer<R>,
    {
        let result = self
            .verifier
            .verify_request(&self.recognizer, request, limits.attempt_count, limits.period)
            .await
            .map_err(|e| {
                warn!(error = %e, "Verification failed, request not admitted");
                e
            })?;

        if !result.request_permitted {
            let rejection = Rejection::new(&self.limit_exception, &result, self.verifier.now());
            debug!(
                attempt_count = result.attempt_count,
                reset_time = result.reset_time,
                "Request limited"
            );
            return Err(ThrottlerError::RequestLimited(rejection));
        }

        Ok(RateLimitHeaders::from(&result))
    }
}
