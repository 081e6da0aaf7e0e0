//! Rejection returned to clients over their attempt limit.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::headers::RateLimitHeaders;
use crate::config::LimitExceptionConfig;
use crate::throttle::VerificationResult;

/// A limited request, shaped for the response boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rejection {
    pub message: String,
    /// HTTP status
    pub status: u16,
    /// Application error code
    pub code: String,
    /// Headers to send along with the rejection
    pub headers: RateLimitHeaders,
}

impl Rejection {
    /// Build the rejection for a denied verification.
    ///
    /// The message names the seconds left until the reset time when it is
    /// still in the future.
    pub fn new(
        config: &LimitExceptionConfig,
        result: &VerificationResult,
        now: DateTime<Utc>,
    ) -> Self {
        let wait = result.seconds_until_reset(now);
        let wait = if wait > 0 {
            format!(" {} seconds", wait)
        } else {
            String::new()
        };

        Self {
            message: format!("{} Please try again later{}", config.message, wait),
            status: config.status,
            code: config.code.clone(),
            headers: RateLimitHeaders::from(result),
        }
    }
}
