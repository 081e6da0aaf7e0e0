//! Rate limit response headers.

use serde::Serialize;

use crate::throttle::VerificationResult;

pub const HEADER_RATELIMIT_LIMIT: &str = "X-RateLimit-Limit";
pub const HEADER_RATELIMIT_REMAINING: &str = "X-RateLimit-Remaining";
pub const HEADER_RATELIMIT_RESET: &str = "X-RateLimit-Reset";

/// Header values derived from a verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitHeaders {
    pub limit: u64,
    /// `max(limit - attempt_count, 0)`
    pub remaining: u64,
    /// Epoch seconds
    pub reset: i64,
}

impl RateLimitHeaders {
    /// Header name/value pairs, ready to attach to a response.
    pub fn to_pairs(&self) -> [(&'static str, String); 3] {
        [
            (HEADER_RATELIMIT_LIMIT, self.limit.to_string()),
            (HEADER_RATELIMIT_REMAINING, self.remaining.to_string()),
            (HEADER_RATELIMIT_RESET, self.reset.to_string()),
        ]
    }
}

impl From<&VerificationResult> for RateLimitHeaders {
    fn from(result: &VerificationResult) -> Self {
        Self {
            limit: result.max_attempt_count,
            remaining: result.remaining(),
            reset: result.reset_time,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headers_from_result() {
        let result = VerificationResult {
            max_attempt_count: 10,
            attempt_count: 4,
            reset_time: 1_700_000_060,
            request_permitted: true,
        };
        let headers = RateLimitHeaders::from(&result);

        assert_eq!(
            headers.to_pairs(),
            [
                ("X-RateLimit-Limit", "10".to_string()),
                ("X-RateLimit-Remaining", "6".to_string()),
                ("X-RateLimit-Reset", "1700000060".to_string()),
            ]
        );
    }

    #[test]
    fn test_remaining_clamped_on_denial() {
        let result = VerificationResult {
            max_attempt_count: 3,
            attempt_count: 4,
            reset_time: 0,
            request_permitted: false,
        };
        assert_eq!(RateLimitHeaders::from(&result).remaining, 0);
    }
}
