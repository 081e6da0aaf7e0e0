//! Outcome of a single verification.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Counters reported for one verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResult {
    /// Effective attempt limit applied to this call
    pub max_attempt_count: u64,
    /// Stored count before this call plus one, whether permitted or not.
    /// A suppressed duplicate reports the stored count, which already
    /// includes the request it repeats.
    pub attempt_count: u64,
    /// Epoch seconds at which the visitor's window expires
    pub reset_time: i64,
    pub request_permitted: bool,
}

impl VerificationResult {
    /// Attempts left in the window, never negative.
    pub fn remaining(&self) -> u64 {
        self.max_attempt_count.saturating_sub(self.attempt_count)
    }

    /// Whole seconds from `now` until the reset time, truncated toward zero.
    pub fn seconds_until_reset(&self, now: DateTime<Utc>) -> i64 {
        self.reset_time
            .saturating_mul(1000)
            .saturating_sub(now.timestamp_millis())
            / 1000
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(max: u64, count: u64, reset_time: i64) -> VerificationResult {
        VerificationResult {
            max_attempt_count: max,
            attempt_count: count,
            reset_time,
            request_permitted: count <= max,
        }
    }

    #[test]
    fn test_remaining_never_negative() {
        assert_eq!(result(3, 1, 0).remaining(), 2);
        assert_eq!(result(3, 3, 0).remaining(), 0);
        assert_eq!(result(3, 4, 0).remaining(), 0);
    }

    #[test]
    fn test_seconds_until_reset_truncates() {
        let now = DateTime::from_timestamp_millis(1_000_250).unwrap();
        assert_eq!(result(1, 1, 1_060).seconds_until_reset(now), 59);
        assert_eq!(result(1, 1, 1_000).seconds_until_reset(now), 0);
        assert_eq!(result(1, 1, 990).seconds_until_reset(now), -10);
    }
}
