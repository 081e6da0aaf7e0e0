//! Persisted per-visitor throttle state.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// The state stored for one identifier.
///
/// A visitor that has never been written is represented by the absence of a
/// record (`Option::None`), never by a zeroed record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitorRecord {
    /// Attempts consumed within the current window
    pub attempt_count: u64,
    /// Epoch seconds at which the current window expires
    pub reset_time: i64,
    /// Request instance that caused the last mutation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_request_id: Option<String>,
}

impl VisitorRecord {
    /// The record implied for a visitor with nothing stored.
    pub fn new_visitor(reset_time: i64) -> Self {
        Self {
            attempt_count: 0,
            reset_time,
            last_request_id: None,
        }
    }

    /// Whether `request_instance_id` names the request that last mutated this record.
    pub fn is_duplicate_of(&self, request_instance_id: Option<&str>) -> bool {
        match (request_instance_id, self.last_request_id.as_deref()) {
            (Some(incoming), Some(last)) => incoming == last,
            _ => false,
        }
    }

    /// Encode for stores that hold opaque string payloads.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a payload written by [`VisitorRecord::to_json`].
    pub fn from_json(payload: &str) -> Result<Self> {
        Ok(serde_json::from_str(payload)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ThrottlerError;

    #[test]
    fn test_new_visitor_is_empty() {
        let record = VisitorRecord::new_visitor(1_700_000_060);
        assert_eq!(record.attempt_count, 0);
        assert_eq!(record.reset_time, 1_700_000_060);
        assert!(record.last_request_id.is_none());
    }

    #[test]
    fn test_wire_shape_is_camel_case() {
        let record = VisitorRecord {
            attempt_count: 2,
            reset_time: 1_700_000_000,
            last_request_id: Some("req-1".to_string()),
        };
        let json = record.to_json().unwrap();
        assert_eq!(
            json,
            r#"{"attemptCount":2,"resetTime":1700000000,"lastRequestId":"req-1"}"#
        );
    }

    #[test]
    fn test_payload_without_request_id() {
        let record = VisitorRecord::from_json(r#"{"attemptCount":1,"resetTime":10}"#).unwrap();
        assert_eq!(
            record,
            VisitorRecord {
                attempt_count: 1,
                reset_time: 10,
                last_request_id: None,
            }
        );
    }

    #[test]
    fn test_malformed_payload_is_codec_error() {
        let err = VisitorRecord::from_json(r#"{"attemptCount":-1}"#).unwrap_err();
        assert!(matches!(err, ThrottlerError::Codec(_)));
    }

    #[test]
    fn test_duplicate_detection() {
        let mut record = VisitorRecord::new_visitor(0);
        assert!(!record.is_duplicate_of(None));
        assert!(!record.is_duplicate_of(Some("a")));

        record.last_request_id = Some("a".to_string());
        assert!(record.is_duplicate_of(Some("a")));
        assert!(!record.is_duplicate_of(Some("b")));
        assert!(!record.is_duplicate_of(None));
    }
}
