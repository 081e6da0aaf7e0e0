//! Request Throttler - attempt-count throttling over a TTL key/value store
//!
//! This crate decides whether a recurring client may proceed based on a
//! bounded number of attempts inside a renewing time window. Visitor state
//! lives in a pluggable [`throttle::VisitorStore`]; the [`guard`] module turns
//! verification results into rate limit headers and rejections.

pub mod config;
pub mod error;
pub mod guard;
pub mod telemetry;
pub mod throttle;

pub use config::ThrottlerConfig;
pub use error::{Result, ThrottlerError};
pub use guard::{RateLimitHeaders, Rejection, RequestGuard, RouteLimits};
pub use throttle::{
    ClientIdentity, ClientRecognizer, InMemoryVisitorStore, ThrottleVerifier, VerificationResult,
    VisitorRecord, VisitorStore,
};
