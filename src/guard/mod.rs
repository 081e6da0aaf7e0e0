//! Turning verification results into response headers and rejections.

mod headers;
mod rejection;
mod service;

pub use headers::{
    RateLimitHeaders, HEADER_RATELIMIT_LIMIT, HEADER_RATELIMIT_REMAINING, HEADER_RATELIMIT_RESET,
};
pub use rejection::Rejection;
pub use service::{RequestGuard, RouteLimits};
