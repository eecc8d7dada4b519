//! HTTP surface: rate limit middleware, response annotation and the server.

mod annotate;
mod middleware;
mod server;

pub use annotate::{
    annotate, reject, store_failure, FailureBody, RejectionBody, ResponseSink, X_RATELIMIT_LIMIT,
    X_RATELIMIT_REMAINING, X_RATELIMIT_RESET,
};
pub use middleware::{rate_limit, RateLimitState};
pub use server::HttpServer;
