//! Rate limit response headers and rejection bodies.

use axum::http::header::RETRY_AFTER;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::SecondsFormat;
use serde::Serialize;
use tracing::warn;

use crate::ratelimit::{Decision, Quota};

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Something rate limit headers can be written to.
pub trait ResponseSink {
    /// Set a header, replacing any previous value.
    fn set_header(&mut self, name: HeaderName, value: HeaderValue);
}

impl ResponseSink for HeaderMap {
    fn set_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.insert(name, value);
    }
}

/// Body of a 429 response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectionBody {
    pub success: bool,
    pub error: &'static str,
    pub retry_after: u64,
}

/// Body of a response for a request that failed inside the limiter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureBody {
    pub success: bool,
    pub error: &'static str,
}

/// Write the rate limit headers for a decision.
///
/// Allowed and denied requests both get the limit, remaining and reset
/// headers; denied requests also get `Retry-After`. Requests that were not
/// counted get nothing.
pub fn annotate<S: ResponseSink + ?Sized>(sink: &mut S, decision: &Decision) {
    let Some(quota) = decision.quota() else {
        return;
    };

    sink.set_header(X_RATELIMIT_LIMIT, HeaderValue::from(quota.limit));
    sink.set_header(X_RATELIMIT_REMAINING, HeaderValue::from(quota.remaining));

    let reset = quota.reset_at.to_rfc3339_opts(SecondsFormat::Millis, true);
    match HeaderValue::from_str(&reset) {
        Ok(value) => sink.set_header(X_RATELIMIT_RESET, value),
        Err(_) => warn!(reset = %reset, "Failed to encode x-ratelimit-reset header"),
    }

    if let Decision::Denied {
        retry_after_secs, ..
    } = decision
    {
        sink.set_header(RETRY_AFTER, HeaderValue::from(*retry_after_secs));
    }
}

/// Build the 429 response for a denied request.
pub fn reject(quota: Quota, retry_after_secs: u64) -> Response {
    let body = RejectionBody {
        success: false,
        error: "Too Many Requests",
        retry_after: retry_after_secs,
    };

    let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
    annotate(
        response.headers_mut(),
        &Decision::Denied {
            quota,
            retry_after_secs,
        },
    );
    response
}

/// Build the 500 response for a request whose counter store call failed.
pub fn store_failure() -> Response {
    let body = FailureBody {
        success: false,
        error: "Internal Server Error",
    };
    (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
}
