//! axum middleware that applies per-route rate limits.

use axum::extract::{ConnectInfo, MatchedPath, Request, State};
use axum::http::{HeaderMap, HeaderName};
use axum::middleware::Next;
use axum::response::Response;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use super::annotate::{annotate, reject, store_failure};
use crate::config::RateLimitingConfig;
use crate::error::{MarketgateError, Result};
use crate::ratelimit::{Decision, RateLimiter, RequestInfo};

const UNKNOWN_CLIENT: &str = "unknown";
const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// State shared by every invocation of [`rate_limit`].
#[derive(Clone)]
pub struct RateLimitState {
    limiter: Arc<RateLimiter>,
    trust_proxy: bool,
    force_header: HeaderName,
}

impl RateLimitState {
    /// Create middleware state that reads the client address from the connection.
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self {
            limiter,
            trust_proxy: false,
            force_header: HeaderName::from_static("x-force-rate-limit"),
        }
    }

    /// Create middleware state from the rate limiting configuration.
    pub fn from_config(limiter: Arc<RateLimiter>, config: &RateLimitingConfig) -> Result<Self> {
        let force_header = HeaderName::from_bytes(config.force_header.as_bytes()).map_err(|e| {
            MarketgateError::Config(format!("invalid force header {}: {}", config.force_header, e))
        })?;

        Ok(Self {
            limiter,
            trust_proxy: config.trust_proxy,
            force_header,
        })
    }

    /// Take the client address from `X-Forwarded-For` when present.
    pub fn with_trust_proxy(mut self, trust_proxy: bool) -> Self {
        self.trust_proxy = trust_proxy;
        self
    }
}

/// Rate limit the request if its route declares a rule.
///
/// Denied requests are answered with 429 and never reach the handler.
pub async fn rate_limit(
    State(state): State<RateLimitState>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().as_str().to_string();
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());

    let Some(options) = state.limiter.options_for(&method, &path) else {
        return next.run(request).await;
    };

    let info = RequestInfo {
        ip: client_ip(&request, state.trust_proxy),
        force_requested: is_forced(request.headers(), &state.force_header),
        method,
        path,
    };

    match state.limiter.check(&info, &options).await {
        Ok(Decision::Denied {
            quota,
            retry_after_secs,
        }) => reject(quota, retry_after_secs),
        Ok(decision) => {
            let mut response = next.run(request).await;
            annotate(response.headers_mut(), &decision);
            response
        }
        Err(_) => store_failure(),
    }
}

fn client_ip(request: &Request, trust_proxy: bool) -> String {
    if trust_proxy {
        if let Some(ip) = request
            .headers()
            .get(X_FORWARDED_FOR)
            .and_then(|v| v.to_str().ok())
            .and_then(first_forwarded_ip)
        {
            return ip.to_string();
        }
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}

fn first_forwarded_ip(raw: &str) -> Option<IpAddr> {
    raw.split(',').next()?.trim().parse().ok()
}

fn is_forced(headers: &HeaderMap, force_header: &HeaderName) -> bool {
    headers
        .get(force_header)
        .and_then(|v| v.to_str().ok())
        .map(|v| {
            let v = v.trim();
            v == "1" || v.eq_ignore_ascii_case("true")
        })
        .unwrap_or(false)
}
