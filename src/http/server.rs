//! HTTP server implementation.

use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::middleware::{rate_limit, RateLimitState};
use crate::error::Result;

/// HTTP server exposing the marketplace API behind the rate limiter.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    /// Middleware state
    state: RateLimitState,
}

impl HttpServer {
    /// Create a new HTTP server.
    pub fn new(addr: SocketAddr, state: RateLimitState) -> Self {
        Self { addr, state }
    }

    /// Build the router with the rate limit middleware applied to every route.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/health", get(health))
            .route("/api/v1/public/ping", get(ping))
            .route("/api/v1/auth/login", post(login))
            .layer(axum::middleware::from_fn_with_state(
                self.state.clone(),
                rate_limit,
            ))
    }

    /// Start the HTTP server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let app = self.router();
        let listener = TcpListener::bind(self.addr).await?;

        info!(addr = %self.addr, "Starting HTTP server with graceful shutdown");

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await
        .map_err(|e| {
            error!(error = %e, "HTTP server failed");
            e.into()
        })
    }
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn ping() -> Json<Value> {
    Json(json!({ "success": true, "data": "pong" }))
}

async fn login() -> Json<Value> {
    Json(json!({ "success": true }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::{LimiterSettings, MemoryStore, RateLimitOptions, RateLimiter, RouteRule, RouteRules};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn server(rules: RouteRules) -> HttpServer {
        let limiter = RateLimiter::with_rules(
            Arc::new(MemoryStore::new()),
            LimiterSettings::default(),
            rules,
        );
        let addr: SocketAddr = "127.0.0.1:3000".parse().unwrap();
        HttpServer::new(addr, RateLimitState::new(Arc::new(limiter)))
    }

    #[tokio::test]
    async fn test_health_is_not_limited_without_rule() {
        let app = server(RouteRules::new()).router();

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_login_rule_applies() {
        let rules = RouteRules::new()
            .with_route(RouteRule::new("/api/v1/auth/login", RateLimitOptions::new(1)).with_method("POST"));
        let app = server(rules).router();

        let login = || {
            Request::builder()
                .method("POST")
                .uri("/api/v1/auth/login")
                .body(Body::empty())
                .unwrap()
        };

        let first = app.clone().oneshot(login()).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let second = app.oneshot(login()).await.unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    }
}
