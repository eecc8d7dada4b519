//! Core rate limiter implementation.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, trace, warn};

use super::key::{BucketKey, DEFAULT_KEY_PREFIX};
use super::rules::RouteRules;
use super::store::{CounterStore, Hit};
use super::window::TimeWindow;
use crate::config::{Environment, MarketgateConfig};
use crate::error::Result;

/// Default maximum requests per window.
pub const DEFAULT_MAX: u64 = 100;

/// Options for a rate limited route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitOptions {
    /// Maximum requests allowed in the time window
    pub max: u64,
    /// Length of the fixed window
    pub time_window: TimeWindow,
    /// Treat counter store failures as allowed instead of failing the request
    pub skip_on_error: bool,
}

impl RateLimitOptions {
    /// Create options allowing `max` requests per default window.
    pub fn new(max: u64) -> Self {
        Self {
            max,
            ..Self::default()
        }
    }

    /// Set the window length.
    pub fn with_window(mut self, time_window: TimeWindow) -> Self {
        self.time_window = time_window;
        self
    }

    /// Set the store failure policy.
    pub fn with_skip_on_error(mut self, skip_on_error: bool) -> Self {
        self.skip_on_error = skip_on_error;
        self
    }
}

impl Default for RateLimitOptions {
    fn default() -> Self {
        Self {
            max: DEFAULT_MAX,
            time_window: TimeWindow::default(),
            skip_on_error: false,
        }
    }
}

/// The parts of an inbound request the limiter looks at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestInfo {
    /// HTTP method
    pub method: String,
    /// Route template, or the raw path when no template is known
    pub path: String,
    /// Client address
    pub ip: String,
    /// The caller asked for enforcement even where limits are bypassed
    pub force_requested: bool,
}

impl RequestInfo {
    /// Create a request description.
    pub fn new(method: impl Into<String>, path: impl Into<String>, ip: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            ip: ip.into(),
            force_requested: false,
        }
    }

    /// Mark the request as forcing enforcement.
    pub fn forced(mut self) -> Self {
        self.force_requested = true;
        self
    }
}

/// Quota state reported back to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quota {
    /// Configured maximum for the window
    pub limit: u64,
    /// Requests left in the window, never below zero
    pub remaining: u64,
    /// When the window resets
    pub reset_at: DateTime<Utc>,
}

/// Why a check did not count the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Limits are not enforced in this environment
    Bypassed,
    /// The counter store failed and the route skips on error
    StoreUnavailable,
}

/// Outcome of a rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The request is within its quota
    Allowed(Quota),
    /// The request exceeded its quota
    Denied {
        quota: Quota,
        retry_after_secs: u64,
    },
    /// The request was let through without being counted
    Skipped(SkipReason),
}

impl Decision {
    /// Whether the request must be rejected.
    pub fn is_denied(&self) -> bool {
        matches!(self, Decision::Denied { .. })
    }

    /// Get the quota, if the request was counted.
    pub fn quota(&self) -> Option<&Quota> {
        match self {
            Decision::Allowed(quota) | Decision::Denied { quota, .. } => Some(quota),
            Decision::Skipped(_) => None,
        }
    }
}

/// Settings that apply to every check.
#[derive(Debug, Clone)]
pub struct LimiterSettings {
    /// Deployment environment
    pub environment: Environment,
    /// Enforce limits even where the environment bypasses them
    pub force_enabled: bool,
    /// Prefix for bucket keys
    pub key_prefix: String,
}

impl Default for LimiterSettings {
    fn default() -> Self {
        Self {
            environment: Environment::Production,
            force_enabled: false,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
        }
    }
}

impl LimiterSettings {
    /// Build settings from the service configuration.
    pub fn from_config(config: &MarketgateConfig) -> Self {
        Self {
            environment: config.server.environment,
            force_enabled: config.rate_limiting.force_enabled,
            key_prefix: config.rate_limiting.key_prefix.clone(),
        }
    }
}

/// The fixed-window rate limiter.
///
/// All requests for a bucket within one window share a single counter that
/// resets when the window elapses, so a client can get up to twice the limit
/// through across a window boundary.
pub struct RateLimiter {
    /// Counter store shared by every check
    store: Arc<dyn CounterStore>,
    /// Global settings
    settings: LimiterSettings,
    /// Per-route rules
    rules: RwLock<RouteRules>,
}

impl RateLimiter {
    /// Create a rate limiter with no route rules.
    pub fn new(store: Arc<dyn CounterStore>, settings: LimiterSettings) -> Self {
        Self::with_rules(store, settings, RouteRules::new())
    }

    /// Create a rate limiter with route rules.
    pub fn with_rules(
        store: Arc<dyn CounterStore>,
        settings: LimiterSettings,
        rules: RouteRules,
    ) -> Self {
        Self {
            store,
            settings,
            rules: RwLock::new(rules),
        }
    }

    /// Replace the route rules.
    pub fn set_rules(&self, rules: RouteRules) {
        let mut current = self.rules.write();
        *current = rules;
    }

    /// Get a copy of the current route rules.
    pub fn rules(&self) -> RouteRules {
        self.rules.read().clone()
    }

    /// Get the options for a route, if it is rate limited.
    pub fn options_for(&self, method: &str, path: &str) -> Option<RateLimitOptions> {
        self.rules.read().find(method, path)
    }

    /// Get the counter store.
    pub fn store(&self) -> &Arc<dyn CounterStore> {
        &self.store
    }

    /// Count the request against its bucket and decide whether it may proceed.
    ///
    /// Store failures are returned as errors unless the route skips on error.
    pub async fn check(
        &self,
        request: &RequestInfo,
        options: &RateLimitOptions,
    ) -> Result<Decision> {
        if self.is_bypassed(request) {
            trace!(
                method = %request.method,
                path = %request.path,
                environment = ?self.settings.environment,
                "Rate limiting bypassed"
            );
            return Ok(Decision::Skipped(SkipReason::Bypassed));
        }

        let key = BucketKey::new(&request.method, &request.path, &request.ip);
        let store_key = key.to_store_key(&self.settings.key_prefix);

        trace!(
            key = %store_key,
            max = options.max,
            window = %options.time_window,
            "Checking rate limit"
        );

        let hit = match self
            .store
            .increment(&store_key, options.time_window.duration())
            .await
        {
            Ok(hit) => hit,
            Err(e) if options.skip_on_error => {
                warn!(
                    key = %store_key,
                    backend = self.store.backend(),
                    error = %e,
                    "Counter store failed, letting request through"
                );
                return Ok(Decision::Skipped(SkipReason::StoreUnavailable));
            }
            Err(e) => {
                error!(
                    key = %store_key,
                    backend = self.store.backend(),
                    error = %e,
                    "Counter store failed"
                );
                return Err(e);
            }
        };

        Ok(decide(&store_key, options.max, hit))
    }

    fn is_bypassed(&self, request: &RequestInfo) -> bool {
        self.settings.environment.bypasses_rate_limits()
            && !self.settings.force_enabled
            && !request.force_requested
    }
}

fn decide(key: &str, max: u64, hit: Hit) -> Decision {
    let quota = Quota {
        limit: max,
        remaining: max.saturating_sub(hit.count),
        reset_at: reset_at(hit.ttl),
    };

    if hit.count <= max {
        return Decision::Allowed(quota);
    }

    let retry_after_secs = retry_after_secs(hit.ttl);
    debug!(
        key = %key,
        count = hit.count,
        limit = max,
        retry_after_secs = retry_after_secs,
        "Rate limit exceeded"
    );

    Decision::Denied {
        quota,
        retry_after_secs,
    }
}

/// Wall-clock reset time, saturating at the latest representable instant.
fn reset_at(ttl: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| Utc::now().checked_add_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Whole seconds until the window resets, rounded up and never below one.
fn retry_after_secs(ttl: Duration) -> u64 {
    let ms = ttl.as_millis() as u64;
    ((ms + 999) / 1000).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MarketgateError;
    use crate::ratelimit::MemoryStore;
    use async_trait::async_trait;
    use tokio_test::{assert_err, assert_ok};

    struct FailingStore;

    #[async_trait]
    impl CounterStore for FailingStore {
        async fn increment(&self, _key: &str, _window: Duration) -> Result<Hit> {
            Err(MarketgateError::Store("connection refused".to_string()))
        }

        fn backend(&self) -> &'static str {
            "failing"
        }
    }

    fn limiter() -> RateLimiter {
        RateLimiter::new(Arc::new(MemoryStore::new()), LimiterSettings::default())
    }

    fn scenario_options() -> RateLimitOptions {
        RateLimitOptions::new(3).with_window(TimeWindow::from_millis(60_000))
    }

    #[tokio::test(start_paused = true)]
    async fn test_remaining_counts_down_then_denies() {
        let limiter = limiter();
        let request = RequestInfo::new("GET", "/x", "1.2.3.4");
        let options = scenario_options();

        for expected_remaining in [2, 1, 0] {
            let decision = limiter.check(&request, &options).await.unwrap();
            match decision {
                Decision::Allowed(quota) => {
                    assert_eq!(quota.limit, 3);
                    assert_eq!(quota.remaining, expected_remaining);
                }
                other => panic!("expected allowed, got {:?}", other),
            }
        }

        let decision = limiter.check(&request, &options).await.unwrap();
        match decision {
            Decision::Denied {
                quota,
                retry_after_secs,
            } => {
                assert_eq!(quota.remaining, 0);
                assert!((1..=60).contains(&retry_after_secs));
            }
            other => panic!("expected denied, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_client_is_unaffected() {
        let limiter = limiter();
        let options = scenario_options();
        let first = RequestInfo::new("GET", "/x", "1.2.3.4");

        for _ in 0..4 {
            limiter.check(&first, &options).await.unwrap();
        }

        let second = RequestInfo::new("GET", "/x", "5.6.7.8");
        let decision = limiter.check(&second, &options).await.unwrap();
        assert_eq!(decision.quota().map(|q| q.remaining), Some(2));
        assert!(!decision.is_denied());
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_reset_starts_fresh() {
        let limiter = limiter();
        let options = scenario_options();
        let request = RequestInfo::new("GET", "/x", "1.2.3.4");

        for _ in 0..4 {
            limiter.check(&request, &options).await.unwrap();
        }
        tokio::time::advance(Duration::from_millis(60_001)).await;

        let decision = limiter.check(&request, &options).await.unwrap();
        assert_eq!(decision.quota().map(|q| q.remaining), Some(2));
        assert!(!decision.is_denied());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_shrinks_with_window() {
        let limiter = limiter();
        let options = RateLimitOptions::new(1).with_window(TimeWindow::from_millis(10_000));
        let request = RequestInfo::new("POST", "/login", "1.2.3.4");

        limiter.check(&request, &options).await.unwrap();
        tokio::time::advance(Duration::from_millis(8_500)).await;

        let decision = limiter.check(&request, &options).await.unwrap();
        assert!(matches!(
            decision,
            Decision::Denied {
                retry_after_secs: 2,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_store_failure_skipped_when_configured() {
        let limiter = RateLimiter::new(Arc::new(FailingStore), LimiterSettings::default());
        let request = RequestInfo::new("GET", "/x", "1.2.3.4");
        let options = scenario_options().with_skip_on_error(true);

        for _ in 0..5 {
            let decision = assert_ok!(limiter.check(&request, &options).await);
            assert_eq!(decision, Decision::Skipped(SkipReason::StoreUnavailable));
        }
    }

    #[tokio::test]
    async fn test_store_failure_propagates_by_default() {
        let limiter = RateLimiter::new(Arc::new(FailingStore), LimiterSettings::default());
        let request = RequestInfo::new("GET", "/x", "1.2.3.4");

        let err = assert_err!(limiter.check(&request, &scenario_options()).await);
        assert!(matches!(err, MarketgateError::Store(_)));
    }

    #[tokio::test]
    async fn test_test_environment_bypasses_unless_forced() {
        let settings = LimiterSettings {
            environment: Environment::Test,
            ..LimiterSettings::default()
        };
        let limiter = RateLimiter::new(Arc::new(MemoryStore::new()), settings);
        let options = RateLimitOptions::new(1);
        let request = RequestInfo::new("GET", "/x", "1.2.3.4");

        for _ in 0..3 {
            let decision = limiter.check(&request, &options).await.unwrap();
            assert_eq!(decision, Decision::Skipped(SkipReason::Bypassed));
        }

        let forced = request.clone().forced();
        assert!(matches!(
            limiter.check(&forced, &options).await.unwrap(),
            Decision::Allowed(_)
        ));
        assert!(limiter.check(&forced, &options).await.unwrap().is_denied());
    }

    #[tokio::test]
    async fn test_force_enabled_setting_disables_bypass() {
        let settings = LimiterSettings {
            environment: Environment::Development,
            force_enabled: true,
            ..LimiterSettings::default()
        };
        let limiter = RateLimiter::new(Arc::new(MemoryStore::new()), settings);
        let request = RequestInfo::new("GET", "/x", "1.2.3.4");

        let decision = limiter.check(&request, &RateLimitOptions::new(5)).await.unwrap();
        assert!(matches!(decision, Decision::Allowed(_)));
    }

    #[test]
    fn test_rules_can_be_replaced() {
        use crate::ratelimit::RouteRule;

        let limiter = limiter();
        assert!(limiter.options_for("GET", "/x").is_none());

        limiter.set_rules(RouteRules::new().with_route(RouteRule::new("/x", RateLimitOptions::new(7))));
        assert_eq!(limiter.options_for("GET", "/x").map(|o| o.max), Some(7));
        assert_eq!(limiter.rules().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_beyond_calendar_range_saturates_reset() {
        let limiter = limiter();
        let window = TimeWindow::parse("4000000000 days").unwrap();
        let options = RateLimitOptions::new(1).with_window(window);
        let request = RequestInfo::new("GET", "/archive", "1.2.3.4");

        let decision = limiter.check(&request, &options).await.unwrap();
        match decision {
            Decision::Allowed(quota) => assert_eq!(quota.reset_at, DateTime::<Utc>::MAX_UTC),
            other => panic!("expected allowed, got {:?}", other),
        }

        let decision = limiter.check(&request, &options).await.unwrap();
        assert!(decision.is_denied());
    }

    #[test]
    fn test_reset_at_saturates() {
        assert_eq!(reset_at(Duration::MAX), DateTime::<Utc>::MAX_UTC);
        assert!(reset_at(Duration::from_secs(60)) > Utc::now());
    }

    #[test]
    fn test_retry_after_rounding() {
        assert_eq!(retry_after_secs(Duration::ZERO), 1);
        assert_eq!(retry_after_secs(Duration::from_millis(1)), 1);
        assert_eq!(retry_after_secs(Duration::from_millis(1_001)), 2);
        assert_eq!(retry_after_secs(Duration::from_secs(60)), 60);
    }
}
