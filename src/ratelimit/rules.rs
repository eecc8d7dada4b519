//! Per-route rate limit rules.
//!
//! Routes opt in to rate limiting by declaring a rule. A rule names the route
//! template it applies to, optionally restricted to one HTTP method, and the
//! options used for its buckets. Routes without a rule are never limited.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use super::limiter::{RateLimitOptions, DEFAULT_MAX};
use super::window::TimeWindow;
use crate::error::{MarketgateError, Result};

/// A set of per-route rules.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouteRules {
    /// Declared rules, in file order
    #[serde(default)]
    pub routes: Vec<RouteRule>,
}

/// Rate limit rule for a single route.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteRule {
    /// Route template, e.g. `/api/v1/models/{id}`
    pub path: String,
    /// HTTP method to match (if not set, matches every method)
    #[serde(default)]
    pub method: Option<String>,
    /// Maximum requests per window
    #[serde(default = "default_max")]
    pub max: u64,
    /// Window length, milliseconds or `<number> <unit>`
    #[serde(default)]
    pub time_window: TimeWindow,
    /// Let requests through when the counter store fails
    #[serde(default)]
    pub skip_on_error: bool,
}

fn default_max() -> u64 {
    DEFAULT_MAX
}

impl RouteRule {
    /// Create a rule that applies to every method on `path`.
    pub fn new(path: impl Into<String>, options: RateLimitOptions) -> Self {
        Self {
            path: path.into(),
            method: None,
            max: options.max,
            time_window: options.time_window,
            skip_on_error: options.skip_on_error,
        }
    }

    /// Restrict the rule to one HTTP method.
    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    /// Get the limiter options declared by this rule.
    pub fn options(&self) -> RateLimitOptions {
        RateLimitOptions {
            max: self.max,
            time_window: self.time_window,
            skip_on_error: self.skip_on_error,
        }
    }

    fn matches(&self, method: &str, path: &str) -> bool {
        self.path == path
            && self
                .method
                .as_deref()
                .map_or(true, |m| m.eq_ignore_ascii_case(method))
    }
}

impl RouteRules {
    /// Create an empty rule set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a rule.
    pub fn with_route(mut self, rule: RouteRule) -> Self {
        self.routes.push(rule);
        self
    }

    /// Load rules from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading rate limit rules");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load rules from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let rules: RouteRules = serde_yaml::from_str(yaml)
            .map_err(|e| MarketgateError::Config(format!("Failed to parse rate limit rules: {}", e)))?;
        rules.validate()?;
        Ok(rules)
    }

    fn validate(&self) -> Result<()> {
        for rule in &self.routes {
            if rule.path.is_empty() {
                return Err(MarketgateError::Config(
                    "rate limit rule is missing a path".to_string(),
                ));
            }
            if rule.max == 0 {
                return Err(MarketgateError::Config(format!(
                    "rate limit rule for {} must allow at least one request",
                    rule.path
                )));
            }
        }
        Ok(())
    }

    /// Find the options for a request to `path` with `method`.
    ///
    /// A rule naming the method takes precedence over one that matches any method.
    pub fn find(&self, method: &str, path: &str) -> Option<RateLimitOptions> {
        let mut any_method = None;

        for rule in self.routes.iter().filter(|r| r.matches(method, path)) {
            if rule.method.is_some() {
                return Some(rule.options());
            }
            any_method.get_or_insert(rule);
        }

        any_method.map(RouteRule::options)
    }

    /// Number of declared rules.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether no rules are declared.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
