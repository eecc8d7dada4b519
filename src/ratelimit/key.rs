//! Bucket key generation.

/// Default prefix for bucket keys.
pub const DEFAULT_KEY_PREFIX: &str = "temp:ratelimit";

/// The identity under which requests are counted.
///
/// Built from the request method, the route (template when known, raw path
/// otherwise) and the client address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BucketKey {
    /// Lowercased HTTP method
    pub method: String,
    /// Route with everything outside `[A-Za-z0-9/]` removed and `/` replaced by `-`
    pub route: String,
    /// Client address with `.` and `:` replaced by `-`
    pub client: String,
}

impl BucketKey {
    /// Create a bucket key from raw request parts.
    pub fn new(method: &str, route: &str, ip: &str) -> Self {
        Self {
            method: method.to_ascii_lowercase(),
            route: normalize_route(route),
            client: normalize_ip(ip),
        }
    }

    /// Render the key for the counter store.
    pub fn to_store_key(&self, prefix: &str) -> String {
        format!("{}:{}:{}:{}", prefix, self.method, self.route, self.client)
    }
}

impl std::fmt::Display for BucketKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_store_key(DEFAULT_KEY_PREFIX))
    }
}

fn normalize_route(route: &str) -> String {
    route
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '/')
        .map(|c| if c == '/' { '-' } else { c })
        .collect()
}

fn normalize_ip(ip: &str) -> String {
    ip.replace(['.', ':'], "-")
}
