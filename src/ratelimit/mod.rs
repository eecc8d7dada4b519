//! Rate limiting logic and counter state management.

mod key;
mod limiter;
mod memory;
mod redis_store;
mod rules;
mod store;
mod sweeper;
mod window;

pub use key::{BucketKey, DEFAULT_KEY_PREFIX};
pub use limiter::{
    Decision, LimiterSettings, Quota, RateLimitOptions, RateLimiter, RequestInfo, SkipReason,
    DEFAULT_MAX,
};
pub use memory::{MemoryStore, RateLimitEntry};
pub use redis_store::RedisStore;
pub use rules::{RouteRule, RouteRules};
pub use store::{CounterStore, Hit};
pub use sweeper::{sweep_once, Sweeper, DEFAULT_SWEEP_INTERVAL};
pub use window::{TimeUnit, TimeWindow, DEFAULT_WINDOW};
