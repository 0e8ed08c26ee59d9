//! # Resilient Access Layer
//!
//! Policies guarding calls into a [`MarketDataFeed`](crate::feed::MarketDataFeed),
//! applied outermost first:
//!
//! 1. [`RateLimitGate`]: wait briefly for a permit, otherwise fail fast
//! 2. [`CircuitBreaker`]: reject immediately while open
//! 3. [`RetryConfig`]: retry transient failures with backoff
//!
//! Policy instances live in a [`ResilienceRegistry`] keyed by resource name
//! and are shared by every [`ResilientFeed`] using that name.

mod circuit_breaker;
mod rate_limiter;
mod registry;
mod resilient_feed;
mod retry;

pub use circuit_breaker::{CallPermit, CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use rate_limiter::{RateLimitConfig, RateLimitGate};
pub use registry::{ResiliencePolicies, ResilienceRegistry};
pub use resilient_feed::ResilientFeed;
pub use retry::{Backoff, RetryConfig};
