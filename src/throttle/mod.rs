//! Request throttling and fault handling
//!
//! # Components
//!
//! - `RetryPolicy`: bounded exponential backoff for transient failures
//! - `CircuitBreaker`: per-domain isolation of failing sites
//! - `AdaptiveRateLimiter`: per-domain pacing driven by server feedback

mod circuit_breaker;
mod rate_limiter;
mod retry;

pub use crate::state::Admission;
pub use circuit_breaker::{CircuitBreaker, Execution};
pub use rate_limiter::AdaptiveRateLimiter;
pub use retry::{transient_only, RetryDecision, RetryPolicy};
