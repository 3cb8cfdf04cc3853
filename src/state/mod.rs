//! State module for per-run crawl bookkeeping
//!
//! # Components
//!
//! - `DomainRateState`: pacing state behind the adaptive rate limiter
//! - `DomainCircuitState`: failure tracking behind the circuit breaker
//! - `VisitedSet`: concurrency-safe set of URLs admitted to the current run

mod circuit_state;
mod domain_state;
mod visited;

// Re-export main types
pub use circuit_state::{Admission, CircuitState, DomainCircuitState};
pub use domain_state::{DomainRateState, RateBounds};
pub use visited::VisitedSet;
