use crate::config::RateLimitConfig;
use crate::state::{DomainRateState, RateBounds};
use crate::FetchError;
use dashmap::DashMap;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Per-domain adaptive request pacing
///
/// Each domain gets its own [`DomainRateState`], created lazily at the
/// configured initial rate. Callers claim a slot with
/// [`AdaptiveRateLimiter::wait_for_permission`] before every request and then
/// report how the request went; the rate moves toward what the server can
/// comfortably absorb.
///
/// Domains are independent: a slow or failing domain never delays another.
pub struct AdaptiveRateLimiter {
    domains: DashMap<String, DomainRateState>,
    config: RateLimitConfig,
    bounds: RateBounds,
    max_deferral: Duration,
}

impl AdaptiveRateLimiter {
    /// Creates a limiter; `Retry-After` deferral is capped at `max-delay-ms`
    pub fn new(config: RateLimitConfig) -> Self {
        let bounds = RateBounds::from_config(&config);
        Self {
            domains: DashMap::new(),
            max_deferral: Duration::from_millis(config.max_delay_ms),
            config,
            bounds,
        }
    }

    /// Sets the longest `Retry-After` that may hold back a domain
    pub fn with_max_deferral(mut self, max_deferral: Duration) -> Self {
        self.max_deferral = max_deferral;
        self
    }

    pub fn bounds(&self) -> RateBounds {
        self.bounds
    }

    /// Waits until the domain's pacing allows another request
    ///
    /// The slot is reserved before sleeping, so concurrent waiters on one
    /// domain are released one delay apart.
    pub async fn wait_for_permission(&self, domain: &str) {
        let wait = {
            let mut state = self.entry(domain);
            state.reserve_slot(now())
        };

        if !wait.is_zero() {
            trace!("Waiting {:?} before next request to {}", wait, domain);
            tokio::time::sleep(wait).await;
        }
    }

    /// Like [`wait_for_permission`](Self::wait_for_permission), but gives up
    /// without claiming a slot when none is free within `max_wait`
    pub async fn wait_for_permission_within(&self, domain: &str, max_wait: Duration) -> bool {
        let reserved = {
            let mut state = self.entry(domain);
            state.reserve_slot_within(now(), max_wait)
        };

        match reserved {
            Some(wait) => {
                if !wait.is_zero() {
                    trace!("Waiting {:?} before next request to {}", wait, domain);
                    tokio::time::sleep(wait).await;
                }
                true
            }
            None => {
                debug!("No request slot for {} within {:?}", domain, max_wait);
                false
            }
        }
    }

    /// Records a successful response and its latency
    pub fn report_success(&self, domain: &str, response_time_ms: f64) {
        let mut state = self.entry(domain);
        let before = state.current_rate_per_minute;
        state.apply_success(response_time_ms, &self.config, &self.bounds);

        if state.current_rate_per_minute != before {
            debug!(
                "Rate for {} adjusted {:.2} -> {:.2} req/min ({:.0}ms response)",
                domain, before, state.current_rate_per_minute, response_time_ms
            );
        }
    }

    /// Records an HTTP 429; `retry_after` also defers the next request
    ///
    /// The deferral is capped at the limiter's maximum deferral.
    pub fn report_rate_limited(&self, domain: &str, retry_after: Option<Duration>) {
        let mut state = self.entry(domain);
        state.apply_penalty(self.config.penalty_factor, &self.bounds);
        if let Some(after) = retry_after {
            state.defer_until(now() + after.min(self.max_deferral));
        }

        warn!(
            "Rate limited by {}; rate reduced to {:.2} req/min{}",
            domain,
            state.current_rate_per_minute,
            retry_after
                .map(|d| format!(", retry after {:?}", d))
                .unwrap_or_default()
        );
    }

    /// Records a 5xx response, network failure, or timeout
    pub fn report_server_error(&self, domain: &str) {
        let mut state = self.entry(domain);
        state.apply_penalty(self.config.penalty_factor, &self.bounds);
        debug!(
            "Server error from {}; rate reduced to {:.2} req/min",
            domain, state.current_rate_per_minute
        );
    }

    /// Records a 4xx response other than 429; the rate is left alone
    pub fn report_client_error(&self, domain: &str, status: u16) {
        trace!("Client error {} from {}; rate unchanged", status, domain);
    }

    /// Dispatches a failed fetch to the matching report method
    pub fn report_failure(&self, domain: &str, error: &FetchError) {
        match error {
            FetchError::RateLimited { retry_after } => self.report_rate_limited(domain, *retry_after),
            FetchError::ClientError { status } => self.report_client_error(domain, *status),
            FetchError::ServerError { .. } | FetchError::Network(_) | FetchError::Timeout => {
                self.report_server_error(domain)
            }
        }
    }

    /// Current rate for a domain, if it has been seen
    pub fn current_rate(&self, domain: &str) -> Option<f64> {
        self.domains
            .get(domain)
            .map(|state| state.current_rate_per_minute)
    }

    /// Current spacing between requests for a domain, if it has been seen
    pub fn current_delay(&self, domain: &str) -> Option<Duration> {
        self.domains.get(domain).map(|state| state.delay())
    }

    /// Number of domains with pacing state
    pub fn domain_count(&self) -> usize {
        self.domains.len()
    }

    /// Copies the persistent part of every domain's state
    pub fn snapshot(&self) -> HashMap<String, DomainRateState> {
        self.domains
            .iter()
            .map(|entry| {
                let mut state = entry.value().clone();
                state.next_allowed_at = None;
                (entry.key().clone(), state)
            })
            .collect()
    }

    /// Loads previously saved states, clamping rates into the current bounds
    pub fn restore(&self, states: HashMap<String, DomainRateState>) {
        for (domain, mut state) in states {
            state.current_rate_per_minute = self.bounds.clamp(state.current_rate_per_minute);
            state.next_allowed_at = None;
            self.domains.insert(domain, state);
        }
    }

    fn entry(&self, domain: &str) -> dashmap::mapref::one::RefMut<'_, String, DomainRateState> {
        self.domains
            .entry(domain.to_string())
            .or_insert_with(|| {
                DomainRateState::new(self.config.initial_requests_per_minute, &self.bounds)
            })
    }
}

/// Wall-clock instant that follows tokio's clock, so paused test time applies
fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}
