//! Circuit breaker for per-domain fault isolation
//!
//! A domain that keeps failing is skipped for a cooldown period instead of
//! being hammered. The circuit for each domain moves through three states:
//! - `Closed`: requests proceed; consecutive failures are counted
//! - `Open`: requests are rejected until the reset timeout expires
//! - `HalfOpen`: a single trial request decides whether to close or reopen

use crate::config::CircuitBreakerConfig;
use crate::state::{Admission, CircuitState, DomainCircuitState};
use dashmap::DashMap;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Result of running an action through the breaker
#[derive(Debug)]
pub enum Execution<T> {
    /// The action ran and produced this output
    Ran(T),
    /// The circuit was not admitting requests; the action did not run
    Rejected,
}

impl<T> Execution<T> {
    pub fn was_rejected(&self) -> bool {
        matches!(self, Self::Rejected)
    }
}

/// Per-domain circuit breaker
pub struct CircuitBreaker {
    domains: DashMap<String, DomainCircuitState>,
    failure_threshold: u32,
    reset_timeout: Duration,
    total_rejected: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            domains: DashMap::new(),
            failure_threshold: failure_threshold.max(1),
            reset_timeout,
            total_rejected: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &CircuitBreakerConfig) -> Self {
        Self::new(config.failure_threshold, config.reset_timeout())
    }

    /// Runs `action` if the domain's circuit admits it
    ///
    /// Every `Err` counts as a failure and every `Ok` as a success.
    pub async fn execute<T, E, F, Fut>(&self, domain: &str, action: F) -> Execution<Result<T, E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.execute_with(domain, action, |_| true).await
    }

    /// Runs `action` if admitted; `is_failure` decides which errors count
    ///
    /// Errors that do not count are recorded as successes, since the domain
    /// did answer. If the returned future is dropped before the action
    /// finishes, the attempt is recorded as a failure so a half-open trial is
    /// never left dangling.
    pub async fn execute_with<T, E, F, Fut, P>(
        &self,
        domain: &str,
        action: F,
        is_failure: P,
    ) -> Execution<Result<T, E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
    {
        let admission = self.should_attempt(domain);
        if !admission.is_admitted() {
            return Execution::Rejected;
        }

        let mut guard = AttemptGuard {
            breaker: self,
            domain,
            admission,
            settled: false,
        };

        let result = action().await;
        guard.settled = true;

        match &result {
            Err(e) if is_failure(e) => self.record_failure(domain, admission),
            _ => self.record_success(domain, admission),
        }

        Execution::Ran(result)
    }

    /// Checks whether a request to the domain may proceed now
    ///
    /// Admitting a half-open domain claims its single trial slot. The caller
    /// must report the outcome with the returned admission through
    /// [`record_success`](Self::record_success) or
    /// [`record_failure`](Self::record_failure).
    pub fn should_attempt(&self, domain: &str) -> Admission {
        let mut state = self.domains.entry(domain.to_string()).or_default();
        let admission = state.try_admit(now());

        match admission {
            Admission::Trial => info!("Circuit for {} half-open; sending trial request", domain),
            Admission::Rejected => {
                self.total_rejected.fetch_add(1, Ordering::Relaxed);
                debug!("Circuit for {} is {}; request rejected", domain, state.state);
            }
            Admission::Regular => {}
        }
        admission
    }

    pub fn record_success(&self, domain: &str, admission: Admission) {
        let mut state = self.domains.entry(domain.to_string()).or_default();
        if state.record_success(admission) {
            info!("Circuit for {} closed after successful trial", domain);
        }
    }

    pub fn record_failure(&self, domain: &str, admission: Admission) {
        let mut state = self.domains.entry(domain.to_string()).or_default();
        let opened = state.record_failure(
            admission,
            self.failure_threshold,
            self.reset_timeout,
            now(),
        );

        if opened {
            warn!(
                "Circuit for {} opened after {} consecutive failures; cooling down for {:?}",
                domain, state.failure_count, self.reset_timeout
            );
        }
    }

    /// Current state of a domain's circuit, if the domain has been seen
    pub fn state_of(&self, domain: &str) -> Option<CircuitState> {
        self.domains.get_mut(domain).map(|mut state| {
            state.refresh(now());
            state.state
        })
    }

    /// Consecutive failures recorded for a domain
    pub fn failure_count(&self, domain: &str) -> u32 {
        self.domains
            .get(domain)
            .map(|state| state.failure_count)
            .unwrap_or(0)
    }

    /// Requests rejected for a domain
    pub fn rejected_count(&self, domain: &str) -> u64 {
        self.domains
            .get(domain)
            .map(|state| state.rejected_count)
            .unwrap_or(0)
    }

    /// Requests rejected across all domains
    pub fn total_rejected(&self) -> u64 {
        self.total_rejected.load(Ordering::Relaxed)
    }

    /// Domains whose circuit is currently open
    pub fn open_domains(&self) -> Vec<String> {
        let now = now();
        let mut open: Vec<String> = self
            .domains
            .iter_mut()
            .filter_map(|mut entry| {
                entry.value_mut().refresh(now);
                (entry.state == CircuitState::Open).then(|| entry.key().clone())
            })
            .collect();
        open.sort();
        open
    }

    /// Number of domains in each state
    pub fn state_counts(&self) -> HashMap<CircuitState, usize> {
        let now = now();
        let mut counts = HashMap::new();
        for mut entry in self.domains.iter_mut() {
            entry.value_mut().refresh(now);
            *counts.entry(entry.state).or_insert(0) += 1;
        }
        counts
    }

    /// Forgets all failure history for a domain
    pub fn reset_circuit(&self, domain: &str) {
        if self.domains.remove(domain).is_some() {
            info!("Circuit for {} manually reset", domain);
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::from_config(&CircuitBreakerConfig::default())
    }
}

struct AttemptGuard<'a> {
    breaker: &'a CircuitBreaker,
    domain: &'a str,
    admission: Admission,
    settled: bool,
}

impl Drop for AttemptGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            debug!("Attempt on {} abandoned; counting as failure", self.domain);
            self.breaker.record_failure(self.domain, self.admission);
        }
    }
}

fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    const TIMEOUT: Duration = Duration::from_secs(30);

    async fn fail(breaker: &CircuitBreaker, domain: &str) -> Execution<Result<(), &'static str>> {
        breaker.execute(domain, || async { Err("boom") }).await
    }

    async fn succeed(breaker: &CircuitBreaker, domain: &str) -> Execution<Result<(), &'static str>> {
        breaker.execute(domain, || async { Ok(()) }).await
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_threshold_and_rejects() {
        let breaker = CircuitBreaker::new(3, TIMEOUT);

        for _ in 0..3 {
            assert!(matches!(fail(&breaker, "bad.com").await, Execution::Ran(Err(_))));
        }
        assert_eq!(breaker.state_of("bad.com"), Some(CircuitState::Open));

        let calls = AtomicU32::new(0);
        let outcome = breaker
            .execute("bad.com", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, ()>(())
            })
            .await;

        assert!(outcome.was_rejected());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(breaker.rejected_count("bad.com"), 1);
        assert_eq!(breaker.total_rejected(), 1);
        assert_eq!(breaker.open_domains(), vec!["bad.com".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_domains_are_isolated() {
        let breaker = CircuitBreaker::new(1, TIMEOUT);
        fail(&breaker, "bad.com").await;

        assert!(matches!(succeed(&breaker, "good.com").await, Execution::Ran(Ok(()))));
        assert_eq!(breaker.state_of("good.com"), Some(CircuitState::Closed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_failure_count() {
        let breaker = CircuitBreaker::new(3, TIMEOUT);
        fail(&breaker, "flaky.com").await;
        fail(&breaker, "flaky.com").await;
        succeed(&breaker, "flaky.com").await;
        fail(&breaker, "flaky.com").await;

        assert_eq!(breaker.failure_count("flaky.com"), 1);
        assert_eq!(breaker.state_of("flaky.com"), Some(CircuitState::Closed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_trial_success_closes() {
        let breaker = CircuitBreaker::new(1, TIMEOUT);
        fail(&breaker, "example.com").await;

        tokio::time::advance(TIMEOUT).await;
        assert_eq!(breaker.state_of("example.com"), Some(CircuitState::HalfOpen));

        assert!(matches!(succeed(&breaker, "example.com").await, Execution::Ran(Ok(()))));
        assert_eq!(breaker.state_of("example.com"), Some(CircuitState::Closed));
        assert_eq!(breaker.failure_count("example.com"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_trial_failure_reopens() {
        let breaker = CircuitBreaker::new(1, TIMEOUT);
        fail(&breaker, "example.com").await;

        tokio::time::advance(TIMEOUT).await;
        fail(&breaker, "example.com").await;
        assert_eq!(breaker.state_of("example.com"), Some(CircuitState::Open));

        tokio::time::advance(TIMEOUT / 2).await;
        assert!(fail(&breaker, "example.com").await.was_rejected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_admits_one_concurrent_trial() {
        let breaker = CircuitBreaker::new(1, TIMEOUT);
        fail(&breaker, "example.com").await;
        tokio::time::advance(TIMEOUT).await;

        let trial = breaker.should_attempt("example.com");
        assert_eq!(trial, Admission::Trial);
        assert_eq!(breaker.should_attempt("example.com"), Admission::Rejected);
        breaker.record_success("example.com", trial);
        assert_eq!(breaker.should_attempt("example.com"), Admission::Regular);
    }

    #[tokio::test(start_paused = true)]
    async fn test_straggler_success_keeps_circuit_open() {
        let breaker = CircuitBreaker::new(1, TIMEOUT);

        let failing = breaker.should_attempt("example.com");
        let straggler = breaker.should_attempt("example.com");
        breaker.record_failure("example.com", failing);
        assert_eq!(breaker.state_of("example.com"), Some(CircuitState::Open));

        breaker.record_success("example.com", straggler);
        assert_eq!(breaker.state_of("example.com"), Some(CircuitState::Open));
        assert!(succeed(&breaker, "example.com").await.was_rejected());

        tokio::time::advance(TIMEOUT).await;
        assert_eq!(breaker.state_of("example.com"), Some(CircuitState::HalfOpen));
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_counting_errors_are_successes() {
        let breaker = CircuitBreaker::new(1, TIMEOUT);
        let outcome = breaker
            .execute_with("example.com", || async { Err::<(), u16>(404) }, |status| *status >= 500)
            .await;

        assert!(matches!(outcome, Execution::Ran(Err(404))));
        assert_eq!(breaker.state_of("example.com"), Some(CircuitState::Closed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_attempt_counts_as_failure() {
        let breaker = CircuitBreaker::new(1, TIMEOUT);

        let slow = breaker.execute("example.com", || async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<_, ()>(())
        });
        let timed_out = tokio::time::timeout(Duration::from_secs(1), slow).await;

        assert!(timed_out.is_err());
        assert_eq!(breaker.state_of("example.com"), Some(CircuitState::Open));
    }

    #[tokio::test(start_paused = true)]
    async fn test_state_counts_and_reset() {
        let breaker = CircuitBreaker::new(1, TIMEOUT);
        fail(&breaker, "a.com").await;
        fail(&breaker, "b.com").await;
        succeed(&breaker, "c.com").await;

        let counts = breaker.state_counts();
        assert_eq!(counts.get(&CircuitState::Open), Some(&2));
        assert_eq!(counts.get(&CircuitState::Closed), Some(&1));

        breaker.reset_circuit("a.com");
        assert!(breaker.state_of("a.com").is_none());
        assert!(matches!(succeed(&breaker, "a.com").await, Execution::Ran(Ok(()))));
    }
}
