use crate::config::RateLimitConfig;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Requests-per-minute bounds derived from the configured delay bounds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateBounds {
    /// Slowest permitted pace (from `max_delay_ms`)
    pub min_rate: f64,
    /// Fastest permitted pace (from `min_delay_ms`)
    pub max_rate: f64,
}

impl RateBounds {
    /// Converts delay bounds in milliseconds into rate bounds
    pub fn from_delays(min_delay_ms: u64, max_delay_ms: u64) -> Self {
        let max_rate = 60_000.0 / min_delay_ms.max(1) as f64;
        let min_rate = 60_000.0 / max_delay_ms.max(1) as f64;
        Self {
            min_rate: min_rate.min(max_rate),
            max_rate,
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::from_delays(config.min_delay_ms, config.max_delay_ms)
    }

    /// Clamps a rate into the bounds; non-finite values fall to the minimum
    pub fn clamp(&self, rate: f64) -> f64 {
        if rate.is_nan() {
            return self.min_rate;
        }
        rate.clamp(self.min_rate, self.max_rate)
    }
}

/// Pacing state of a single domain
///
/// The rate is expressed in requests per minute and always stays inside the
/// configured [`RateBounds`]. `next_allowed_at` is the earliest instant the
/// next request may start; it is runtime-only and not persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainRateState {
    /// Current target rate in requests per minute
    pub current_rate_per_minute: f64,

    /// Latency of the most recent successful response
    pub last_response_time_ms: f64,

    /// Fast responses in a row since the last penalty or slow response
    pub consecutive_successes: u32,

    /// Earliest start time for the next request
    #[serde(skip)]
    pub next_allowed_at: Option<Instant>,
}

impl DomainRateState {
    /// Creates a new state at the given initial rate
    pub fn new(initial_rate: f64, bounds: &RateBounds) -> Self {
        Self {
            current_rate_per_minute: bounds.clamp(initial_rate),
            last_response_time_ms: 0.0,
            consecutive_successes: 0,
            next_allowed_at: None,
        }
    }

    /// Spacing between requests implied by the current rate
    pub fn delay(&self) -> Duration {
        Duration::from_secs_f64(60.0 / self.current_rate_per_minute)
    }

    /// Returns the time until the next request may start, or None if it may start now
    pub fn time_until_next_request(&self, now: Instant) -> Option<Duration> {
        self.next_allowed_at
            .filter(|next| *next > now)
            .map(|next| next - now)
    }

    /// Claims the next request slot and returns how long the caller must wait for it
    ///
    /// Each call pushes `next_allowed_at` forward by one delay, so concurrent
    /// callers receive successive slots instead of all firing at once.
    pub fn reserve_slot(&mut self, now: Instant) -> Duration {
        let slot = match self.next_allowed_at {
            Some(next) if next > now => next,
            _ => now,
        };
        self.next_allowed_at = Some(slot + self.delay());
        slot - now
    }

    /// Claims the next slot only if it starts within `max_wait`
    ///
    /// Returns the wait for the claimed slot, or None and leaves the state
    /// untouched when the slot is further away.
    pub fn reserve_slot_within(&mut self, now: Instant, max_wait: Duration) -> Option<Duration> {
        match self.time_until_next_request(now) {
            Some(wait) if wait > max_wait => None,
            _ => Some(self.reserve_slot(now)),
        }
    }

    /// Pushes the next permitted request to at least `until`
    pub fn defer_until(&mut self, until: Instant) {
        if self.next_allowed_at.map_or(true, |next| next < until) {
            self.next_allowed_at = Some(until);
        }
    }

    /// Adjusts the rate after a successful response
    ///
    /// Slow responses step the rate down by `adaptive_factor`. A streak of
    /// fast responses steps it up by the same factor, one step per fast
    /// response once the streak is long enough.
    pub fn apply_success(
        &mut self,
        response_time_ms: f64,
        config: &RateLimitConfig,
        bounds: &RateBounds,
    ) {
        self.last_response_time_ms = response_time_ms;

        if response_time_ms > config.slow_response_threshold_ms {
            self.consecutive_successes = 0;
            self.current_rate_per_minute =
                bounds.clamp(self.current_rate_per_minute * (1.0 - config.adaptive_factor));
        } else if response_time_ms <= config.fast_response_threshold_ms {
            self.consecutive_successes = self.consecutive_successes.saturating_add(1);
            if self.consecutive_successes >= config.successes_before_increase {
                self.current_rate_per_minute =
                    bounds.clamp(self.current_rate_per_minute * (1.0 + config.adaptive_factor));
            }
        }
    }

    /// Applies a multiplicative penalty (429 or 5xx) and resets the success streak
    pub fn apply_penalty(&mut self, penalty_factor: f64, bounds: &RateBounds) {
        self.consecutive_successes = 0;
        self.current_rate_per_minute = bounds.clamp(self.current_rate_per_minute * penalty_factor);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> RateLimitConfig {
        RateLimitConfig {
            initial_requests_per_minute: 60.0,
            min_delay_ms: 100,
            max_delay_ms: 10_000,
            adaptive_factor: 0.1,
            penalty_factor: 0.5,
            slow_response_threshold_ms: 2_000.0,
            fast_response_threshold_ms: 500.0,
            successes_before_increase: 2,
        }
    }

    #[test]
    fn test_rate_bounds_from_delays() {
        let bounds = RateBounds::from_delays(100, 10_000);
        assert_eq!(bounds.max_rate, 600.0);
        assert_eq!(bounds.min_rate, 6.0);

        assert_eq!(bounds.clamp(10_000.0), 600.0);
        assert_eq!(bounds.clamp(0.0), 6.0);
        assert_eq!(bounds.clamp(f64::NAN), 6.0);
        assert_eq!(bounds.clamp(f64::INFINITY), 600.0);
    }

    #[test]
    fn test_new_state_is_clamped() {
        let bounds = RateBounds::from_delays(100, 10_000);
        let state = DomainRateState::new(1_000_000.0, &bounds);
        assert_eq!(state.current_rate_per_minute, 600.0);
        assert_eq!(state.delay(), Duration::from_millis(100));
    }

    #[test]
    fn test_reserve_slot_spaces_requests() {
        let bounds = RateBounds::from_delays(100, 10_000);
        let mut state = DomainRateState::new(60.0, &bounds);
        let now = Instant::now();

        assert_eq!(state.reserve_slot(now), Duration::ZERO);
        assert_eq!(state.reserve_slot(now), Duration::from_secs(1));
        assert_eq!(state.reserve_slot(now), Duration::from_secs(2));

        let later = now + Duration::from_secs(10);
        assert_eq!(state.reserve_slot(later), Duration::ZERO);
    }

    #[test]
    fn test_reserve_slot_within_leaves_far_slots_alone() {
        let bounds = RateBounds::from_delays(100, 10_000);
        let mut state = DomainRateState::new(60.0, &bounds);
        let now = Instant::now();

        assert_eq!(state.reserve_slot_within(now, Duration::ZERO), Some(Duration::ZERO));
        assert_eq!(state.reserve_slot_within(now, Duration::from_millis(500)), None);
        assert_eq!(state.next_allowed_at, Some(now + Duration::from_secs(1)));

        assert_eq!(
            state.reserve_slot_within(now, Duration::from_secs(1)),
            Some(Duration::from_secs(1))
        );
    }

    #[test]
    fn test_time_until_next_request() {
        let bounds = RateBounds::from_delays(100, 10_000);
        let mut state = DomainRateState::new(60.0, &bounds);
        let now = Instant::now();

        assert!(state.time_until_next_request(now).is_none());

        state.reserve_slot(now);
        assert_eq!(
            state.time_until_next_request(now + Duration::from_millis(400)),
            Some(Duration::from_millis(600))
        );
        assert!(state
            .time_until_next_request(now + Duration::from_millis(1_100))
            .is_none());
    }

    #[test]
    fn test_defer_until_only_moves_forward() {
        let bounds = RateBounds::from_delays(100, 10_000);
        let mut state = DomainRateState::new(60.0, &bounds);
        let now = Instant::now();

        state.defer_until(now + Duration::from_secs(5));
        state.defer_until(now + Duration::from_secs(1));
        assert_eq!(state.next_allowed_at, Some(now + Duration::from_secs(5)));
    }

    #[test]
    fn test_fast_streak_raises_rate() {
        let config = test_config();
        let bounds = RateBounds::from_config(&config);
        let mut state = DomainRateState::new(60.0, &bounds);

        state.apply_success(100.0, &config, &bounds);
        assert_eq!(state.current_rate_per_minute, 60.0);

        state.apply_success(100.0, &config, &bounds);
        assert!((state.current_rate_per_minute - 66.0).abs() < 1e-9);
        assert_eq!(state.last_response_time_ms, 100.0);
    }

    #[test]
    fn test_slow_response_lowers_rate() {
        let config = test_config();
        let bounds = RateBounds::from_config(&config);
        let mut state = DomainRateState::new(60.0, &bounds);
        state.consecutive_successes = 5;

        state.apply_success(3_000.0, &config, &bounds);
        assert!((state.current_rate_per_minute - 54.0).abs() < 1e-9);
        assert_eq!(state.consecutive_successes, 0);
    }

    #[test]
    fn test_penalty_is_steeper_than_gradual_step() {
        let config = test_config();
        let bounds = RateBounds::from_config(&config);
        let mut state = DomainRateState::new(60.0, &bounds);

        state.apply_penalty(config.penalty_factor, &bounds);
        assert_eq!(state.current_rate_per_minute, 30.0);

        for _ in 0..20 {
            state.apply_penalty(config.penalty_factor, &bounds);
        }
        assert_eq!(state.current_rate_per_minute, bounds.min_rate);
    }
}
