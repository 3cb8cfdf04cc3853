use std::fmt;
use std::time::{Duration, Instant};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CircuitState {
    /// Normal operation - requests proceed
    Closed,
    /// Too many failures - requests are skipped until `open_until`
    Open,
    /// Cooldown elapsed - exactly one trial request is admitted
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half-open",
        };
        f.write_str(name)
    }
}

/// What an admission check granted
///
/// Outcomes are reported back with the admission they belong to, so only the
/// half-open trial itself can close or reopen a half-open circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Rejected,
    /// An attempt through a closed circuit
    Regular,
    /// The single half-open trial
    Trial,
}

impl Admission {
    pub fn is_admitted(self) -> bool {
        !matches!(self, Self::Rejected)
    }
}

/// Failure tracking for one domain
///
/// Every access goes through [`DomainCircuitState::refresh`], so an expired
/// `Open` circuit is observed as `HalfOpen` and never silently returns to
/// `Closed`.
#[derive(Debug, Clone)]
pub struct DomainCircuitState {
    pub state: CircuitState,

    /// Consecutive failures; reset to zero by a success
    pub failure_count: u32,

    /// Set while `Open`; the instant the circuit becomes eligible for a trial
    pub open_until: Option<Instant>,

    /// True while the half-open trial request is running
    pub trial_in_flight: bool,

    /// Attempts skipped because the circuit was not admitting requests
    pub rejected_count: u64,
}

impl DomainCircuitState {
    pub fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            open_until: None,
            trial_in_flight: false,
            rejected_count: 0,
        }
    }

    /// Moves an expired `Open` circuit to `HalfOpen`
    pub fn refresh(&mut self, now: Instant) {
        if self.state == CircuitState::Open && self.open_until.map_or(true, |until| now >= until) {
            self.state = CircuitState::HalfOpen;
            self.open_until = None;
            self.trial_in_flight = false;
        }
    }

    /// Decides whether an attempt may run now
    ///
    /// In `HalfOpen` only the first caller is admitted, as the trial; the rest
    /// are rejected until the trial reports back.
    pub fn try_admit(&mut self, now: Instant) -> Admission {
        self.refresh(now);

        let admission = match self.state {
            CircuitState::Closed => Admission::Regular,
            CircuitState::Open => Admission::Rejected,
            CircuitState::HalfOpen if !self.trial_in_flight => {
                self.trial_in_flight = true;
                Admission::Trial
            }
            CircuitState::HalfOpen => Admission::Rejected,
        };

        if !admission.is_admitted() {
            self.rejected_count += 1;
        }
        admission
    }

    /// Records a successful attempt; returns true if it closed the circuit
    ///
    /// While `Open`, and in `HalfOpen` for anything but the trial, the
    /// outcome is stale and ignored.
    pub fn record_success(&mut self, admission: Admission) -> bool {
        match (self.state, admission) {
            (_, Admission::Rejected) => false,
            (CircuitState::Closed, _) => {
                self.failure_count = 0;
                false
            }
            (CircuitState::HalfOpen, Admission::Trial) => {
                self.state = CircuitState::Closed;
                self.failure_count = 0;
                self.open_until = None;
                self.trial_in_flight = false;
                true
            }
            _ => false,
        }
    }

    /// Records a failed attempt; returns true if it opened the circuit
    ///
    /// Stale outcomes are ignored the same way as in
    /// [`record_success`](Self::record_success).
    pub fn record_failure(
        &mut self,
        admission: Admission,
        threshold: u32,
        reset_timeout: Duration,
        now: Instant,
    ) -> bool {
        match (self.state, admission) {
            (_, Admission::Rejected) => false,
            (CircuitState::Closed, _) => {
                self.failure_count = self.failure_count.saturating_add(1);
                if self.failure_count >= threshold {
                    self.open(reset_timeout, now);
                    return true;
                }
                false
            }
            (CircuitState::HalfOpen, Admission::Trial) => {
                self.failure_count = self.failure_count.saturating_add(1);
                self.open(reset_timeout, now);
                true
            }
            _ => false,
        }
    }

    /// Returns the remaining open time, if the circuit is open
    pub fn remaining_open(&self, now: Instant) -> Option<Duration> {
        match (self.state, self.open_until) {
            (CircuitState::Open, Some(until)) if until > now => Some(until - now),
            _ => None,
        }
    }

    fn open(&mut self, reset_timeout: Duration, now: Instant) {
        self.state = CircuitState::Open;
        self.open_until = Some(now + reset_timeout);
        self.trial_in_flight = false;
    }
}

impl Default for DomainCircuitState {
    fn default() -> Self {
        Self::new()
    }
}
