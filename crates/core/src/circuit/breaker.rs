//! Four-state circuit breaker
//!
//! State, metrics, and the half-open trial counter live in one
//! [`parking_lot::Mutex`]. Admission ([`CircuitBreaker::acquire`]) and
//! outcome recording ([`CallPermit::complete`]) each take that lock once,
//! so every transition decision reads the metrics written by the same
//! critical section. The lock is never held across the guarded action's
//! `.await`.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use execguard_common::{Clock, ErrorClassification, ErrorSeverity, SystemClock};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use super::state::{
    CircuitMetrics, CircuitState, CircuitStatus, CircuitThresholds, StateControl, StateTransition,
};
use crate::config::{ConfigResult, DEFAULT_HISTORY_LIMIT};

//==============================================================================
// Error Types
//==============================================================================

/// A call was refused without invoking the action
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GateRejection {
    /// Open, or half-open with every trial slot taken
    #[error("Circuit '{circuit}' is open")]
    Open { circuit: String, retry_after: Option<Duration> },

    /// Isolated by an operator
    #[error("Circuit '{circuit}' is isolated")]
    Isolated { circuit: String },
}

impl GateRejection {
    /// Name of the circuit that refused the call
    pub fn circuit(&self) -> &str {
        match self {
            Self::Open { circuit, .. } | Self::Isolated { circuit } => circuit,
        }
    }
}

impl ErrorClassification for GateRejection {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Open { .. })
    }

    fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::Warning
    }

    fn is_critical(&self) -> bool {
        false
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Open { retry_after, .. } => *retry_after,
            Self::Isolated { .. } => None,
        }
    }
}

/// Errors returned by [`CircuitBreaker::call`]
#[derive(Debug, Error)]
pub enum CircuitError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// Rejected; the action was not invoked
    #[error("Circuit '{circuit}' is open")]
    Open { circuit: String, retry_after: Option<Duration> },

    /// Rejected by an operator override; the action was not invoked
    #[error("Circuit '{circuit}' is isolated")]
    Isolated { circuit: String },

    /// The action ran and failed
    #[error(transparent)]
    Operation(E),
}

impl<E> CircuitError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// Whether the call was refused at the gate
    pub const fn is_rejection(&self) -> bool {
        !matches!(self, Self::Operation(_))
    }

    /// The action's own error, if it ran
    pub fn into_operation_error(self) -> Option<E> {
        match self {
            Self::Operation(e) => Some(e),
            Self::Open { .. } | Self::Isolated { .. } => None,
        }
    }
}

impl<E> From<GateRejection> for CircuitError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(rejection: GateRejection) -> Self {
        match rejection {
            GateRejection::Open { circuit, retry_after } => Self::Open { circuit, retry_after },
            GateRejection::Isolated { circuit } => Self::Isolated { circuit },
        }
    }
}

//==============================================================================
// Breaker
//==============================================================================

struct CircuitCore {
    state: CircuitState,
    control: StateControl,
    metrics: CircuitMetrics,
    opened_at: Option<Instant>,
    state_changed_at: DateTime<Utc>,
    trials_in_flight: u32,
    /// Bumped on every transition; permits from an older phase only touch
    /// the totals
    phase: u64,
    history: VecDeque<StateTransition>,
}

/// Named gate in front of one dependency
pub struct CircuitBreaker {
    name: String,
    thresholds: CircuitThresholds,
    history_limit: usize,
    clock: Arc<dyn Clock>,
    core: Mutex<CircuitCore>,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core = self.core.lock();
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &core.state)
            .field("control", &core.control)
            .field("metrics", &core.metrics)
            .finish_non_exhaustive()
    }
}

impl CircuitBreaker {
    /// Breaker on the system clock
    pub fn new(name: impl Into<String>, thresholds: CircuitThresholds) -> ConfigResult<Self> {
        Self::with_clock(name, thresholds, Arc::new(SystemClock))
    }

    /// Breaker on a custom clock (useful for testing)
    pub fn with_clock(
        name: impl Into<String>,
        thresholds: CircuitThresholds,
        clock: Arc<dyn Clock>,
    ) -> ConfigResult<Self> {
        thresholds.validate()?;
        let now = clock.utc_now();

        Ok(Self {
            name: name.into(),
            thresholds,
            history_limit: DEFAULT_HISTORY_LIMIT,
            clock,
            core: Mutex::new(CircuitCore {
                state: CircuitState::Closed,
                control: StateControl::Automatic,
                metrics: CircuitMetrics::default(),
                opened_at: None,
                state_changed_at: now,
                trials_in_flight: 0,
                phase: 0,
                history: VecDeque::new(),
            }),
        })
    }

    /// Bound the state history (minimum 1)
    #[must_use]
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit.max(1);
        self
    }

    /// Circuit name used in logs and rejections
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Thresholds this breaker was built with
    pub const fn thresholds(&self) -> &CircuitThresholds {
        &self.thresholds
    }

    /// Admit one call, or reject it without side effects on the metrics
    ///
    /// The returned permit must be completed with the call's outcome.
    /// Dropping it uncompleted frees its trial slot and records nothing.
    pub fn acquire(&self) -> Result<CallPermit<'_>, GateRejection> {
        let mut core = self.core.lock();
        self.refresh(&mut core);

        match core.control.effective(core.state) {
            CircuitState::Closed => Ok(CallPermit::new(self, core.phase, false)),
            CircuitState::HalfOpen => {
                if core.trials_in_flight >= self.thresholds.half_open_max_calls {
                    debug!(
                        circuit = %self.name,
                        in_flight = core.trials_in_flight,
                        "Half-open trial slots taken, rejecting"
                    );
                    let circuit = self.name.clone();
                    return Err(GateRejection::Open { circuit, retry_after: None });
                }
                core.trials_in_flight += 1;
                Ok(CallPermit::new(self, core.phase, true))
            }
            CircuitState::Open => Err(GateRejection::Open {
                circuit: self.name.clone(),
                retry_after: self.retry_after(&core),
            }),
            CircuitState::Isolated => Err(GateRejection::Isolated { circuit: self.name.clone() }),
        }
    }

    /// Run `action` behind the gate and record its outcome
    #[instrument(skip(self, action), fields(circuit = %self.name))]
    pub async fn call<F, Fut, T, E>(&self, action: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let permit = self.acquire()?;
        match action().await {
            Ok(value) => {
                permit.complete(true);
                Ok(value)
            }
            Err(error) => {
                permit.complete(false);
                Err(CircuitError::Operation(error))
            }
        }
    }

    /// Whether a call made now would be admitted
    pub fn can_execute(&self) -> bool {
        let mut core = self.core.lock();
        self.refresh(&mut core);
        match core.control.effective(core.state) {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => core.trials_in_flight < self.thresholds.half_open_max_calls,
            CircuitState::Open | CircuitState::Isolated => false,
        }
    }

    /// Computed state
    pub fn state(&self) -> CircuitState {
        let mut core = self.core.lock();
        self.refresh(&mut core);
        core.state
    }

    /// State used for gating
    pub fn effective_state(&self) -> CircuitState {
        let mut core = self.core.lock();
        self.refresh(&mut core);
        core.control.effective(core.state)
    }

    /// Snapshot of state, override, metrics and thresholds
    pub fn status(&self) -> CircuitStatus {
        let mut core = self.core.lock();
        self.refresh(&mut core);
        CircuitStatus {
            name: self.name.clone(),
            state: core.state,
            effective_state: core.control.effective(core.state),
            manual_override: core.control.forced(),
            metrics: core.metrics.clone(),
            thresholds: self.thresholds.clone(),
            state_changed_at: core.state_changed_at,
            trials_in_flight: core.trials_in_flight,
        }
    }

    /// Transitions, oldest first
    pub fn state_history(&self) -> Vec<StateTransition> {
        self.core.lock().history.iter().cloned().collect()
    }

    /// Force the effective state, or return to automatic control with `None`
    pub fn set_manual_override(&self, state: Option<CircuitState>) {
        let mut core = self.core.lock();
        self.refresh(&mut core);

        let before = core.control.effective(core.state);
        core.control = StateControl::from(state);
        let after = core.control.effective(core.state);

        let reason = state.map_or_else(
            || "manual override cleared".to_string(),
            |forced| format!("manual override set to {forced}"),
        );
        self.push_history(&mut core, before, after, reason);
        drop(core);

        info!(circuit = %self.name, from = %before, to = %after, "Circuit override changed");
    }

    /// Force CLOSED with zeroed metrics; an override stays in place
    pub fn reset(&self) {
        let mut core = self.core.lock();
        let from = core.state;
        self.enter(&mut core, CircuitState::Closed, "manual reset".to_string());
        core.metrics = CircuitMetrics::default();
        drop(core);

        info!(circuit = %self.name, from = %from, "Circuit reset");
    }

    //--------------------------------------------------------------------------
    // Internals, all called with the core lock held
    //--------------------------------------------------------------------------

    fn refresh(&self, core: &mut CircuitCore) {
        if core.state != CircuitState::Open {
            return;
        }
        let elapsed = core.opened_at.map(|at| self.clock.now().saturating_duration_since(at));
        if elapsed.is_some_and(|elapsed| elapsed >= self.thresholds.timeout) {
            self.transition(core, CircuitState::HalfOpen, "cool-down elapsed".to_string());
        }
    }

    fn retry_after(&self, core: &CircuitCore) -> Option<Duration> {
        if core.state != CircuitState::Open {
            return None;
        }
        let opened_at = core.opened_at?;
        let elapsed = self.clock.now().saturating_duration_since(opened_at);
        Some(self.thresholds.timeout.saturating_sub(elapsed))
    }

    fn record(&self, core: &mut CircuitCore, success: bool) {
        let now = self.clock.utc_now();

        if success {
            core.metrics.record_success(now);
            if core.state == CircuitState::HalfOpen
                && core.metrics.consecutive_successes >= self.thresholds.success_threshold
            {
                let reason = format!(
                    "{} consecutive successful trials",
                    core.metrics.consecutive_successes
                );
                self.transition(core, CircuitState::Closed, reason);
                core.metrics = CircuitMetrics::default();
            }
            return;
        }

        core.metrics.record_failure(now);
        match core.state {
            CircuitState::Closed => {
                let metrics = &core.metrics;
                if metrics.consecutive_failures >= self.thresholds.failure_threshold {
                    let reason = format!("{} consecutive failures", metrics.consecutive_failures);
                    self.transition(core, CircuitState::Open, reason);
                } else if metrics.total_requests >= self.thresholds.min_requests_for_rate
                    && metrics.failure_rate >= self.thresholds.failure_rate_threshold
                {
                    let reason = format!("failure rate {:.2}", metrics.failure_rate);
                    self.transition(core, CircuitState::Open, reason);
                }
            }
            CircuitState::HalfOpen => {
                self.transition(core, CircuitState::Open, "trial call failed".to_string());
            }
            CircuitState::Open | CircuitState::Isolated => {}
        }
    }

    fn transition(&self, core: &mut CircuitCore, to: CircuitState, reason: String) {
        let from = core.state;
        if from == to {
            return;
        }
        self.enter(core, to, reason.clone());
        warn!(
            circuit = %self.name,
            from = %from,
            to = %to,
            reason = %reason,
            consecutive_failures = core.metrics.consecutive_failures,
            failure_rate = core.metrics.failure_rate,
            "Circuit state changed"
        );
    }

    /// Outcome of a permit admitted before the last transition
    fn record_stale(&self, core: &mut CircuitCore, success: bool) {
        core.metrics.record_stale(success, self.clock.utc_now());
        debug!(
            circuit = %self.name,
            state = %core.state,
            success,
            "Outcome from an earlier state phase, totals only"
        );
    }

    fn enter(&self, core: &mut CircuitCore, to: CircuitState, reason: String) {
        let from = core.state;
        self.push_history(core, from, to, reason);

        if to == CircuitState::HalfOpen {
            core.metrics.consecutive_failures = 0;
            core.metrics.consecutive_successes = 0;
        }

        core.state = to;
        core.state_changed_at = self.clock.utc_now();
        core.phase = core.phase.wrapping_add(1);
        core.trials_in_flight = 0;
        core.opened_at = (to == CircuitState::Open).then(|| self.clock.now());
    }

    fn push_history(
        &self,
        core: &mut CircuitCore,
        from: CircuitState,
        to: CircuitState,
        reason: String,
    ) {
        if core.history.len() >= self.history_limit {
            core.history.pop_front();
        }
        core.history.push_back(StateTransition {
            from,
            to,
            at: self.clock.utc_now(),
            reason,
            consecutive_failures: core.metrics.consecutive_failures,
            consecutive_successes: core.metrics.consecutive_successes,
            failure_rate: core.metrics.failure_rate,
        });
    }

    fn release_trial(core: &mut CircuitCore, phase: u64, trial: bool) {
        if trial && phase == core.phase {
            core.trials_in_flight = core.trials_in_flight.saturating_sub(1);
        }
    }
}

//==============================================================================
// Permit
//==============================================================================

/// Admission to run one call through a [`CircuitBreaker`]
#[must_use = "complete the permit with the call's outcome"]
pub struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    /// Phase the permit was admitted in
    phase: u64,
    /// Holds a half-open trial slot
    trial: bool,
    completed: bool,
}

impl fmt::Debug for CallPermit<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallPermit")
            .field("circuit", &self.breaker.name)
            .field("phase", &self.phase)
            .field("trial", &self.trial)
            .finish()
    }
}

impl<'a> CallPermit<'a> {
    const fn new(breaker: &'a CircuitBreaker, phase: u64, trial: bool) -> Self {
        Self { breaker, phase, trial, completed: false }
    }

    /// Whether this permit holds a half-open trial slot
    pub const fn is_trial(&self) -> bool {
        self.trial
    }

    /// Record the outcome and release the trial slot
    ///
    /// If the circuit changed state since admission, only the totals move:
    /// the outcome neither extends a streak nor triggers a transition.
    pub fn complete(mut self, success: bool) {
        self.completed = true;
        let mut core = self.breaker.core.lock();
        if self.phase != core.phase {
            self.breaker.record_stale(&mut core, success);
            return;
        }
        CircuitBreaker::release_trial(&mut core, self.phase, self.trial);
        self.breaker.record(&mut core, success);
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if !self.completed && self.trial {
            let mut core = self.breaker.core.lock();
            CircuitBreaker::release_trial(&mut core, self.phase, self.trial);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use execguard_common::MockClock;

    use super::*;

    fn breaker(thresholds: CircuitThresholds) -> (CircuitBreaker, MockClock) {
        let clock = MockClock::new();
        let breaker =
            CircuitBreaker::with_clock("dex_router", thresholds, Arc::new(clock.clone())).unwrap();
        (breaker, clock)
    }

    fn thresholds() -> CircuitThresholds {
        CircuitThresholds::default()
            .with_failure_threshold(3)
            .with_success_threshold(2)
            .with_timeout(Duration::from_secs(30))
    }

    fn fail(breaker: &CircuitBreaker, times: usize) {
        for _ in 0..times {
            breaker.acquire().unwrap().complete(false);
        }
    }

    /// Validates consecutive failures trip a closed circuit.
    ///
    /// Assertions:
    /// - Two failures keep it closed, the third opens it.
    /// - Rejections carry the remaining cool-down.
    /// - Rejections do not touch the metrics.
    #[test]
    fn test_opens_after_failure_threshold() {
        let (breaker, clock) = breaker(thresholds());
        fail(&breaker, 2);
        assert_eq!(breaker.state(), CircuitState::Closed);
        fail(&breaker, 1);
        assert_eq!(breaker.state(), CircuitState::Open);

        clock.advance(Duration::from_secs(10));
        let rejection = breaker.acquire().unwrap_err();
        assert_eq!(rejection.retry_after(), Some(Duration::from_secs(20)));
        assert_eq!(breaker.status().metrics.total_requests, 3);
    }

    /// Validates the cool-down moves OPEN to HALF_OPEN on the next evaluation.
    #[test]
    fn test_half_open_after_timeout() {
        let (breaker, clock) = breaker(thresholds());
        fail(&breaker, 3);

        clock.advance(Duration::from_secs(29));
        assert_eq!(breaker.state(), CircuitState::Open);
        clock.advance(Duration::from_secs(1));
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
    }

    /// Validates trial outcomes from HALF_OPEN.
    ///
    /// Assertions:
    /// - `success_threshold` successes close the circuit and zero the metrics.
    /// - One failure reopens it.
    #[test]
    fn test_half_open_outcomes() {
        let (breaker, clock) = breaker(thresholds());
        fail(&breaker, 3);
        clock.advance(Duration::from_secs(30));

        breaker.acquire().unwrap().complete(false);
        assert_eq!(breaker.state(), CircuitState::Open);

        clock.advance(Duration::from_secs(30));
        breaker.acquire().unwrap().complete(true);
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        breaker.acquire().unwrap().complete(true);
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.status().metrics, CircuitMetrics::default());
    }

    /// Validates the half-open trial cap and slot release on drop.
    ///
    /// Assertions:
    /// - A second concurrent trial is rejected as open.
    /// - Dropping the permit without completing frees the slot.
    #[test]
    fn test_half_open_trial_cap() {
        let (breaker, clock) = breaker(thresholds());
        fail(&breaker, 3);
        clock.advance(Duration::from_secs(30));

        let trial = breaker.acquire().unwrap();
        assert!(trial.is_trial());
        assert!(matches!(breaker.acquire(), Err(GateRejection::Open { retry_after: None, .. })));
        assert!(!breaker.can_execute());

        drop(trial);
        assert_eq!(breaker.status().trials_in_flight, 0);
        assert!(breaker.can_execute());
    }

    /// Validates a permit admitted while CLOSED that succeeds after the trip.
    ///
    /// Assertions:
    /// - The late successes count in the totals only.
    /// - After the cool-down, one trial does not close a circuit that needs three.
    /// - Exactly three trials close it, with three recorded transitions.
    #[test]
    fn test_closed_permit_completed_while_open() {
        let (breaker, clock) = breaker(thresholds().with_success_threshold(3));
        let early = breaker.acquire().unwrap();
        let late = breaker.acquire().unwrap();
        fail(&breaker, 3);
        assert_eq!(breaker.state(), CircuitState::Open);

        early.complete(true);
        late.complete(true);
        let status = breaker.status();
        assert_eq!(status.state, CircuitState::Open);
        assert_eq!(status.metrics.total_successes, 2);
        assert_eq!(status.metrics.consecutive_successes, 0);

        clock.advance(Duration::from_secs(30));
        breaker.acquire().unwrap().complete(true);
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        breaker.acquire().unwrap().complete(true);
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        breaker.acquire().unwrap().complete(true);
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.state_history().len(), 3);
    }

    /// Validates a permit admitted while CLOSED that fails during HALF_OPEN.
    ///
    /// Assertions:
    /// - The circuit stays half-open and the trial slot stays free.
    /// - The failure is still counted in the totals.
    #[test]
    fn test_closed_permit_failing_while_half_open() {
        let (breaker, clock) = breaker(thresholds());
        let held = breaker.acquire().unwrap();
        fail(&breaker, 3);
        clock.advance(Duration::from_secs(30));
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        held.complete(false);
        let status = breaker.status();
        assert_eq!(status.state, CircuitState::HalfOpen);
        assert_eq!(status.trials_in_flight, 0);
        assert_eq!(status.metrics.total_failures, 4);
        assert_eq!(status.metrics.consecutive_failures, 0);
        assert_eq!(breaker.state_history().len(), 2);
        assert!(breaker.can_execute());
    }

    /// Validates a trial from an earlier HALF_OPEN phase finishing late.
    ///
    /// Assertions:
    /// - It neither frees the current phase's trial slot nor counts as a trial.
    /// - `success_threshold` fresh trials are still needed to close.
    #[test]
    fn test_trial_from_previous_half_open_phase() {
        let (breaker, clock) = breaker(thresholds().with_half_open_max_calls(2));
        fail(&breaker, 3);
        clock.advance(Duration::from_secs(30));

        let slow = breaker.acquire().unwrap();
        assert!(slow.is_trial());
        breaker.acquire().unwrap().complete(false);
        assert_eq!(breaker.state(), CircuitState::Open);

        clock.advance(Duration::from_secs(30));
        let current = breaker.acquire().unwrap();
        assert_eq!(breaker.status().trials_in_flight, 1);

        slow.complete(true);
        let status = breaker.status();
        assert_eq!(status.state, CircuitState::HalfOpen);
        assert_eq!(status.trials_in_flight, 1);
        assert_eq!(status.metrics.consecutive_successes, 0);

        current.complete(true);
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        breaker.acquire().unwrap().complete(true);
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.state_history().len(), 5);
    }

    /// Validates the failure-rate rule respects the minimum request volume.
    #[test]
    fn test_failure_rate_trip() {
        let thresholds = CircuitThresholds::default()
            .with_failure_threshold(100)
            .with_failure_rate_threshold(0.5)
            .with_min_requests_for_rate(4);
        let (breaker, _clock) = breaker(thresholds);

        breaker.acquire().unwrap().complete(false);
        breaker.acquire().unwrap().complete(true);
        breaker.acquire().unwrap().complete(false);
        assert_eq!(breaker.state(), CircuitState::Closed);

        breaker.acquire().unwrap().complete(true);
        assert_eq!(breaker.state(), CircuitState::Closed);
        breaker.acquire().unwrap().complete(false);
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(breaker.state_history().last().unwrap().reason.starts_with("failure rate"));
    }

    /// Validates overrides gate calls and survive a reset.
    ///
    /// Assertions:
    /// - ISOLATED rejects without invoking the action.
    /// - `reset` closes the computed state but keeps the override.
    /// - Clearing the override restores automatic gating.
    #[tokio::test]
    async fn test_manual_override_and_reset() {
        let (breaker, _clock) = breaker(thresholds());
        fail(&breaker, 3);
        breaker.set_manual_override(Some(CircuitState::Isolated));

        let mut invoked = false;
        let result = breaker
            .call(|| {
                invoked = true;
                async { Ok::<_, io::Error>(()) }
            })
            .await;
        assert!(matches!(result, Err(CircuitError::Isolated { .. })));
        assert!(!invoked);

        breaker.reset();
        let status = breaker.status();
        assert_eq!(status.state, CircuitState::Closed);
        assert_eq!(status.effective_state, CircuitState::Isolated);
        assert_eq!(status.manual_override, Some(CircuitState::Isolated));

        breaker.set_manual_override(None);
        assert!(breaker.can_execute());
        assert_eq!(breaker.state_history().len(), 4);
    }

    /// Validates `call` maps action errors and records outcomes.
    #[tokio::test]
    async fn test_call_records_outcomes() {
        let (breaker, _clock) = breaker(thresholds());

        let value = breaker.call(|| async { Ok::<_, io::Error>(7) }).await.unwrap();
        assert_eq!(value, 7);

        let err = breaker
            .call(|| async { Err::<(), _>(io::Error::other("rpc down")) })
            .await
            .unwrap_err();
        assert!(!err.is_rejection());
        assert_eq!(err.into_operation_error().unwrap().to_string(), "rpc down");

        let metrics = breaker.status().metrics;
        assert_eq!(metrics.total_successes, 1);
        assert_eq!(metrics.total_failures, 1);
    }

    /// Validates the history bound drops the oldest transitions.
    #[test]
    fn test_history_is_bounded() {
        let (breaker, _clock) = breaker(thresholds());
        let breaker = breaker.with_history_limit(2);
        for _ in 0..3 {
            breaker.set_manual_override(Some(CircuitState::Open));
        }
        assert_eq!(breaker.state_history().len(), 2);
    }
}
