//! Circuit states, thresholds, metrics, and status snapshots

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use execguard_common::duration_secs;
use serde::{Deserialize, Serialize};

use crate::config::{ConfigError, ConfigResult};

//==============================================================================
// States
//==============================================================================

/// Gate state of a circuit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Calls pass through; outcomes are recorded
    Closed,
    /// Calls are rejected until the cool-down elapses
    Open,
    /// A limited number of trial calls probe the dependency
    HalfOpen,
    /// Calls are rejected until an operator clears the override
    Isolated,
}

impl CircuitState {
    /// Wire name, as used in logs and serialized status
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "CLOSED",
            Self::Open => "OPEN",
            Self::HalfOpen => "HALF_OPEN",
            Self::Isolated => "ISOLATED",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who decides the effective state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StateControl {
    /// The computed state gates calls
    #[default]
    Automatic,
    /// An operator forced this state
    Overridden(CircuitState),
}

impl StateControl {
    /// State used for gating, given the computed one
    pub const fn effective(self, computed: CircuitState) -> CircuitState {
        match self {
            Self::Automatic => computed,
            Self::Overridden(forced) => forced,
        }
    }

    /// The operator's state, if one is set
    pub const fn forced(self) -> Option<CircuitState> {
        match self {
            Self::Automatic => None,
            Self::Overridden(forced) => Some(forced),
        }
    }
}

impl From<Option<CircuitState>> for StateControl {
    fn from(value: Option<CircuitState>) -> Self {
        value.map_or(Self::Automatic, Self::Overridden)
    }
}

//==============================================================================
// Thresholds
//==============================================================================

/// Trip and recovery thresholds for one circuit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitThresholds {
    /// Consecutive failures that open a closed circuit
    pub failure_threshold: u32,
    /// Consecutive trial successes that close a half-open circuit
    pub success_threshold: u32,
    /// Failure rate (0..=1) that opens a closed circuit
    pub failure_rate_threshold: f64,
    /// Cool-down before an open circuit admits trial calls
    #[serde(rename = "timeout_seconds", with = "duration_secs")]
    pub timeout: Duration,
    /// Trial calls allowed in flight while half-open
    pub half_open_max_calls: u32,
    /// Requests recorded before the failure rate can trip the circuit
    pub min_requests_for_rate: u64,
}

impl Default for CircuitThresholds {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 3,
            failure_rate_threshold: 0.5,
            timeout: Duration::from_secs(60),
            half_open_max_calls: 1,
            min_requests_for_rate: 10,
        }
    }
}

impl CircuitThresholds {
    /// Set the consecutive failures that trip the circuit
    #[must_use]
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Set the trial successes that close the circuit
    #[must_use]
    pub fn with_success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold;
        self
    }

    /// Set the failure rate that trips the circuit
    #[must_use]
    pub fn with_failure_rate_threshold(mut self, rate: f64) -> Self {
        self.failure_rate_threshold = rate;
        self
    }

    /// Set the open cool-down
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the concurrent trial cap
    #[must_use]
    pub fn with_half_open_max_calls(mut self, max_calls: u32) -> Self {
        self.half_open_max_calls = max_calls;
        self
    }

    /// Set the volume needed before the rate rule applies
    #[must_use]
    pub fn with_min_requests_for_rate(mut self, min_requests: u64) -> Self {
        self.min_requests_for_rate = min_requests;
        self
    }

    /// Validate the thresholds
    pub fn validate(&self) -> ConfigResult<()> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::invalid("failure_threshold", "must be greater than 0"));
        }
        if self.success_threshold == 0 {
            return Err(ConfigError::invalid("success_threshold", "must be greater than 0"));
        }
        if !(self.failure_rate_threshold > 0.0 && self.failure_rate_threshold <= 1.0) {
            return Err(ConfigError::invalid(
                "failure_rate_threshold",
                "must be in the range (0.0, 1.0]",
            ));
        }
        if self.half_open_max_calls == 0 {
            return Err(ConfigError::invalid("half_open_max_calls", "must be greater than 0"));
        }
        Ok(())
    }
}

//==============================================================================
// Metrics
//==============================================================================

/// Outcome counters for one circuit
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CircuitMetrics {
    /// Outcomes recorded since the last reset or close
    pub total_requests: u64,
    pub total_failures: u64,
    pub total_successes: u64,
    /// Current failure streak in this state phase
    pub consecutive_failures: u32,
    /// Current success streak in this state phase
    pub consecutive_successes: u32,
    /// `total_failures / total_requests`, 0 when nothing was recorded
    pub failure_rate: f64,
    /// When the most recent failure was recorded
    pub last_failure_time: Option<DateTime<Utc>>,
    /// When the most recent success was recorded
    pub last_success_time: Option<DateTime<Utc>>,
}

impl CircuitMetrics {
    pub(crate) fn record_success(&mut self, at: DateTime<Utc>) {
        self.total_requests += 1;
        self.total_successes += 1;
        self.consecutive_successes = self.consecutive_successes.saturating_add(1);
        self.consecutive_failures = 0;
        self.last_success_time = Some(at);
        self.refresh_rate();
    }

    pub(crate) fn record_failure(&mut self, at: DateTime<Utc>) {
        self.total_requests += 1;
        self.total_failures += 1;
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.consecutive_successes = 0;
        self.last_failure_time = Some(at);
        self.refresh_rate();
    }

    /// Count an outcome without touching either streak
    pub(crate) fn record_stale(&mut self, success: bool, at: DateTime<Utc>) {
        self.total_requests += 1;
        if success {
            self.total_successes += 1;
            self.last_success_time = Some(at);
        } else {
            self.total_failures += 1;
            self.last_failure_time = Some(at);
        }
        self.refresh_rate();
    }

    #[allow(clippy::cast_precision_loss)]
    fn refresh_rate(&mut self) {
        self.failure_rate = if self.total_requests == 0 {
            0.0
        } else {
            self.total_failures as f64 / self.total_requests as f64
        };
    }
}

//==============================================================================
// History and status
//==============================================================================

/// One entry in a circuit's state history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: CircuitState,
    pub to: CircuitState,
    pub at: DateTime<Utc>,
    pub reason: String,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub failure_rate: f64,
}

/// Point-in-time view of a circuit
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CircuitStatus {
    pub name: String,
    /// Computed state
    pub state: CircuitState,
    /// State used for gating
    pub effective_state: CircuitState,
    pub manual_override: Option<CircuitState>,
    pub metrics: CircuitMetrics,
    pub thresholds: CircuitThresholds,
    pub state_changed_at: DateTime<Utc>,
    /// Half-open trial calls currently running
    pub trials_in_flight: u32,
}
