//! Retry policies and backoff computation

use std::collections::BTreeSet;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::{ConfigError, ConfigResult};
use crate::recovery::ErrorKind;

/// Backoff shape between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// `initial × base^(n-1)`
    #[default]
    Exponential,
    /// `initial × n`
    Linear,
    /// `initial`
    Fixed,
    /// `initial × fib(n)` with `fib(1) = fib(2) = 1`
    Fibonacci,
}

/// Which failures a policy retries
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "RetryOnRepr", into = "RetryOnRepr")]
pub enum RetryOn {
    /// Every failure is retried
    #[default]
    Any,
    /// Only failures classified as one of these kinds
    Kinds(BTreeSet<ErrorKind>),
}

impl RetryOn {
    /// Retry only the listed kinds
    pub fn kinds<I: IntoIterator<Item = ErrorKind>>(kinds: I) -> Self {
        Self::Kinds(kinds.into_iter().collect())
    }

    /// Whether a failure of `kind` may be retried
    pub fn permits(&self, kind: ErrorKind) -> bool {
        match self {
            Self::Any => true,
            Self::Kinds(kinds) => kinds.contains(&kind),
        }
    }
}

/// Config representation: `"any"` or a list of kind names
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RetryOnRepr {
    Keyword(String),
    Kinds(BTreeSet<ErrorKind>),
}

impl TryFrom<RetryOnRepr> for RetryOn {
    type Error = String;

    fn try_from(repr: RetryOnRepr) -> Result<Self, Self::Error> {
        match repr {
            RetryOnRepr::Keyword(word) if word.eq_ignore_ascii_case("any") => Ok(Self::Any),
            RetryOnRepr::Keyword(word) => {
                Err(format!("expected \"any\" or a list of error kinds, got \"{word}\""))
            }
            RetryOnRepr::Kinds(kinds) => Ok(Self::Kinds(kinds)),
        }
    }
}

impl From<RetryOn> for RetryOnRepr {
    fn from(value: RetryOn) -> Self {
        match value {
            RetryOn::Any => Self::Keyword("any".to_string()),
            RetryOn::Kinds(kinds) => Self::Kinds(kinds),
        }
    }
}

/// Retry behaviour for one class of operations
///
/// Delays are kept as floating-point milliseconds so fractional bases and
/// jitter do not lose precision before the final conversion to a
/// [`Duration`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Base delay in milliseconds
    pub initial_delay_ms: f64,
    /// Cap applied before jitter, in milliseconds
    pub max_delay_ms: f64,
    /// Growth factor for exponential backoff
    pub exponential_base: f64,
    /// Add random extra delay after capping
    pub jitter_enabled: bool,
    /// Maximum extra delay as a fraction of the capped delay
    pub jitter_factor: f64,
    /// Deadline for each individual attempt, in seconds
    pub timeout_seconds: f64,
    /// Backoff shape
    pub strategy: BackoffStrategy,
    /// Failures eligible for another attempt
    pub retryable: RetryOn,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 100.0,
            max_delay_ms: 32_000.0,
            exponential_base: 2.0,
            jitter_enabled: true,
            jitter_factor: 0.1,
            timeout_seconds: 300.0,
            strategy: BackoffStrategy::Exponential,
            retryable: RetryOn::Any,
        }
    }
}

impl RetryPolicy {
    /// Set total attempts
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set base delay
    #[must_use]
    pub fn with_initial_delay_ms(mut self, initial_delay_ms: f64) -> Self {
        self.initial_delay_ms = initial_delay_ms;
        self
    }

    /// Set delay cap
    #[must_use]
    pub fn with_max_delay_ms(mut self, max_delay_ms: f64) -> Self {
        self.max_delay_ms = max_delay_ms;
        self
    }

    /// Set exponential growth factor
    #[must_use]
    pub fn with_exponential_base(mut self, base: f64) -> Self {
        self.exponential_base = base;
        self
    }

    /// Enable jitter with the given factor
    #[must_use]
    pub fn with_jitter(mut self, factor: f64) -> Self {
        self.jitter_enabled = true;
        self.jitter_factor = factor;
        self
    }

    /// Disable jitter
    #[must_use]
    pub fn without_jitter(mut self) -> Self {
        self.jitter_enabled = false;
        self
    }

    /// Set per-attempt deadline
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_seconds = timeout.as_secs_f64();
        self
    }

    /// Set backoff shape
    #[must_use]
    pub fn with_strategy(mut self, strategy: BackoffStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Set retryable failures
    #[must_use]
    pub fn with_retryable(mut self, retryable: RetryOn) -> Self {
        self.retryable = retryable;
        self
    }

    /// Check ranges
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_attempts == 0 {
            return Err(ConfigError::invalid("max_attempts", "must be at least 1"));
        }
        if !self.initial_delay_ms.is_finite() || self.initial_delay_ms < 0.0 {
            return Err(ConfigError::invalid("initial_delay_ms", "must be a non-negative number"));
        }
        if !self.max_delay_ms.is_finite() || self.max_delay_ms < self.initial_delay_ms {
            return Err(ConfigError::invalid(
                "max_delay_ms",
                "must be finite and not less than initial_delay_ms",
            ));
        }
        if !self.exponential_base.is_finite() || self.exponential_base < 1.0 {
            return Err(ConfigError::invalid("exponential_base", "must be at least 1.0"));
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(ConfigError::invalid("jitter_factor", "must be between 0.0 and 1.0"));
        }
        if !self.timeout_seconds.is_finite() || self.timeout_seconds <= 0.0 {
            return Err(ConfigError::invalid("timeout_seconds", "must be greater than 0"));
        }
        Ok(())
    }

    /// Per-attempt deadline
    pub fn attempt_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.timeout_seconds).unwrap_or(Duration::MAX)
    }

    /// Capped delay after attempt `n` (1-based), before jitter
    pub fn base_delay_ms(&self, attempt: u32) -> f64 {
        if self.initial_delay_ms <= 0.0 {
            return 0.0;
        }
        let n = attempt.max(1);
        let raw = match self.strategy {
            BackoffStrategy::Exponential => {
                let exponent = i32::try_from(n - 1).unwrap_or(i32::MAX);
                self.initial_delay_ms * self.exponential_base.powi(exponent)
            }
            BackoffStrategy::Linear => self.initial_delay_ms * f64::from(n),
            BackoffStrategy::Fixed => self.initial_delay_ms,
            BackoffStrategy::Fibonacci => self.initial_delay_ms * fibonacci(n),
        };
        raw.min(self.max_delay_ms)
    }

    /// Delay to wait after attempt `n` fails, jitter included
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let mut delay_ms = self.base_delay_ms(attempt);
        if self.jitter_enabled && self.jitter_factor > 0.0 {
            let spread: f64 = rand::thread_rng().gen_range(0.0..1.0);
            delay_ms += delay_ms * self.jitter_factor * spread;
        }
        millis_to_duration(delay_ms)
    }
}

/// `fib(1) = fib(2) = 1`, saturating to infinity for huge `n`
fn fibonacci(n: u32) -> f64 {
    let (mut prev, mut curr) = (0.0_f64, 1.0_f64);
    for _ in 1..n {
        let next = prev + curr;
        prev = curr;
        curr = next;
        if curr.is_infinite() {
            break;
        }
    }
    curr
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn millis_to_duration(ms: f64) -> Duration {
    if !ms.is_finite() || ms <= 0.0 {
        return Duration::ZERO;
    }
    Duration::from_micros((ms * 1_000.0).round() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter() -> RetryPolicy {
        RetryPolicy::default().without_jitter()
    }

    /// Validates the documented exponential sequence.
    ///
    /// Assertions:
    /// - Delays after attempts 1, 2, 3 are 100, 200, 400 ms.
    #[test]
    fn test_exponential_delays() {
        let policy = no_jitter();
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(400));
    }

    /// Validates linear, fixed, and fibonacci shapes.
    #[test]
    fn test_other_strategies() {
        let linear = no_jitter().with_strategy(BackoffStrategy::Linear);
        assert_eq!(linear.delay_for_attempt(3), Duration::from_millis(300));

        let fixed = no_jitter().with_strategy(BackoffStrategy::Fixed);
        assert_eq!(fixed.delay_for_attempt(1), fixed.delay_for_attempt(7));

        let fib = no_jitter().with_strategy(BackoffStrategy::Fibonacci);
        let delays: Vec<u128> = (1..=6).map(|n| fib.delay_for_attempt(n).as_millis()).collect();
        assert_eq!(delays, [100, 100, 200, 300, 500, 800]);
    }

    /// Validates the cap applies before jitter and jitter stays in bounds.
    ///
    /// Assertions:
    /// - Without jitter large attempts stop at `max_delay_ms`.
    /// - With 10% jitter the delay lies in `[cap, cap * 1.1)`.
    #[test]
    fn test_cap_then_additive_jitter() {
        let capped = no_jitter().with_max_delay_ms(1_000.0);
        assert_eq!(capped.delay_for_attempt(20), Duration::from_millis(1_000));

        let jittered = RetryPolicy::default().with_max_delay_ms(1_000.0).with_jitter(0.1);
        for _ in 0..200 {
            let delay = jittered.delay_for_attempt(20);
            assert!(delay >= Duration::from_millis(1_000));
            assert!(delay < Duration::from_millis(1_100));
        }
    }

    /// Validates huge attempt numbers do not overflow.
    #[test]
    fn test_huge_attempt_saturates_to_cap() {
        let policy = no_jitter().with_strategy(BackoffStrategy::Fibonacci);
        assert_eq!(policy.delay_for_attempt(5_000), Duration::from_millis(32_000));
        let exp = no_jitter();
        assert_eq!(exp.delay_for_attempt(u32::MAX), Duration::from_millis(32_000));
    }

    /// Validates range checks.
    #[test]
    fn test_validate_ranges() {
        assert!(RetryPolicy::default().validate().is_ok());
        assert!(RetryPolicy::default().with_max_attempts(0).validate().is_err());
        assert!(RetryPolicy::default().with_jitter(1.5).validate().is_err());
        assert!(RetryPolicy::default().with_exponential_base(0.5).validate().is_err());
        assert!(RetryPolicy::default().with_max_delay_ms(10.0).validate().is_err());
        assert!(RetryPolicy::default().with_timeout(Duration::ZERO).validate().is_err());
    }

    /// Validates the retryable set in both config forms.
    #[test]
    fn test_retry_on_serde_forms() {
        let any: RetryOn = serde_json::from_str("\"any\"").unwrap();
        assert_eq!(any, RetryOn::Any);

        let kinds: RetryOn = serde_json::from_str("[\"TIMEOUT\"]").unwrap();
        assert!(kinds.permits(ErrorKind::Timeout));
        assert!(!kinds.permits(ErrorKind::Unknown));

        assert!(serde_json::from_str::<RetryOn>("\"sometimes\"").is_err());
        assert_eq!(serde_json::to_string(&RetryOn::Any).unwrap(), "\"any\"");
    }
}
