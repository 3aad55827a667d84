//! Configuration model for a [`ResilienceContext`](crate::ResilienceContext)
//!
//! Every section has serde defaults, so a config file only needs the values
//! it changes:
//!
//! ```toml
//! [circuit_defaults]
//! failure_threshold = 3
//! timeout_seconds = 30
//!
//! [circuits.dex_router]
//! failure_rate_threshold = 0.25
//!
//! [retry_policies.submit_bundle]
//! max_attempts = 2
//! strategy = "fixed"
//!
//! [dead_letter]
//! capacity = 500
//! ```

use std::collections::BTreeMap;

use execguard_common::{
    impl_error_classification, impl_error_conversion, CommonError, ErrorClassification,
    ErrorSeverity,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::circuit::CircuitThresholds;
use crate::retry::RetryPolicy;

/// Default DLQ capacity before the oldest entries are evicted
pub const DEFAULT_DLQ_CAPACITY: usize = 10_000;
/// Default number of entries shown by a DLQ status preview
pub const DEFAULT_DLQ_PREVIEW_LIMIT: usize = 100;
/// Default bound for histories (state transitions, operations, errors)
pub const DEFAULT_HISTORY_LIMIT: usize = 1_000;

/// Invalid thresholds, policies, or limits
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A value is out of range
    #[error("Invalid configuration for '{field}': {message}")]
    Invalid { field: String, message: String },

    #[error(transparent)]
    Common(#[from] CommonError),
}

impl ConfigError {
    /// Out-of-range value for `field`
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalid { field: field.into(), message: message.into() }
    }
}

impl_error_conversion!(ConfigError, Common);

impl_error_classification!(ConfigError, Common,
    Self::Invalid { .. } => {
        retryable: false,
        severity: ErrorSeverity::Error,
        critical: false,
    }
);

/// Configuration result type
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Dead-letter queue sizing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeadLetterConfig {
    /// Entries kept before the oldest is evicted
    pub capacity: usize,
    /// Entries included in a status preview
    pub preview_limit: usize,
}

impl Default for DeadLetterConfig {
    fn default() -> Self {
        Self { capacity: DEFAULT_DLQ_CAPACITY, preview_limit: DEFAULT_DLQ_PREVIEW_LIMIT }
    }
}

/// Bounds for in-memory histories
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Transitions kept per circuit
    pub state_history_limit: usize,
    /// Completed operations whose attempts stay queryable
    pub operation_history_limit: usize,
    /// Classified errors kept by the recovery engine
    pub error_history_limit: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            state_history_limit: DEFAULT_HISTORY_LIMIT,
            operation_history_limit: DEFAULT_HISTORY_LIMIT,
            error_history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

/// Complete configuration for circuits, retries, and the DLQ
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    /// Thresholds for circuits without a dedicated entry
    pub circuit_defaults: CircuitThresholds,
    /// Per-circuit thresholds
    pub circuits: BTreeMap<String, CircuitThresholds>,
    /// Policy for operations without a registered one
    pub retry_default: RetryPolicy,
    /// Per-operation policies, registered at startup
    pub retry_policies: BTreeMap<String, RetryPolicy>,
    /// DLQ sizing
    pub dead_letter: DeadLetterConfig,
    /// History bounds
    pub history: HistoryConfig,
}

impl ResilienceConfig {
    /// Validate every section
    pub fn validate(&self) -> ConfigResult<()> {
        self.circuit_defaults.validate()?;
        for (name, thresholds) in &self.circuits {
            thresholds.validate().map_err(|e| scoped("circuits", name, e))?;
        }

        self.retry_default.validate()?;
        for (name, policy) in &self.retry_policies {
            policy.validate().map_err(|e| scoped("retry_policies", name, e))?;
        }

        if self.dead_letter.capacity == 0 {
            return Err(ConfigError::invalid("dead_letter.capacity", "must be greater than 0"));
        }
        if self.history.state_history_limit == 0
            || self.history.operation_history_limit == 0
            || self.history.error_history_limit == 0
        {
            return Err(ConfigError::invalid("history", "limits must be greater than 0"));
        }

        Ok(())
    }
}

fn scoped(section: &str, name: &str, err: ConfigError) -> ConfigError {
    match err {
        ConfigError::Invalid { field, message } => {
            ConfigError::Invalid { field: format!("{section}.{name}.{field}"), message }
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::recovery::ErrorKind;
    use crate::retry::{BackoffStrategy, RetryOn};

    /// Validates defaults pass validation and match documented values.
    #[test]
    fn test_default_config_is_valid() {
        let config = ResilienceConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.dead_letter.capacity, 10_000);
        assert_eq!(config.dead_letter.preview_limit, 100);
        assert_eq!(config.history.state_history_limit, 1_000);
    }

    /// Validates a sparse TOML document fills in defaults.
    ///
    /// Assertions:
    /// - Overridden values are applied.
    /// - Omitted values keep their defaults.
    /// - Retryable kinds parse from their wire names.
    #[test]
    fn test_sparse_toml_uses_defaults() {
        let raw = r#"
            [circuit_defaults]
            failure_threshold = 3
            timeout_seconds = 30

            [circuits.dex_router]
            failure_rate_threshold = 0.25

            [retry_policies.submit_bundle]
            max_attempts = 2
            strategy = "fixed"
            retryable = ["TIMEOUT", "NETWORK"]

            [dead_letter]
            capacity = 500
        "#;

        let config: ResilienceConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.circuit_defaults.failure_threshold, 3);
        assert_eq!(config.circuit_defaults.timeout, Duration::from_secs(30));
        assert_eq!(config.circuit_defaults.success_threshold, 3);
        assert!((config.circuits["dex_router"].failure_rate_threshold - 0.25).abs() < f64::EPSILON);

        let policy = &config.retry_policies["submit_bundle"];
        assert_eq!(policy.max_attempts, 2);
        assert_eq!(policy.strategy, BackoffStrategy::Fixed);
        assert!(policy.retryable.permits(ErrorKind::Network));
        assert!(!policy.retryable.permits(ErrorKind::GasLimitExceeded));
        assert_eq!(config.dead_letter.capacity, 500);
        assert_eq!(config.dead_letter.preview_limit, 100);
        assert!(config.validate().is_ok());
    }

    /// Validates errors in named sections are reported with their path.
    #[test]
    fn test_validate_scopes_field_path() {
        let mut config = ResilienceConfig::default();
        config.circuits.insert(
            "dex_router".to_string(),
            CircuitThresholds::default().with_failure_threshold(0),
        );

        match config.validate() {
            Err(ConfigError::Invalid { field, .. }) => {
                assert_eq!(field, "circuits.dex_router.failure_threshold");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    /// Validates zero DLQ capacity is rejected and not retryable.
    #[test]
    fn test_zero_capacity_rejected() {
        let mut config = ResilienceConfig::default();
        config.dead_letter.capacity = 0;
        let err = config.validate().unwrap_err();
        assert!(!err.is_retryable());
        assert_eq!(err.severity(), ErrorSeverity::Error);
    }

    /// Validates an invalid retry policy is caught.
    #[test]
    fn test_invalid_retry_policy_rejected() {
        let config = ResilienceConfig {
            retry_default: RetryPolicy::default().with_max_attempts(0),
            ..ResilienceConfig::default()
        };
        assert!(config.validate().is_err());

        let config = ResilienceConfig {
            retry_default: RetryPolicy::default()
                .with_retryable(RetryOn::Kinds(Default::default())),
            ..ResilienceConfig::default()
        };
        assert!(config.validate().is_ok());
    }
}
