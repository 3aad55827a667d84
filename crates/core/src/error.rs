//! Top-level error for circuit-protected, retried calls

use std::time::Duration;

use execguard_common::{ErrorClassification, ErrorSeverity};
use thiserror::Error;

use crate::circuit::GateRejection;
use crate::config::ConfigError;
use crate::recovery::ErrorKind;
use crate::retry::RetryError;

/// Errors returned by [`protected_call`](crate::ResilienceContext::protected_call)
///
/// Gate rejections mean nothing was attempted; [`Retry`](Self::Retry) means
/// the action ran at least once and failed. Callers that account for
/// consumed resources should branch on [`was_attempted`](Self::was_attempted).
#[derive(Debug, Error)]
pub enum ResilienceError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// The circuit is open (or every half-open trial slot is taken)
    #[error("Circuit '{circuit}' is open")]
    CircuitOpen { circuit: String, retry_after: Option<Duration> },

    /// The circuit was isolated by an operator
    #[error("Circuit '{circuit}' is isolated")]
    CircuitIsolated { circuit: String },

    /// The action failed non-retryably or exhausted its attempts
    #[error(transparent)]
    Retry(#[from] RetryError<E>),

    /// Invalid thresholds or policy
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl<E> ResilienceError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// Whether the circuit refused the call before any attempt
    pub const fn is_gate_rejection(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. } | Self::CircuitIsolated { .. })
    }

    /// Whether the action was invoked at least once
    pub const fn was_attempted(&self) -> bool {
        match self {
            Self::Retry(e) => e.was_attempted(),
            Self::CircuitOpen { .. } | Self::CircuitIsolated { .. } | Self::Config(_) => false,
        }
    }

    /// Classified kind of the final failure, if the action ran
    pub const fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Retry(e) => e.kind(),
            _ => None,
        }
    }

    /// The action's own final error
    pub fn action_error(&self) -> Option<&E> {
        match self {
            Self::Retry(e) => e.action_error(),
            _ => None,
        }
    }

    /// The action's final error, by value
    pub fn into_action_error(self) -> Option<E> {
        match self {
            Self::Retry(e) => e.into_action_error(),
            _ => None,
        }
    }
}

impl<E> From<GateRejection> for ResilienceError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(rejection: GateRejection) -> Self {
        match rejection {
            GateRejection::Open { circuit, retry_after } => {
                Self::CircuitOpen { circuit, retry_after }
            }
            GateRejection::Isolated { circuit } => Self::CircuitIsolated { circuit },
        }
    }
}

impl<E> ErrorClassification for ResilienceError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn is_retryable(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::CircuitOpen { .. } | Self::CircuitIsolated { .. } => ErrorSeverity::Warning,
            Self::Retry(e) => e.severity(),
            Self::Config(e) => e.severity(),
        }
    }

    fn is_critical(&self) -> bool {
        match self {
            Self::Config(e) => e.is_critical(),
            _ => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::CircuitOpen { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}
