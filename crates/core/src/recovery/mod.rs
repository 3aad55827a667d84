//! Failure classification and parameter-adjusting recovery
//!
//! A failed execution is classified into an [`ErrorKind`], then retried once
//! per [`RecoveryStrategy`] registered for that kind. Strategies are pure:
//! each maps the failed call's [`Params`] to adjusted ones.

mod classifier;
mod handler;
mod integration;
mod strategy;

pub use classifier::{
    classify_error, decode_revert_reason, ClassificationRule, ClassifyFailure, ErrorClassifier,
    ErrorKind,
};
pub use handler::{ErrorContext, RecoveryEngine, RecoveryStats, RevertHandler, RevertOutcome};
pub use integration::{CircuitBreakerIntegration, SafeExecution};
pub use strategy::{
    Params, RecoveryStrategy, StrategyRegistry, AMOUNT_FIELD, DEFAULT_PROVIDERS, GAS_LIMIT_FIELD,
    MAX_SLIPPAGE_TOLERANCE, PROVIDER_FIELD, SLIPPAGE_FIELD,
};
