//! # ExecGuard Core
//!
//! Resilience layer for trade execution.
//!
//! This crate contains:
//! - Circuit breakers with a four-state machine and a named registry
//! - A retry engine with backoff, jitter, and a bounded dead-letter queue
//! - Failure classification and parameter-adjusting recovery strategies
//! - [`ResilienceContext`], the explicit owner of all of the above
//!
//! ## Architecture Principles
//! - Only depends on `execguard-common`
//! - No global state: every component is reached through a context value
//! - Collaborators (RPC clients, routers, bundlers) are opaque async actions

#![forbid(unsafe_code)]

pub mod circuit;
pub mod config;
pub mod context;
pub mod error;
pub mod recovery;
pub mod retry;

pub use circuit::{
    CircuitBreaker, CircuitBreakerRegistry, CircuitError, CircuitMetrics, CircuitState,
    CircuitStatus, CircuitThresholds, GateRejection, StateTransition,
};
pub use config::{ConfigError, ConfigResult, DeadLetterConfig, HistoryConfig, ResilienceConfig};
pub use context::{ResilienceContext, ShutdownReport};
pub use error::ResilienceError;
pub use recovery::{
    classify_error, decode_revert_reason, CircuitBreakerIntegration, ClassifyFailure,
    ErrorClassifier, ErrorContext, ErrorKind, Params, RecoveryEngine, RecoveryStrategy,
    RevertHandler, RevertOutcome, SafeExecution, StrategyRegistry,
};
pub use retry::{
    BackoffStrategy, DeadLetterError, DeadLetterQueue, DlqStatus, FailedOperation, RetryAttempt,
    RetryEngine, RetryError, RetryOn, RetryPolicy,
};
