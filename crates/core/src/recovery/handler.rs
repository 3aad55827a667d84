//! Strategy-driven recovery of failed executions
//!
//! [`RecoveryEngine`] owns the classifier, the strategy chains, and the
//! bookkeeping. [`RevertHandler`] is the entry point for a failed call: it
//! decodes and classifies the failure, then retries with each strategy of
//! the matching chain until one retry succeeds.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use super::classifier::{decode_revert_reason, ClassifyFailure, ErrorClassifier, ErrorKind};
use super::strategy::{Params, RecoveryStrategy, StrategyRegistry};
use crate::config::DEFAULT_HISTORY_LIMIT;

//==============================================================================
// Records
//==============================================================================

/// A classified failure, kept in the engine's error history
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorContext {
    pub kind: ErrorKind,
    /// Decoded, human-readable message
    pub message: String,
    /// Transaction hash or operation id, when known
    pub operation_id: Option<String>,
    /// Undecoded failure payload, when it differs from `message`
    pub raw_payload: Option<String>,
    /// Parameters of the failed call
    pub params: Params,
    pub recorded_at: DateTime<Utc>,
}

impl ErrorContext {
    /// Context for a failure of `kind`, recorded now
    pub fn new(kind: ErrorKind, message: impl Into<String>, params: Params) -> Self {
        Self {
            kind,
            message: message.into(),
            operation_id: None,
            raw_payload: None,
            params,
            recorded_at: Utc::now(),
        }
    }

    /// Tag the failure with the operation that produced it
    #[must_use]
    pub fn with_operation_id(mut self, operation_id: impl Into<String>) -> Self {
        self.operation_id = Some(operation_id.into());
        self
    }

    /// Keep the raw revert payload
    #[must_use]
    pub fn with_raw_payload(mut self, raw: impl Into<String>) -> Self {
        self.raw_payload = Some(raw.into());
        self
    }
}

/// Counters across every recovery the engine ran
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RecoveryStats {
    pub total_errors: u64,
    pub by_kind: BTreeMap<ErrorKind, u64>,
    /// Retries made with adjusted parameters
    pub recovery_attempts: u64,
    /// Errors that ended in a successful retry
    pub successful_recoveries: u64,
    /// `successful_recoveries / total_errors`, 0 when nothing was recorded
    pub success_rate: f64,
}

/// Result of walking a strategy chain
#[derive(Debug)]
pub enum RevertOutcome<T, E> {
    /// A retry succeeded
    Recovered {
        value: T,
        /// Name of the strategy that produced the winning parameters
        strategy: String,
        params: Params,
        /// Retries made, the successful one included
        attempts: u32,
    },
    /// No strategy led to a successful retry
    Exhausted {
        kind: ErrorKind,
        attempts: u32,
        /// Error of the last retry; `None` when the chain was empty
        last_error: Option<E>,
    },
}

impl<T, E> RevertOutcome<T, E> {
    /// Whether a strategy's retry succeeded
    pub const fn is_recovered(&self) -> bool {
        matches!(self, Self::Recovered { .. })
    }

    /// Strategy retries made
    pub const fn attempts(&self) -> u32 {
        match self {
            Self::Recovered { attempts, .. } | Self::Exhausted { attempts, .. } => *attempts,
        }
    }

    /// Recovered value, if any
    pub fn value(self) -> Option<T> {
        match self {
            Self::Recovered { value, .. } => Some(value),
            Self::Exhausted { .. } => None,
        }
    }
}

//==============================================================================
// Engine
//==============================================================================

#[derive(Debug, Default)]
struct Counters {
    total_errors: u64,
    by_kind: BTreeMap<ErrorKind, u64>,
    recovery_attempts: u64,
    successful_recoveries: u64,
}

/// Classifier, strategy chains, and recovery bookkeeping
pub struct RecoveryEngine {
    classifier: ErrorClassifier,
    strategies: RwLock<StrategyRegistry>,
    history: Mutex<VecDeque<ErrorContext>>,
    history_limit: usize,
    counters: Mutex<Counters>,
}

impl fmt::Debug for RecoveryEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecoveryEngine")
            .field("strategies", &*self.strategies.read())
            .field("history_limit", &self.history_limit)
            .finish_non_exhaustive()
    }
}

impl Default for RecoveryEngine {
    fn default() -> Self {
        Self::new(ErrorClassifier::default(), StrategyRegistry::default(), DEFAULT_HISTORY_LIMIT)
    }
}

impl RecoveryEngine {
    /// Engine with its own classifier and strategy chains
    pub fn new(
        classifier: ErrorClassifier,
        strategies: StrategyRegistry,
        history_limit: usize,
    ) -> Self {
        Self {
            classifier,
            strategies: RwLock::new(strategies),
            history: Mutex::new(VecDeque::new()),
            history_limit: history_limit.max(1),
            counters: Mutex::new(Counters::default()),
        }
    }

    /// Classifier used by [`classify`](Self::classify)
    pub const fn classifier(&self) -> &ErrorClassifier {
        &self.classifier
    }

    /// Kind of a failure message
    pub fn classify(&self, message: &str) -> ErrorKind {
        self.classifier.classify(message)
    }

    /// Append `strategy` to the chain for `kind`
    pub fn register_strategy(&self, kind: ErrorKind, strategy: RecoveryStrategy) {
        info!(kind = %kind, strategy = strategy.name(), "Recovery strategy registered");
        self.strategies.write().register(kind, strategy);
    }

    /// Copy of the chain for `kind`
    pub fn strategies_for(&self, kind: ErrorKind) -> Vec<RecoveryStrategy> {
        self.strategies.read().strategies_for(kind).to_vec()
    }

    /// Add a failure to the history and counters
    pub fn record(&self, context: ErrorContext) {
        {
            let mut counters = self.counters.lock();
            counters.total_errors += 1;
            *counters.by_kind.entry(context.kind).or_default() += 1;
        }

        warn!(
            kind = %context.kind,
            operation_id = context.operation_id.as_deref().unwrap_or(""),
            message = %context.message,
            "Execution failed"
        );

        let mut history = self.history.lock();
        if history.len() >= self.history_limit {
            history.pop_front();
        }
        history.push_back(context);
    }

    /// Recorded failures, oldest first
    pub fn error_history(&self) -> Vec<ErrorContext> {
        self.history.lock().iter().cloned().collect()
    }

    /// Counters across every recorded failure and recovery
    #[allow(clippy::cast_precision_loss)]
    pub fn stats(&self) -> RecoveryStats {
        let counters = self.counters.lock();
        let success_rate = if counters.total_errors == 0 {
            0.0
        } else {
            counters.successful_recoveries as f64 / counters.total_errors as f64
        };
        RecoveryStats {
            total_errors: counters.total_errors,
            by_kind: counters.by_kind.clone(),
            recovery_attempts: counters.recovery_attempts,
            successful_recoveries: counters.successful_recoveries,
            success_rate,
        }
    }

    /// Record `context` and retry once per strategy in its kind's chain
    ///
    /// Every strategy is applied to `context.params`, so strategies are
    /// alternatives rather than cumulative adjustments.
    pub async fn recover<F, Fut, T, E>(
        &self,
        context: ErrorContext,
        retry: F,
    ) -> RevertOutcome<T, E>
    where
        F: FnMut(Params) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        self.recover_until(context, retry, |_| false).await
    }

    /// [`recover`](Self::recover), stopping the chain early once `stop`
    /// returns true for a retry error
    pub(crate) async fn recover_until<F, Fut, T, E, S>(
        &self,
        context: ErrorContext,
        mut retry: F,
        stop: S,
    ) -> RevertOutcome<T, E>
    where
        F: FnMut(Params) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
        S: Fn(&E) -> bool,
    {
        let kind = context.kind;
        let original = context.params.clone();
        let chain = self.strategies_for(kind);
        self.record(context);

        if chain.is_empty() {
            warn!(kind = %kind, "No recovery strategy registered");
            return RevertOutcome::Exhausted { kind, attempts: 0, last_error: None };
        }

        let mut attempts = 0;
        let mut last_error = None;

        for strategy in &chain {
            let params = strategy.apply(&original);
            attempts += 1;
            self.counters.lock().recovery_attempts += 1;
            info!(
                kind = %kind,
                strategy = strategy.name(),
                attempt = attempts,
                "Retrying with recovery strategy"
            );

            match retry(params.clone()).await {
                Ok(value) => {
                    self.counters.lock().successful_recoveries += 1;
                    info!(kind = %kind, strategy = strategy.name(), "Recovered");
                    return RevertOutcome::Recovered {
                        value,
                        strategy: strategy.name().to_string(),
                        params,
                        attempts,
                    };
                }
                Err(error) => {
                    debug!(strategy = strategy.name(), error = %error, "Recovery retry failed");
                    let halt = stop(&error);
                    last_error = Some(error);
                    if halt {
                        break;
                    }
                }
            }
        }

        warn!(kind = %kind, attempts, "Recovery strategies exhausted");
        RevertOutcome::Exhausted { kind, attempts, last_error }
    }
}

//==============================================================================
// Revert handler
//==============================================================================

/// Entry point for recovering a failed execution
#[derive(Debug, Clone)]
pub struct RevertHandler {
    engine: Arc<RecoveryEngine>,
}

impl Default for RevertHandler {
    fn default() -> Self {
        Self::new(Arc::new(RecoveryEngine::default()))
    }
}

impl RevertHandler {
    /// Handler over a shared engine
    pub const fn new(engine: Arc<RecoveryEngine>) -> Self {
        Self { engine }
    }

    /// Engine this handler records into
    pub const fn engine(&self) -> &Arc<RecoveryEngine> {
        &self.engine
    }

    /// Recover from a revert reported as raw text or ABI-encoded data
    #[instrument(skip(self, raw_failure, params, retry))]
    pub async fn handle_revert<F, Fut, T, E>(
        &self,
        operation_id: &str,
        raw_failure: &str,
        params: &Params,
        retry: F,
    ) -> RevertOutcome<T, E>
    where
        F: FnMut(Params) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let message = decode_revert_reason(raw_failure);
        let kind = self.engine.classify(&message);

        let mut context = ErrorContext::new(kind, message, params.clone());
        if !operation_id.is_empty() {
            context = context.with_operation_id(operation_id);
        }
        if context.message != raw_failure {
            context = context.with_raw_payload(raw_failure);
        }

        self.engine.recover(context, retry).await
    }

    /// Recover from a typed error, preferring its structured kind
    pub async fn handle_error<F, Fut, T, E, R>(
        &self,
        operation_id: Option<&str>,
        error: &E,
        params: &Params,
        retry: F,
    ) -> RevertOutcome<T, R>
    where
        E: ClassifyFailure + ?Sized,
        F: FnMut(Params) -> Fut,
        Fut: Future<Output = Result<T, R>>,
        R: fmt::Display,
    {
        let context = self.context_for(operation_id, error, params);
        self.engine.recover(context, retry).await
    }

    pub(crate) fn context_for<E>(
        &self,
        operation_id: Option<&str>,
        error: &E,
        params: &Params,
    ) -> ErrorContext
    where
        E: ClassifyFailure + ?Sized,
    {
        let kind = self.engine.classifier().classify_failure(error);
        let context = ErrorContext::new(kind, error.to_string(), params.clone());
        match operation_id {
            Some(id) => context.with_operation_id(id),
            None => context,
        }
    }
}
