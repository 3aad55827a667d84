//! Explicit resilience context
//!
//! One [`ResilienceContext`] is built at startup from a
//! [`ResilienceConfig`] and handed to whatever needs circuit protection,
//! retries, or recovery. It owns the circuit registry, the retry engine with
//! its dead-letter queue, and the recovery engine.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use execguard_core::{ResilienceConfig, ResilienceContext};
//!
//! # async fn submit(amount: u64) -> Result<String, std::io::Error> { Ok(String::new()) }
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let context = Arc::new(ResilienceContext::new(ResilienceConfig::default())?);
//! let tx_hash = context.protected_call("dex_router", None, submit, 1_000_u64).await?;
//! # let _ = tx_hash;
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use execguard_common::{Clock, CommonResult, SystemClock};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{info, instrument};

use crate::circuit::{CircuitBreakerRegistry, CircuitState, CircuitStatus};
use crate::config::{ConfigResult, ResilienceConfig};
use crate::error::ResilienceError;
use crate::recovery::{
    CircuitBreakerIntegration, ClassifyFailure, ErrorClassifier, RecoveryEngine, RecoveryStats,
    RevertHandler, StrategyRegistry,
};
use crate::retry::{
    DeadLetterError, DlqProcessReport, DlqStatus, FailedOperation, RetryEngine, RetryPolicy,
};

/// What [`ResilienceContext::shutdown`] left behind
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShutdownReport {
    /// Circuits dropped from the registry
    pub circuits: usize,
    /// Dead letters still queued; they are not drained
    pub pending_dead_letters: usize,
    pub recovery: RecoveryStats,
}

/// Circuits, retries, and recovery for one process
pub struct ResilienceContext {
    config: ResilienceConfig,
    circuits: CircuitBreakerRegistry,
    retry: RetryEngine,
    recovery: Arc<RecoveryEngine>,
}

impl fmt::Debug for ResilienceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResilienceContext")
            .field("circuits", &self.circuits)
            .field("retry", &self.retry)
            .field("recovery", &self.recovery)
            .finish()
    }
}

impl ResilienceContext {
    /// Context on the system clock
    pub fn new(config: ResilienceConfig) -> ConfigResult<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Context whose circuits measure time with `clock`
    pub fn with_clock(config: ResilienceConfig, clock: Arc<dyn Clock>) -> ConfigResult<Self> {
        config.validate()?;

        let circuits = CircuitBreakerRegistry::new(
            config.circuit_defaults.clone(),
            config.circuits.iter().map(|(name, t)| (name.clone(), t.clone())),
        )?
        .with_clock(clock)
        .with_history_limit(config.history.state_history_limit);

        let retry = RetryEngine::new(
            config.retry_default.clone(),
            &config.dead_letter,
            config.history.operation_history_limit,
        );
        for (operation, policy) in &config.retry_policies {
            retry.register_policy(operation.clone(), policy.clone())?;
        }

        let recovery = Arc::new(RecoveryEngine::new(
            ErrorClassifier::default(),
            StrategyRegistry::default(),
            config.history.error_history_limit,
        ));

        info!(
            circuits = config.circuits.len(),
            retry_policies = config.retry_policies.len(),
            dlq_capacity = config.dead_letter.capacity,
            "Resilience context initialized"
        );

        Ok(Self { config, circuits, retry, recovery })
    }

    /// Validated configuration this context was built from
    pub const fn config(&self) -> &ResilienceConfig {
        &self.config
    }

    /// Registry of every named circuit
    pub const fn circuits(&self) -> &CircuitBreakerRegistry {
        &self.circuits
    }

    /// Retry engine and its dead-letter queue
    pub const fn retry_engine(&self) -> &RetryEngine {
        &self.retry
    }

    /// Shared classification and recovery engine
    pub const fn recovery(&self) -> &Arc<RecoveryEngine> {
        &self.recovery
    }

    /// Revert handler sharing this context's recovery engine
    pub fn revert_handler(&self) -> RevertHandler {
        RevertHandler::new(Arc::clone(&self.recovery))
    }

    /// Recovery bound to the circuit named `circuit_name`
    pub fn integration(&self, circuit_name: &str) -> ConfigResult<CircuitBreakerIntegration> {
        let circuit = self.circuits.get_or_create(circuit_name)?;
        Ok(CircuitBreakerIntegration::new(circuit, self.revert_handler()))
    }

    //==========================================================================
    // Protected execution
    //==========================================================================

    /// Run `action` behind the circuit `circuit_name` with retries
    ///
    /// The gate is checked once; the whole retry loop then counts as a single
    /// outcome for the circuit. `policy` falls back to the one registered
    /// under `circuit_name`, then to the default.
    #[instrument(skip(self, policy, action, args))]
    pub async fn protected_call<A, F, Fut, T, E>(
        &self,
        circuit_name: &str,
        policy: Option<RetryPolicy>,
        action: F,
        args: A,
    ) -> Result<T, ResilienceError<E>>
    where
        A: Serialize + Clone,
        F: FnMut(A) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: ClassifyFailure + Send + Sync + 'static,
    {
        let circuit = self.circuits.get_or_create(circuit_name)?;
        let permit = circuit.acquire()?;

        match self.retry.execute_with_retry(circuit_name, action, args, policy).await {
            Ok(value) => {
                permit.complete(true);
                Ok(value)
            }
            Err(err) if !err.was_attempted() => Err(err.into()),
            Err(err) => {
                permit.complete(false);
                Err(err.into())
            }
        }
    }

    //==========================================================================
    // Circuit administration
    //==========================================================================

    /// Status of one circuit
    pub fn get_circuit_status(&self, name: &str) -> CommonResult<CircuitStatus> {
        self.circuits.status(name)
    }

    /// Status of every circuit, by name
    pub fn get_all_circuit_status(&self) -> BTreeMap<String, CircuitStatus> {
        self.circuits.all_status()
    }

    /// Close one circuit and zero its metrics
    pub fn reset_circuit(&self, name: &str) -> CommonResult<()> {
        self.circuits.reset(name)
    }

    /// Force or release the effective state of one circuit
    pub fn set_manual_override(&self, name: &str, state: Option<CircuitState>) -> CommonResult<()> {
        self.circuits.set_manual_override(name, state)
    }

    /// Reset every circuit, returning how many were reset
    pub fn reset_all_circuits(&self) -> usize {
        self.circuits.reset_all()
    }

    //==========================================================================
    // Retry and dead letters
    //==========================================================================

    /// Use `policy` for calls through `operation_name`
    pub fn register_retry_policy(
        &self,
        operation_name: impl Into<String>,
        policy: RetryPolicy,
    ) -> ConfigResult<()> {
        self.retry.register_policy(operation_name, policy)
    }

    /// Size and preview of the dead-letter queue
    pub fn get_dlq_status(&self) -> DlqStatus {
        self.retry.get_dlq_status()
    }

    /// Hand up to `limit` dead letters to `processor`, oldest first
    pub async fn process_dead_letter_queue<F, Fut, E>(
        &self,
        processor: F,
        limit: usize,
    ) -> DlqProcessReport
    where
        F: FnMut(FailedOperation) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: fmt::Display,
    {
        self.retry.process_dead_letter_queue(processor, limit).await
    }

    /// Redeliver one dead-lettered operation by id
    pub async fn retry_dead_letter_item<A, F, Fut, T, E>(
        &self,
        operation_id: &str,
        action: F,
        policy: Option<RetryPolicy>,
    ) -> Result<T, DeadLetterError<E>>
    where
        A: Serialize + DeserializeOwned + Clone,
        F: FnMut(A) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: ClassifyFailure + Send + Sync + 'static,
    {
        self.retry.retry_dead_letter_item(operation_id, action, policy).await
    }

    /// Drop every dead letter, returning how many were dropped
    pub fn clear_dlq(&self) -> usize {
        self.retry.clear_dlq()
    }

    //==========================================================================
    // Lifecycle
    //==========================================================================

    /// Drop every circuit and report what is left
    pub fn shutdown(&self) -> ShutdownReport {
        let report = ShutdownReport {
            circuits: self.circuits.shutdown(),
            pending_dead_letters: self.retry.dead_letters().len(),
            recovery: self.recovery.stats(),
        };
        info!(
            circuits = report.circuits,
            pending_dead_letters = report.pending_dead_letters,
            "Resilience context shut down"
        );
        report
    }
}
