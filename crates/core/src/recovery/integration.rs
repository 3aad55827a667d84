//! Circuit-guarded execution with strategy recovery
//!
//! Every invocation that reaches the dependency goes through the bound
//! circuit and counts toward its metrics: the initial execution and each
//! recovery retry. A call that recovers after two failed retries therefore
//! still reports two failures, which lets a degrading dependency trip the
//! circuit even when most trades eventually land.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use tracing::{info, instrument, warn};

use super::classifier::{ClassifyFailure, ErrorKind};
use super::handler::{RevertHandler, RevertOutcome};
use super::strategy::Params;
use crate::circuit::{CircuitBreaker, CircuitError, CircuitState};

/// Outcome of [`CircuitBreakerIntegration::execute_with_safety`]
#[derive(Debug)]
pub enum SafeExecution<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// The first execution succeeded
    Executed(T),
    /// A recovery retry succeeded
    Recovered { value: T, strategy: String, params: Params },
    /// Execution and every recovery retry failed
    ///
    /// `error` is the last failure. It is a gate rejection when the circuit
    /// opened part-way through recovery. `attempts` counts the execution
    /// plus every recovery retry started, a rejected one included.
    Failed { kind: ErrorKind, error: CircuitError<E>, attempts: u32 },
    /// The circuit refused the initial execution; nothing was attempted
    Rejected { circuit: String, state: CircuitState },
}

impl<T, E> SafeExecution<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// Whether a value was produced
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Executed(_) | Self::Recovered { .. })
    }

    /// Whether the dependency was invoked at all
    pub const fn was_attempted(&self) -> bool {
        !matches!(self, Self::Rejected { .. })
    }

    /// Result value, if the call succeeded directly or after recovery
    pub fn value(self) -> Option<T> {
        match self {
            Self::Executed(value) | Self::Recovered { value, .. } => Some(value),
            Self::Failed { .. } | Self::Rejected { .. } => None,
        }
    }
}

/// Binds a [`RevertHandler`] to the circuit guarding its dependency
#[derive(Clone)]
pub struct CircuitBreakerIntegration {
    circuit: Arc<CircuitBreaker>,
    handler: RevertHandler,
}

impl fmt::Debug for CircuitBreakerIntegration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreakerIntegration")
            .field("circuit", &self.circuit.name())
            .finish_non_exhaustive()
    }
}

impl CircuitBreakerIntegration {
    /// Guard `handler`'s retries with `circuit`
    pub const fn new(circuit: Arc<CircuitBreaker>, handler: RevertHandler) -> Self {
        Self { circuit, handler }
    }

    /// Circuit in front of the dependency
    pub const fn circuit(&self) -> &Arc<CircuitBreaker> {
        &self.circuit
    }

    /// Handler running the strategy chain
    pub const fn handler(&self) -> &RevertHandler {
        &self.handler
    }

    /// Execute behind the circuit, recovering through the strategy chain of
    /// the failure's kind
    #[instrument(skip_all, fields(circuit = %self.circuit.name()))]
    pub async fn execute_with_safety<X, XFut, R, RFut, T, E>(
        &self,
        execute: X,
        params: Params,
        mut retry: R,
    ) -> SafeExecution<T, E>
    where
        X: FnOnce(Params) -> XFut,
        XFut: Future<Output = Result<T, E>>,
        R: FnMut(Params) -> RFut,
        RFut: Future<Output = Result<T, E>>,
        E: ClassifyFailure + Send + Sync + 'static,
    {
        let initial = self.circuit.call(|| execute(params.clone())).await;
        let error = match initial {
            Ok(value) => return SafeExecution::Executed(value),
            Err(CircuitError::Operation(error)) => error,
            Err(rejection) => {
                let state = self.circuit.effective_state();
                info!(state = %state, error = %rejection, "Execution rejected by circuit");
                return SafeExecution::Rejected { circuit: self.circuit.name().to_string(), state };
            }
        };

        let context = self.handler.context_for(None, &error, &params);
        let kind = context.kind;
        let circuit = &self.circuit;

        // The retry closure only runs once the gate admits the call
        let guarded = move |adjusted: Params| {
            let admitted = circuit.acquire().map(|permit| (permit, retry(adjusted)));
            async move {
                let (permit, attempt) = match admitted {
                    Ok(admitted) => admitted,
                    Err(rejection) => return Err(CircuitError::from(rejection)),
                };
                match attempt.await {
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
        };

        let outcome = self
            .handler
            .engine()
            .recover_until(context, guarded, CircuitError::is_rejection)
            .await;

        match outcome {
            RevertOutcome::Recovered { value, strategy, params, .. } => {
                SafeExecution::Recovered { value, strategy, params }
            }
            RevertOutcome::Exhausted { attempts, last_error, .. } => {
                warn!(kind = %kind, attempts, "Execution failed after recovery");
                let error = last_error.unwrap_or(CircuitError::Operation(error));
                SafeExecution::Failed { kind, error, attempts: attempts + 1 }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::circuit::CircuitThresholds;
    use crate::recovery::strategy::AMOUNT_FIELD;

    fn integration(failure_threshold: u32) -> CircuitBreakerIntegration {
        let circuit = CircuitBreaker::new(
            "executor",
            CircuitThresholds::default().with_failure_threshold(failure_threshold),
        )
        .unwrap();
        CircuitBreakerIntegration::new(Arc::new(circuit), RevertHandler::default())
    }

    fn trade() -> Params {
        Params::new().with(AMOUNT_FIELD, 1000)
    }

    /// Validates a successful first execution skips recovery.
    #[tokio::test]
    async fn test_executed_directly() {
        let integration = integration(5);
        let retries = AtomicU32::new(0);

        let result = integration
            .execute_with_safety(
                |p: Params| async move { Ok::<_, io::Error>(p.get_i64(AMOUNT_FIELD)) },
                trade(),
                |_p: Params| {
                    retries.fetch_add(1, Ordering::SeqCst);
                    async { Ok(None) }
                },
            )
            .await;

        assert!(matches!(result, SafeExecution::Executed(Some(1000))));
        assert_eq!(retries.load(Ordering::SeqCst), 0);
    }

    /// Validates recovery through a reduced position and circuit accounting.
    ///
    /// Assertions:
    /// - The retry sees the halved amount and succeeds.
    /// - The circuit recorded one failure and one success.
    #[tokio::test]
    async fn test_recovered_counts_every_invocation() {
        let integration = integration(5);

        let result = integration
            .execute_with_safety(
                |_p: Params| async {
                    Err::<i64, _>(io::Error::other("INSUFFICIENT_OUTPUT_AMOUNT"))
                },
                trade(),
                |p: Params| async move { Ok(p.get_i64(AMOUNT_FIELD).unwrap_or_default()) },
            )
            .await;

        match result {
            SafeExecution::Recovered { value, strategy, .. } => {
                assert_eq!(value, 500);
                assert_eq!(strategy, "reduce_position");
            }
            other => panic!("unexpected result: {other:?}"),
        }

        let metrics = integration.circuit().status().metrics;
        assert_eq!(metrics.total_failures, 1);
        assert_eq!(metrics.total_successes, 1);
    }

    /// Validates a circuit tripped mid-recovery stops the chain.
    ///
    /// Assertions:
    /// - The initial failure and first retry trip a threshold of 2.
    /// - The second strategy is never invoked.
    /// - The result reports a failure with a gate rejection as last error.
    #[tokio::test]
    async fn test_trip_during_recovery_stops_chain() {
        let integration = integration(2);
        let retries = AtomicU32::new(0);

        let result = integration
            .execute_with_safety(
                |_p: Params| async { Err::<(), _>(io::Error::other("insufficient liquidity")) },
                trade(),
                |_p: Params| {
                    retries.fetch_add(1, Ordering::SeqCst);
                    async { Err(io::Error::other("insufficient liquidity")) }
                },
            )
            .await;

        assert_eq!(retries.load(Ordering::SeqCst), 1);
        match result {
            SafeExecution::Failed { kind, error, attempts } => {
                assert_eq!(kind, ErrorKind::InsufficientLiquidity);
                assert!(error.is_rejection());
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(integration.circuit().state(), CircuitState::Open);
    }

    /// Validates an open circuit rejects without invoking anything.
    #[tokio::test]
    async fn test_rejected_when_open() {
        let integration = integration(1);
        integration.circuit().set_manual_override(Some(CircuitState::Open));
        let calls = AtomicU32::new(0);

        let result = integration
            .execute_with_safety(
                |_p: Params| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Ok::<_, io::Error>(()) }
                },
                trade(),
                |_p: Params| async { Ok(()) },
            )
            .await;

        assert!(!result.was_attempted());
        assert!(matches!(result, SafeExecution::Rejected { state: CircuitState::Open, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(integration.circuit().status().metrics.total_requests, 0);
    }
}
