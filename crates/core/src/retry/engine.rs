//! Retry engine: bounded attempts with backoff, per-attempt deadlines, and a
//! dead-letter queue for operations that never succeed.

use std::fmt;
use std::future::Future;
use std::num::NonZeroUsize;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use execguard_common::{CommonError, ErrorClassification, ErrorSeverity};
use lru::LruCache;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::attempt::RetryAttempt;
use super::dead_letter::{DeadLetterQueue, DlqProcessReport, DlqStatus, FailedOperation};
use super::policy::RetryPolicy;
use crate::config::{ConfigError, DeadLetterConfig, DEFAULT_HISTORY_LIMIT};
use crate::recovery::{ClassifyFailure, ErrorClassifier, ErrorKind};

//==============================================================================
// Error Types
//==============================================================================

/// Why a single attempt failed
#[derive(Debug, Error)]
pub enum AttemptFailure<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// The action returned an error
    #[error(transparent)]
    Action(E),

    /// The action did not finish within the per-attempt deadline
    #[error("Attempt timed out after {timeout:?}")]
    TimedOut { timeout: Duration },
}

impl<E> AttemptFailure<E>
where
    E: ClassifyFailure + Send + Sync + 'static,
{
    fn kind(&self, classifier: &ErrorClassifier) -> ErrorKind {
        match self {
            Self::Action(error) => classifier.classify_failure(error),
            Self::TimedOut { .. } => ErrorKind::Timeout,
        }
    }
}

impl<E> AttemptFailure<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// The action's own error, if the attempt did not time out
    pub const fn action_error(&self) -> Option<&E> {
        match self {
            Self::Action(error) => Some(error),
            Self::TimedOut { .. } => None,
        }
    }

    /// Consume into the action's own error
    pub fn into_action_error(self) -> Option<E> {
        match self {
            Self::Action(error) => Some(error),
            Self::TimedOut { .. } => None,
        }
    }
}

/// Errors returned by [`RetryEngine::execute_with_retry`]
#[derive(Debug, Error)]
pub enum RetryError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// The failure is not in the policy's retryable set; no further attempts
    /// were made and nothing was dead-lettered
    #[error("Operation '{operation}' failed with non-retryable {kind} error: {source}")]
    NonRetryable {
        operation: String,
        operation_id: String,
        kind: ErrorKind,
        attempts: u32,
        #[source]
        source: AttemptFailure<E>,
    },

    /// Every attempt failed; the operation is in the dead-letter queue
    #[error("Operation '{operation}' exhausted {attempts} attempts: {source}")]
    Exhausted {
        operation: String,
        operation_id: String,
        kind: ErrorKind,
        attempts: u32,
        #[source]
        source: AttemptFailure<E>,
    },

    /// The supplied policy failed validation; the action was never invoked
    #[error(transparent)]
    InvalidPolicy(#[from] ConfigError),
}

impl<E> RetryError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// Id of the execution, usable with
    /// [`RetryEngine::get_operation_history`]
    pub fn operation_id(&self) -> Option<&str> {
        match self {
            Self::NonRetryable { operation_id, .. } | Self::Exhausted { operation_id, .. } => {
                Some(operation_id)
            }
            Self::InvalidPolicy(_) => None,
        }
    }

    /// Classified kind of the final failure
    pub const fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::NonRetryable { kind, .. } | Self::Exhausted { kind, .. } => Some(*kind),
            Self::InvalidPolicy(_) => None,
        }
    }

    /// Attempts made before giving up
    pub const fn attempts(&self) -> u32 {
        match self {
            Self::NonRetryable { attempts, .. } | Self::Exhausted { attempts, .. } => *attempts,
            Self::InvalidPolicy(_) => 0,
        }
    }

    /// Whether the action was invoked at all
    pub const fn was_attempted(&self) -> bool {
        !matches!(self, Self::InvalidPolicy(_))
    }

    /// Final attempt failure
    pub const fn failure(&self) -> Option<&AttemptFailure<E>> {
        match self {
            Self::NonRetryable { source, .. } | Self::Exhausted { source, .. } => Some(source),
            Self::InvalidPolicy(_) => None,
        }
    }

    /// The action's own final error
    pub fn action_error(&self) -> Option<&E> {
        self.failure().and_then(AttemptFailure::action_error)
    }

    /// Consume into the action's own final error
    pub fn into_action_error(self) -> Option<E> {
        match self {
            Self::NonRetryable { source, .. } | Self::Exhausted { source, .. } => {
                source.into_action_error()
            }
            Self::InvalidPolicy(_) => None,
        }
    }
}

impl<E> ErrorClassification for RetryError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn is_retryable(&self) -> bool {
        false
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::NonRetryable { .. } | Self::Exhausted { .. } => ErrorSeverity::Error,
            Self::InvalidPolicy(e) => e.severity(),
        }
    }

    fn is_critical(&self) -> bool {
        false
    }

    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

/// Errors returned by [`RetryEngine::retry_dead_letter_item`]
#[derive(Debug, Error)]
pub enum DeadLetterError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// Stored arguments do not deserialize into the action's argument type;
    /// the entry stays queued
    #[error("Arguments of dead letter entry '{operation_id}' cannot be decoded: {source}")]
    InvalidArguments {
        operation_id: String,
        #[source]
        source: serde_json::Error,
    },

    /// The redelivery failed again; the entry was re-queued
    #[error(transparent)]
    Retry(RetryError<E>),

    /// Unknown entry id
    #[error(transparent)]
    Common(#[from] CommonError),
}

/// Result type for retry operations
pub type RetryResult<T, E> = Result<T, RetryError<E>>;

/// Successful execution together with its bookkeeping
#[derive(Debug, Clone)]
pub struct RetryReport<T> {
    pub operation_id: String,
    pub value: T,
    /// Every attempt, the last one successful
    pub attempts: Vec<RetryAttempt>,
}

//==============================================================================
// Engine
//==============================================================================

struct AttemptsFailed<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    retryable: bool,
    kind: ErrorKind,
    attempts: u32,
    failure: AttemptFailure<E>,
}

/// Executes actions under a [`RetryPolicy`] and dead-letters exhausted ones
///
/// Policies resolve in this order: the one passed to the call, the one
/// registered for the operation name, the engine default.
pub struct RetryEngine {
    default_policy: RetryPolicy,
    policies: DashMap<String, RetryPolicy>,
    dead_letters: DeadLetterQueue,
    history: Mutex<LruCache<String, Vec<RetryAttempt>>>,
    classifier: ErrorClassifier,
}

impl fmt::Debug for RetryEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryEngine")
            .field("default_policy", &self.default_policy)
            .field("registered_policies", &self.policies.len())
            .field("dead_letters", &self.dead_letters)
            .finish_non_exhaustive()
    }
}

impl Default for RetryEngine {
    fn default() -> Self {
        Self::new(RetryPolicy::default(), &DeadLetterConfig::default(), DEFAULT_HISTORY_LIMIT)
    }
}

impl RetryEngine {
    /// Engine with its own DLQ and an operation history of `history_limit`
    pub fn new(
        default_policy: RetryPolicy,
        dead_letter: &DeadLetterConfig,
        history_limit: usize,
    ) -> Self {
        let history_limit = NonZeroUsize::new(history_limit).unwrap_or(NonZeroUsize::MIN);
        Self {
            default_policy,
            policies: DashMap::new(),
            dead_letters: DeadLetterQueue::new(dead_letter.capacity, dead_letter.preview_limit),
            history: Mutex::new(LruCache::new(history_limit)),
            classifier: ErrorClassifier::default(),
        }
    }

    /// Replace the classifier used to decide retryability
    #[must_use]
    pub fn with_classifier(mut self, classifier: ErrorClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// Register the policy used for `operation_name` when none is passed
    pub fn register_policy(
        &self,
        operation_name: impl Into<String>,
        policy: RetryPolicy,
    ) -> Result<(), ConfigError> {
        policy.validate()?;
        let operation_name = operation_name.into();
        info!(
            operation = %operation_name,
            max_attempts = policy.max_attempts,
            "Retry policy registered"
        );
        self.policies.insert(operation_name, policy);
        Ok(())
    }

    /// Policy that applies to `operation_name` when none is passed
    pub fn policy_for(&self, operation_name: &str) -> RetryPolicy {
        self.policies
            .get(operation_name)
            .map_or_else(|| self.default_policy.clone(), |p| p.value().clone())
    }

    /// The engine's dead-letter queue
    pub const fn dead_letters(&self) -> &DeadLetterQueue {
        &self.dead_letters
    }

    /// Attempts of a finished execution, oldest first
    pub fn get_operation_history(&self, operation_id: &str) -> Option<Vec<RetryAttempt>> {
        self.history.lock().get(operation_id).cloned()
    }

    /// Run `action` until it succeeds, fails non-retryably, or attempts run out
    ///
    /// `args` is cloned into every attempt and serialized into the DLQ entry
    /// if the operation is exhausted.
    pub async fn execute_with_retry<A, F, Fut, T, E>(
        &self,
        operation_name: &str,
        action: F,
        args: A,
        policy: Option<RetryPolicy>,
    ) -> RetryResult<T, E>
    where
        A: Serialize + Clone,
        F: FnMut(A) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: ClassifyFailure + Send + Sync + 'static,
    {
        self.execute_with_report(operation_name, action, args, policy).await.map(|r| r.value)
    }

    /// Like [`execute_with_retry`](Self::execute_with_retry), also returning
    /// the operation id and attempt records
    #[instrument(skip_all, fields(operation = %operation_name))]
    pub async fn execute_with_report<A, F, Fut, T, E>(
        &self,
        operation_name: &str,
        mut action: F,
        args: A,
        policy: Option<RetryPolicy>,
    ) -> RetryResult<RetryReport<T>, E>
    where
        A: Serialize + Clone,
        F: FnMut(A) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: ClassifyFailure + Send + Sync + 'static,
    {
        let policy = self.resolve_policy(operation_name, policy)?;
        let operation_id = Uuid::new_v4().to_string();
        let mut attempts = Vec::new();

        let outcome =
            self.run_attempts(operation_name, &mut action, &args, &policy, &mut attempts).await;
        self.remember(&operation_id, &attempts);

        match outcome {
            Ok(value) => Ok(RetryReport { operation_id, value, attempts }),
            Err(failed) if !failed.retryable => {
                warn!(
                    operation_id = %operation_id,
                    kind = %failed.kind,
                    error = %failed.failure,
                    "Non-retryable failure"
                );
                Err(RetryError::NonRetryable {
                    operation: operation_name.to_string(),
                    operation_id,
                    kind: failed.kind,
                    attempts: failed.attempts,
                    source: failed.failure,
                })
            }
            Err(failed) => {
                let args = serde_json::to_value(&args).unwrap_or_else(|e| {
                    warn!(operation_id = %operation_id, error = %e, "Arguments not serializable");
                    serde_json::Value::Null
                });
                self.dead_letters.push(FailedOperation {
                    operation_id: operation_id.clone(),
                    operation_name: operation_name.to_string(),
                    args,
                    attempts,
                    final_error: failed.failure.to_string(),
                    final_error_kind: failed.kind,
                    enqueued_at: Utc::now(),
                    redelivery_count: 0,
                });
                warn!(
                    operation_id = %operation_id,
                    attempts = failed.attempts,
                    kind = %failed.kind,
                    "Retries exhausted, operation dead-lettered"
                );
                Err(RetryError::Exhausted {
                    operation: operation_name.to_string(),
                    operation_id,
                    kind: failed.kind,
                    attempts: failed.attempts,
                    source: failed.failure,
                })
            }
        }
    }

    /// DLQ size plus a preview of the oldest entries
    pub fn get_dlq_status(&self) -> DlqStatus {
        self.dead_letters.status()
    }

    /// Hand up to `limit` dead letters to `processor`, FIFO
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
        self.dead_letters.process(processor, limit).await
    }

    /// Re-run a dead-lettered operation with its stored arguments
    ///
    /// On success the entry is gone for good. On failure the same entry
    /// (same id, attempts appended, `redelivery_count` incremented) goes back
    /// to the tail of the queue.
    #[instrument(skip(self, action, policy))]
    pub async fn retry_dead_letter_item<A, F, Fut, T, E>(
        &self,
        operation_id: &str,
        mut action: F,
        policy: Option<RetryPolicy>,
    ) -> Result<T, DeadLetterError<E>>
    where
        A: Serialize + DeserializeOwned + Clone,
        F: FnMut(A) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: ClassifyFailure + Send + Sync + 'static,
    {
        let mut entry = self
            .dead_letters
            .take(operation_id)
            .ok_or_else(|| CommonError::not_found_with_id("Dead letter entry", operation_id))?;

        let args: A = match serde_json::from_value(entry.args.clone()) {
            Ok(args) => args,
            Err(source) => {
                self.dead_letters.push(entry);
                return Err(DeadLetterError::InvalidArguments {
                    operation_id: operation_id.to_string(),
                    source,
                });
            }
        };

        let policy = match self.resolve_policy(&entry.operation_name, policy) {
            Ok(policy) => policy,
            Err(err) => {
                self.dead_letters.push(entry);
                return Err(DeadLetterError::Retry(err));
            }
        };

        entry.redelivery_count += 1;
        info!(
            operation = %entry.operation_name,
            redelivery = entry.redelivery_count,
            "Retrying dead letter entry"
        );

        let operation_name = entry.operation_name.clone();
        let outcome = self
            .run_attempts(&operation_name, &mut action, &args, &policy, &mut entry.attempts)
            .await;
        self.remember(operation_id, &entry.attempts);

        match outcome {
            Ok(value) => {
                info!(operation = %operation_name, "Dead letter entry recovered");
                Ok(value)
            }
            Err(failed) => {
                entry.final_error = failed.failure.to_string();
                entry.final_error_kind = failed.kind;
                entry.enqueued_at = Utc::now();
                self.dead_letters.push(entry);
                warn!(
                    operation = %operation_name,
                    kind = %failed.kind,
                    "Dead letter retry failed, re-queued"
                );

                let error = if failed.retryable {
                    RetryError::Exhausted {
                        operation: operation_name,
                        operation_id: operation_id.to_string(),
                        kind: failed.kind,
                        attempts: failed.attempts,
                        source: failed.failure,
                    }
                } else {
                    RetryError::NonRetryable {
                        operation: operation_name,
                        operation_id: operation_id.to_string(),
                        kind: failed.kind,
                        attempts: failed.attempts,
                        source: failed.failure,
                    }
                };
                Err(DeadLetterError::Retry(error))
            }
        }
    }

    /// Drop every dead letter
    pub fn clear_dlq(&self) -> usize {
        self.dead_letters.clear()
    }

    fn resolve_policy<E>(
        &self,
        operation_name: &str,
        policy: Option<RetryPolicy>,
    ) -> RetryResult<RetryPolicy, E>
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        match policy {
            Some(policy) => {
                policy.validate()?;
                Ok(policy)
            }
            None => Ok(self.policy_for(operation_name)),
        }
    }

    fn remember(&self, operation_id: &str, attempts: &[RetryAttempt]) {
        self.history.lock().put(operation_id.to_string(), attempts.to_vec());
    }

    /// Attempt loop shared by first executions and DLQ redeliveries;
    /// appends to `attempts`, continuing its numbering
    async fn run_attempts<A, F, Fut, T, E>(
        &self,
        operation_name: &str,
        action: &mut F,
        args: &A,
        policy: &RetryPolicy,
        attempts: &mut Vec<RetryAttempt>,
    ) -> Result<T, AttemptsFailed<E>>
    where
        A: Clone,
        F: FnMut(A) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: ClassifyFailure + Send + Sync + 'static,
    {
        let offset = u32::try_from(attempts.len()).unwrap_or(u32::MAX);
        let timeout = policy.attempt_timeout();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let number = offset.saturating_add(attempt);
            debug!(operation = %operation_name, attempt = number, "Executing attempt");

            let failure = match tokio::time::timeout(timeout, action(args.clone())).await {
                Ok(Ok(value)) => {
                    attempts.push(RetryAttempt::succeeded(number));
                    if attempt > 1 {
                        info!(
                            operation = %operation_name,
                            attempt = number,
                            "Operation succeeded after retry"
                        );
                    }
                    return Ok(value);
                }
                Ok(Err(error)) => AttemptFailure::Action(error),
                Err(_elapsed) => AttemptFailure::TimedOut { timeout },
            };

            let kind = failure.kind(&self.classifier);
            let retryable = policy.retryable.permits(kind);

            if !retryable || attempt >= policy.max_attempts {
                let message = failure.to_string();
                attempts.push(RetryAttempt::failed(number, Duration::ZERO, message, kind));
                return Err(AttemptsFailed { retryable, kind, attempts: attempt, failure });
            }

            let delay = policy.delay_for_attempt(attempt);
            warn!(
                operation = %operation_name,
                attempt = number,
                kind = %kind,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %failure,
                "Attempt failed, retrying"
            );
            attempts.push(RetryAttempt::failed(number, delay, failure.to_string(), kind));
            tokio::time::sleep(delay).await;
        }
    }
}
