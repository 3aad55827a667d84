//! Retry execution with configurable backoff and a dead-letter queue
//!
//! [`RetryEngine`] runs an action until it succeeds, fails with a kind its
//! [`RetryPolicy`] does not retry, or runs out of attempts. Exhausted
//! operations land in the engine's [`DeadLetterQueue`] with their arguments
//! and full attempt history.

mod attempt;
mod dead_letter;
mod engine;
mod policy;

pub use attempt::RetryAttempt;
pub use dead_letter::{
    DeadLetterQueue, DlqEntryPreview, DlqProcessReport, DlqStatus, FailedOperation,
    PREVIEW_ERROR_CHARS,
};
pub use engine::{
    AttemptFailure, DeadLetterError, RetryEngine, RetryError, RetryReport, RetryResult,
};
pub use policy::{BackoffStrategy, RetryOn, RetryPolicy};
