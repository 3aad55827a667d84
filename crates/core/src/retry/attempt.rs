//! Per-attempt records kept for observability and the DLQ

use std::time::Duration;

use chrono::{DateTime, Utc};
use execguard_common::duration_millis;
use serde::{Deserialize, Serialize};

use crate::recovery::ErrorKind;

/// One invocation of an action inside a retry loop
///
/// A success carries no result payload: the value goes to the caller
/// through [`RetryReport::value`](super::RetryReport::value), and the
/// attempt only records that it succeeded. Attempts stay serializable for
/// any action, whatever its return type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryAttempt {
    /// 1-based, strictly increasing per operation (redeliveries continue the
    /// sequence)
    pub attempt_number: u32,
    /// When the attempt finished
    pub timestamp: DateTime<Utc>,
    /// Delay waited after this attempt; zero for the final attempt
    #[serde(rename = "delay_ms", with = "duration_millis")]
    pub delay: Duration,
    /// Failure message
    pub error: Option<String>,
    /// Classified failure kind
    pub error_kind: Option<ErrorKind>,
    /// Whether the attempt succeeded
    pub success: bool,
}

impl RetryAttempt {
    pub(crate) fn succeeded(attempt_number: u32) -> Self {
        Self {
            attempt_number,
            timestamp: Utc::now(),
            delay: Duration::ZERO,
            error: None,
            error_kind: None,
            success: true,
        }
    }

    pub(crate) fn failed(
        attempt_number: u32,
        delay: Duration,
        error: String,
        kind: ErrorKind,
    ) -> Self {
        Self {
            attempt_number,
            timestamp: Utc::now(),
            delay,
            error: Some(error),
            error_kind: Some(kind),
            success: false,
        }
    }
}
