//! Bounded dead-letter queue for operations that used up their retries
//!
//! Entries keep their arguments as JSON so they can be inspected, exported,
//! or re-run later with
//! [`RetryEngine::retry_dead_letter_item`](super::RetryEngine::retry_dead_letter_item).
//! The queue is FIFO; once full, pushing evicts the oldest entry.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use super::attempt::RetryAttempt;
use crate::config::{DEFAULT_DLQ_CAPACITY, DEFAULT_DLQ_PREVIEW_LIMIT};
use crate::recovery::ErrorKind;

/// Characters of the final error shown in a status preview
pub const PREVIEW_ERROR_CHARS: usize = 200;

/// An operation that exhausted its retries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedOperation {
    /// Unique id, stable across redeliveries
    pub operation_id: String,
    /// Name the operation was executed under
    pub operation_name: String,
    /// Original arguments
    pub args: Value,
    /// Every attempt, across redeliveries, in order
    pub attempts: Vec<RetryAttempt>,
    /// Message of the last failure
    pub final_error: String,
    /// Kind of the last failure
    pub final_error_kind: ErrorKind,
    /// When the entry was (re-)enqueued
    pub enqueued_at: DateTime<Utc>,
    /// Times the entry was taken out and retried
    pub redelivery_count: u32,
}

/// Summary line for one entry in [`DlqStatus`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DlqEntryPreview {
    pub operation_id: String,
    pub operation_name: String,
    pub enqueued_at: DateTime<Utc>,
    /// Final error, truncated
    pub error: String,
    pub attempts: usize,
    pub redelivery_count: u32,
}

/// Queue size plus a bounded preview, oldest first
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DlqStatus {
    pub size: usize,
    pub capacity: usize,
    /// Entries dropped because the queue was full
    pub evicted_total: u64,
    pub entries: Vec<DlqEntryPreview>,
}

/// Result of a [`DeadLetterQueue::process`] pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DlqProcessReport {
    /// Entries the processor accepted and that were removed
    pub processed: usize,
    /// Entries the processor rejected; they went back to the tail
    pub failed: usize,
}

/// Thread-safe bounded FIFO of [`FailedOperation`]s
pub struct DeadLetterQueue {
    entries: Mutex<VecDeque<FailedOperation>>,
    capacity: usize,
    preview_limit: usize,
    evicted: AtomicU64,
}

impl fmt::Debug for DeadLetterQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeadLetterQueue")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .field("evicted", &self.evicted.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for DeadLetterQueue {
    fn default() -> Self {
        Self::new(DEFAULT_DLQ_CAPACITY, DEFAULT_DLQ_PREVIEW_LIMIT)
    }
}

impl DeadLetterQueue {
    /// Queue holding at most `capacity` entries (minimum 1)
    pub fn new(capacity: usize, preview_limit: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(1_024))),
            capacity,
            preview_limit,
            evicted: AtomicU64::new(0),
        }
    }

    /// Append at the tail, returning the evicted head if the queue was full
    pub fn push(&self, entry: FailedOperation) -> Option<FailedOperation> {
        let mut entries = self.entries.lock();
        let evicted = if entries.len() >= self.capacity {
            self.evicted.fetch_add(1, Ordering::Relaxed);
            entries.pop_front()
        } else {
            None
        };
        entries.push_back(entry);
        drop(entries);

        if let Some(old) = &evicted {
            warn!(
                operation_id = %old.operation_id,
                operation = %old.operation_name,
                capacity = self.capacity,
                "Dead letter queue full, evicted oldest entry"
            );
        }
        evicted
    }

    /// Remove and return the oldest entry
    pub fn pop_front(&self) -> Option<FailedOperation> {
        self.entries.lock().pop_front()
    }

    /// Remove the entry with `operation_id`
    pub fn take(&self, operation_id: &str) -> Option<FailedOperation> {
        let mut entries = self.entries.lock();
        let index = entries.iter().position(|e| e.operation_id == operation_id)?;
        entries.remove(index)
    }

    /// Copy of the entry with `operation_id`
    pub fn get(&self, operation_id: &str) -> Option<FailedOperation> {
        self.entries.lock().iter().find(|e| e.operation_id == operation_id).cloned()
    }

    /// Whether an entry with `operation_id` is queued
    pub fn contains(&self, operation_id: &str) -> bool {
        self.entries.lock().iter().any(|e| e.operation_id == operation_id)
    }

    /// Copy of every entry, oldest first
    pub fn snapshot(&self) -> Vec<FailedOperation> {
        self.entries.lock().iter().cloned().collect()
    }

    /// Entries currently queued
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether nothing is queued
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Entries kept before the oldest is evicted
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Entries evicted since creation
    pub fn evicted_total(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    /// Size plus a preview of the oldest entries
    pub fn status(&self) -> DlqStatus {
        let entries = self.entries.lock();
        let preview = entries
            .iter()
            .take(self.preview_limit)
            .map(|e| DlqEntryPreview {
                operation_id: e.operation_id.clone(),
                operation_name: e.operation_name.clone(),
                enqueued_at: e.enqueued_at,
                error: truncate_chars(&e.final_error, PREVIEW_ERROR_CHARS),
                attempts: e.attempts.len(),
                redelivery_count: e.redelivery_count,
            })
            .collect();

        DlqStatus {
            size: entries.len(),
            capacity: self.capacity,
            evicted_total: self.evicted.load(Ordering::Relaxed),
            entries: preview,
        }
    }

    /// Drop every entry, returning how many were dropped
    pub fn clear(&self) -> usize {
        let mut entries = self.entries.lock();
        let count = entries.len();
        entries.clear();
        drop(entries);
        info!(count, "Dead letter queue cleared");
        count
    }

    /// Hand up to `limit` of the oldest entries to `processor`
    ///
    /// The number of entries is fixed when the pass starts, so entries pushed
    /// back after a rejection are not seen twice. A rejected entry goes back
    /// to the tail rather than being lost.
    #[instrument(skip(self, processor))]
    pub async fn process<F, Fut, E>(&self, mut processor: F, limit: usize) -> DlqProcessReport
    where
        F: FnMut(FailedOperation) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: fmt::Display,
    {
        let budget = limit.min(self.len());
        let mut report = DlqProcessReport::default();

        for _ in 0..budget {
            let Some(entry) = self.pop_front() else {
                break;
            };
            match processor(entry.clone()).await {
                Ok(()) => {
                    debug!(operation_id = %entry.operation_id, "Dead letter entry processed");
                    report.processed += 1;
                }
                Err(error) => {
                    warn!(
                        operation_id = %entry.operation_id,
                        error = %error,
                        "Dead letter processor failed, re-queueing entry"
                    );
                    report.failed += 1;
                    self.push(entry);
                }
            }
        }

        info!(processed = report.processed, failed = report.failed, "Dead letter pass finished");
        report
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}
