//! Per-attempt outcome recording.
//!
//! Every attempt produces an [`ExecutionOutcome`]. Callers are
//! fire-and-forget by default; anyone holding a task_id may subscribe
//! for the terminal outcome before it completes. Exhaustion is always
//! surfaced to operational logging, never silently dropped.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;
use tracing::{error, info, warn};

use crate::task::TaskName;

/// Where an attempt left the envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeStatus {
    /// Handler returned normally; envelope acknowledged
    Success,
    /// Non-retriable precondition failure; dead-lettered immediately
    Failed,
    /// Transient failure with retries remaining
    Retrying,
    /// Transient failure with no retries remaining; dead-lettered
    Exhausted,
}

impl OutcomeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeStatus::Success => "success",
            OutcomeStatus::Failed => "failed",
            OutcomeStatus::Retrying => "retrying",
            OutcomeStatus::Exhausted => "exhausted",
        }
    }

    /// Terminal outcomes end the envelope's life; `Retrying` does not.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OutcomeStatus::Retrying)
    }
}

/// Result of a single execution attempt.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub task_id: String,
    pub task_name: TaskName,
    pub status: OutcomeStatus,
    /// Handler result message on success, error text otherwise
    pub detail: String,
    pub completed_at: DateTime<Utc>,
}

/// Records attempt outcomes and delivers terminal ones to subscribers.
#[derive(Default)]
pub struct OutcomeTracker {
    waiters: Mutex<HashMap<String, oneshot::Sender<ExecutionOutcome>>>,
}

impl OutcomeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register interest in the terminal outcome of `task_id`. The
    /// receiver resolves once the envelope is acked or dead-lettered.
    pub fn subscribe(&self, task_id: &str) -> oneshot::Receiver<ExecutionOutcome> {
        let (tx, rx) = oneshot::channel();
        if let Ok(mut waiters) = self.waiters.lock() {
            waiters.insert(task_id.to_string(), tx);
        }
        rx
    }

    /// Record one attempt's outcome.
    pub fn record(&self, outcome: ExecutionOutcome) {
        match outcome.status {
            OutcomeStatus::Success => info!(
                task_id = %outcome.task_id,
                task = %outcome.task_name,
                detail = %outcome.detail,
                "task_succeeded"
            ),
            OutcomeStatus::Retrying => warn!(
                task_id = %outcome.task_id,
                task = %outcome.task_name,
                error = %outcome.detail,
                "task_attempt_failed"
            ),
            OutcomeStatus::Failed => error!(
                task_id = %outcome.task_id,
                task = %outcome.task_name,
                error = %outcome.detail,
                "task_failed"
            ),
            OutcomeStatus::Exhausted => error!(
                task_id = %outcome.task_id,
                task = %outcome.task_name,
                error = %outcome.detail,
                "task_retries_exhausted"
            ),
        }

        if outcome.status.is_terminal() {
            let waiter = self
                .waiters
                .lock()
                .ok()
                .and_then(|mut waiters| waiters.remove(&outcome.task_id));
            if let Some(tx) = waiter {
                // Subscriber may have gone away; that is fine.
                let _ = tx.send(outcome);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(task_id: &str, status: OutcomeStatus) -> ExecutionOutcome {
        ExecutionOutcome {
            task_id: task_id.to_string(),
            task_name: TaskName::SendBookingConfirmationEmail,
            status,
            detail: "detail".to_string(),
            completed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_subscriber_receives_terminal_outcome() {
        let tracker = OutcomeTracker::new();
        let rx = tracker.subscribe("t1");

        tracker.record(outcome("t1", OutcomeStatus::Success));

        let received = rx.await.unwrap();
        assert_eq!(received.status, OutcomeStatus::Success);
        assert_eq!(received.task_id, "t1");
    }

    #[tokio::test]
    async fn test_retrying_does_not_resolve_subscription() {
        let tracker = OutcomeTracker::new();
        let mut rx = tracker.subscribe("t1");

        tracker.record(outcome("t1", OutcomeStatus::Retrying));
        assert!(rx.try_recv().is_err());

        tracker.record(outcome("t1", OutcomeStatus::Exhausted));
        let received = rx.await.unwrap();
        assert_eq!(received.status, OutcomeStatus::Exhausted);
    }

    #[test]
    fn test_fire_and_forget_record() {
        let tracker = OutcomeTracker::new();
        // No subscriber: recording must not fail or block.
        tracker.record(outcome("t2", OutcomeStatus::Failed));
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(OutcomeStatus::Success.is_terminal());
        assert!(OutcomeStatus::Failed.is_terminal());
        assert!(OutcomeStatus::Exhausted.is_terminal());
        assert!(!OutcomeStatus::Retrying.is_terminal());
    }
}
