//! Attempt execution state machine.
//!
//! Per envelope: `Received → Executing → {Acked | Retrying |
//! DeadLettered}`. The worker loop inspects the returned
//! [`AttemptDecision`] and drives acknowledgement explicitly; handlers
//! report failure through [`TaskError`] values, never through control
//! flow the loop has to catch.

use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::time::{sleep, timeout};
use tracing::{error, warn};

use crate::error::TaskError;
use crate::rate_limit::{RateDecision, RateLimiter};
use crate::task::{
    ExecutionOutcome, OutcomeStatus, OutcomeTracker, Registry, TaskContext, TaskEnvelope,
};

/// What the consumer loop does with the delivery after an attempt.
#[derive(Debug, PartialEq)]
pub enum AttemptDecision {
    /// Handler succeeded: acknowledge, envelope leaves the queue.
    Ack,
    /// Transient failure with retries left: re-enqueue the next
    /// attempt after the delay, then acknowledge this delivery.
    Retry { delay: Duration },
    /// Terminal failure: acknowledge so the envelope leaves the queue.
    DeadLettered,
    /// Rate limited: re-enqueue unchanged after the delay, then
    /// acknowledge. Does not count as an execution.
    Defer { delay: Duration },
}

/// Run one execution attempt for `envelope`.
///
/// The envelope stays unacknowledged throughout; a crash here means
/// broker redelivery, which is why handlers must be idempotent.
pub async fn run_attempt(
    registry: &Registry,
    limiter: &RateLimiter,
    tracker: &OutcomeTracker,
    envelope: &TaskEnvelope,
) -> AttemptDecision {
    let Some(binding) = registry.binding(envelope.task_name) else {
        // A valid wire name with no handler is a deployment skew
        // problem; retrying cannot fix it.
        error!(
            task = %envelope.task_name,
            task_id = %envelope.task_id,
            "task_handler_missing"
        );
        tracker.record(outcome(
            envelope,
            OutcomeStatus::Failed,
            "no registered handler".to_string(),
        ));
        return AttemptDecision::DeadLettered;
    };
    let rule = &binding.rule;

    if let RateDecision::Defer(delay) = limiter.try_acquire(envelope.task_name, rule.rate_limit) {
        return AttemptDecision::Defer { delay };
    }

    let ctx = TaskContext {
        task_id: envelope.task_id.clone(),
        args: envelope.args.clone(),
        attempt: envelope.attempt_count + 1,
        soft_deadline: Instant::now() + rule.soft_time_limit,
    };

    let mut handler_fut = (binding.handler)(ctx);

    let result = tokio::select! {
        res = &mut handler_fut => res,
        _ = sleep(rule.soft_time_limit) => {
            // Soft limit is advisory: log, let the handler wind down,
            // and only abort at the hard limit.
            warn!(
                task = %envelope.task_name,
                task_id = %envelope.task_id,
                limit_secs = rule.soft_time_limit.as_secs(),
                "task_soft_time_limit_exceeded"
            );
            let remaining = rule.hard_time_limit.saturating_sub(rule.soft_time_limit);
            match timeout(remaining, &mut handler_fut).await {
                Ok(res) => res,
                Err(_) => Err(TaskError::HardTimeLimit(rule.hard_time_limit)),
            }
        }
    };

    match result {
        Ok(detail) => {
            tracker.record(outcome(envelope, OutcomeStatus::Success, detail));
            AttemptDecision::Ack
        }
        Err(TaskError::RecordNotFound(detail)) => {
            // The precondition can never become true again.
            tracker.record(outcome(envelope, OutcomeStatus::Failed, detail));
            AttemptDecision::DeadLettered
        }
        Err(err) => {
            if envelope.attempt_count < envelope.max_retries {
                tracker.record(outcome(envelope, OutcomeStatus::Retrying, err.to_string()));
                AttemptDecision::Retry {
                    delay: envelope.retry_delay(),
                }
            } else {
                tracker.record(outcome(envelope, OutcomeStatus::Exhausted, err.to_string()));
                AttemptDecision::DeadLettered
            }
        }
    }
}

fn outcome(envelope: &TaskEnvelope, status: OutcomeStatus, detail: String) -> ExecutionOutcome {
    ExecutionOutcome {
        task_id: envelope.task_id.clone(),
        task_name: envelope.task_name,
        status,
        detail,
        completed_at: Utc::now(),
    }
}
