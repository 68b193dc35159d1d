//! Error taxonomy for the task queue core.
//!
//! Three layers of failure, each with a different blast radius:
//! - [`ConfigurationError`]: fatal at boot, the process must not start.
//! - [`EnqueueError`]: recoverable at enqueue time; callers on the
//!   request path log these and continue (a booking must never fail
//!   because its confirmation email could not be scheduled).
//! - [`TaskError`]: scoped to a single execution attempt; drives the
//!   worker's retry state machine without ever crashing the process.

use std::time::Duration;

use thiserror::Error;

use crate::task::TaskName;

/// Fatal boot-time configuration problems.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// A task name was registered twice. Registration happens once at
    /// startup; a duplicate means two handlers compete for one name.
    #[error("task {0} is already registered")]
    DuplicateRegistration(TaskName),

    /// A schedule entry names a task with no registered handler.
    #[error("schedule references unregistered task {0}")]
    UnregisteredScheduleTask(TaskName),

    /// A schedule entry has a zero-length interval.
    #[error("schedule interval for task {0} must be positive")]
    ZeroScheduleInterval(TaskName),
}

/// Enqueue-time failures.
#[derive(Debug, Error)]
pub enum EnqueueError {
    /// The task name has no binding in the registry.
    #[error("task {0} has no registered handler")]
    UnknownTask(TaskName),

    /// The broker connection could not be established or the publish
    /// was not confirmed.
    #[error("broker unavailable: {0}")]
    BrokerUnavailable(#[from] lapin::Error),

    #[error("envelope serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Failure of a single task execution attempt.
#[derive(Debug, Error)]
pub enum TaskError {
    /// The referenced record no longer exists. The precondition can
    /// never become true again, so the envelope is dead-lettered
    /// without retry.
    #[error("record not found: {0}")]
    RecordNotFound(String),

    /// Any other handler failure. Retried with a fixed delay until
    /// max_retries is exhausted.
    #[error("transient failure: {0}")]
    Transient(#[source] anyhow::Error),

    /// The hard time limit forcibly aborted the attempt. Counted as a
    /// transient failure for retry purposes.
    #[error("hard time limit of {0:?} exceeded")]
    HardTimeLimit(Duration),
}
