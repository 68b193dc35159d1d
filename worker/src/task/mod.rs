//! Task identity, routing, and outcome reporting.
//!
//! A task moves through the system as a [`TaskEnvelope`]: a JSON
//! message carrying the task's identity, positional arguments, and
//! retry metadata. The [`Registry`] binds each [`TaskName`] to exactly
//! one handler and one [`RoutingRule`] at boot; after that the mapping
//! is read-only. Per-attempt results are reported through the
//! [`OutcomeTracker`].

pub mod envelope;
pub mod outcome;
pub mod registry;

pub use envelope::{TaskEnvelope, TaskName, CLEANUP_QUEUE, EMAILS_QUEUE};
pub use outcome::{ExecutionOutcome, OutcomeStatus, OutcomeTracker};
pub use registry::{Handler, HandlerFuture, Registry, RoutingRule, TaskContext};
