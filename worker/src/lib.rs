//! TravelQ - async task queue core for the travel booking backend.
//!
//! This library provides shared modules for the two TravelQ binaries:
//! - `travelq-worker`: pulls task envelopes from the durable queues
//!   and executes them with bounded retries and rate limiting
//! - `travelq-beat`: fires recurring maintenance tasks on a fixed
//!   cadence
//!
//! ## Architecture
//!
//! ```text
//! web handler ──▶ emails  queue ──▶ worker ──▶ mailer
//! beat ─────────▶ cleanup queue ──▶ worker ──▶ store
//! ```
//!
//! The web layer enqueues a confirmation envelope after committing a
//! booking and never waits on it; workers execute late-ack with
//! at-least-once delivery, so every handler is written to be safely
//! re-runnable.

pub mod config;
pub mod error;
pub mod queue;
pub mod rate_limit;
pub mod scheduler;
pub mod task;
pub mod tasks;
pub mod travel;
pub mod worker;

// Re-export commonly used types
pub use config::Config;
pub use error::{ConfigurationError, EnqueueError, TaskError};
pub use queue::BrokerClient;
pub use rate_limit::{RateDecision, RateLimit, RateLimiter};
pub use task::{
    ExecutionOutcome, OutcomeStatus, OutcomeTracker, Registry, RoutingRule, TaskContext,
    TaskEnvelope, TaskName, CLEANUP_QUEUE, EMAILS_QUEUE,
};
pub use tasks::{default_registry, enqueue_confirmation, enqueue_reminder};
