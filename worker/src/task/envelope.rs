//! Task identity and the wire envelope.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Queue for outbound email tasks.
pub const EMAILS_QUEUE: &str = "emails";

/// Queue for periodic maintenance tasks.
pub const CLEANUP_QUEUE: &str = "cleanup";

/// The closed set of task identities this system executes.
///
/// Task names are checked at compile time; an envelope can only name a
/// task that exists, and the registry fails at boot if a variant is
/// scheduled without a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskName {
    SendBookingConfirmationEmail,
    SendBookingReminderEmail,
    CleanupExpiredBookings,
}

impl TaskName {
    /// Every task name, for boot-time validation sweeps.
    pub const ALL: [TaskName; 3] = [
        TaskName::SendBookingConfirmationEmail,
        TaskName::SendBookingReminderEmail,
        TaskName::CleanupExpiredBookings,
    ];

    /// Stable wire name, as it appears in serialized envelopes.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskName::SendBookingConfirmationEmail => "send_booking_confirmation_email",
            TaskName::SendBookingReminderEmail => "send_booking_reminder_email",
            TaskName::CleanupExpiredBookings => "cleanup_expired_bookings",
        }
    }
}

impl fmt::Display for TaskName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A serialized task invocation in transit through the queue.
///
/// Owned by the broker client from creation until acknowledgement or
/// exhaustion. Immutable except for `attempt_count`, which only moves
/// through [`TaskEnvelope::next_attempt`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEnvelope {
    /// Opaque unique token identifying this invocation
    pub task_id: String,
    pub task_name: TaskName,
    /// Positional arguments, JSON-encoded
    pub args: Vec<serde_json::Value>,
    /// Durable queue this envelope routes to
    pub queue: String,
    pub enqueued_at: DateTime<Utc>,
    /// Completed executions so far; zero for a fresh envelope
    pub attempt_count: u32,
    /// Retries allowed after the first failed attempt
    pub max_retries: u32,
    /// Fixed delay before a retry is re-enqueued
    pub retry_delay_secs: u64,
}

impl TaskEnvelope {
    /// The fixed retry delay as a [`Duration`].
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    /// The envelope for the next attempt after a transient failure.
    pub fn next_attempt(&self) -> TaskEnvelope {
        TaskEnvelope {
            attempt_count: self.attempt_count + 1,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_name_wire_format() {
        let json = serde_json::to_string(&TaskName::SendBookingConfirmationEmail).unwrap();
        assert_eq!(json, "\"send_booking_confirmation_email\"");

        let parsed: TaskName = serde_json::from_str("\"cleanup_expired_bookings\"").unwrap();
        assert_eq!(parsed, TaskName::CleanupExpiredBookings);
    }

    #[test]
    fn test_envelope_serialization() {
        let envelope = TaskEnvelope {
            task_id: "abc-123".to_string(),
            task_name: TaskName::SendBookingConfirmationEmail,
            args: vec!["B1".into(), "U1".into()],
            queue: EMAILS_QUEUE.to_string(),
            enqueued_at: Utc::now(),
            attempt_count: 0,
            max_retries: 3,
            retry_delay_secs: 60,
        };

        let json = serde_json::to_vec(&envelope).unwrap();
        let parsed: TaskEnvelope = serde_json::from_slice(&json).unwrap();

        assert_eq!(parsed.task_id, "abc-123");
        assert_eq!(parsed.task_name, TaskName::SendBookingConfirmationEmail);
        assert_eq!(parsed.queue, EMAILS_QUEUE);
        assert_eq!(parsed.retry_delay(), Duration::from_secs(60));
    }

    #[test]
    fn test_next_attempt_only_bumps_count() {
        let envelope = TaskEnvelope {
            task_id: "abc-123".to_string(),
            task_name: TaskName::SendBookingReminderEmail,
            args: vec!["B1".into()],
            queue: EMAILS_QUEUE.to_string(),
            enqueued_at: Utc::now(),
            attempt_count: 1,
            max_retries: 3,
            retry_delay_secs: 60,
        };

        let next = envelope.next_attempt();
        assert_eq!(next.attempt_count, 2);
        assert_eq!(next.task_id, envelope.task_id);
        assert_eq!(next.queue, envelope.queue);
    }
}
