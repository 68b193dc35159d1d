//! Process-wide task registry.
//!
//! Built once at boot, read-only thereafter. Each [`TaskName`] maps to
//! exactly one handler and one [`RoutingRule`]; routing is a pure
//! function of configuration, never of envelope history.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::anyhow;
use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use crate::error::{ConfigurationError, EnqueueError, TaskError};
use crate::rate_limit::RateLimit;
use crate::task::{TaskEnvelope, TaskName};

/// Boxed future returned by task handlers.
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<String, TaskError>> + Send>>;

/// A task handler bound at boot. Returns a short human-readable result
/// message on success.
pub type Handler = Arc<dyn Fn(TaskContext) -> HandlerFuture + Send + Sync>;

/// Per-attempt execution context handed to a handler.
pub struct TaskContext {
    pub task_id: String,
    /// Positional arguments from the envelope
    pub args: Vec<Value>,
    /// 1-based attempt number
    pub attempt: u32,
    /// Cooperative deadline; handlers should wind down once passed
    pub soft_deadline: Instant,
}

impl TaskContext {
    /// Whether the soft time limit has elapsed. Long-running handlers
    /// check this between units of work and stop gracefully.
    pub fn soft_expired(&self) -> bool {
        Instant::now() >= self.soft_deadline
    }

    /// Decode a positional string argument.
    pub fn str_arg(&self, index: usize) -> Result<String, TaskError> {
        self.args
            .get(index)
            .and_then(Value::as_str)
            .map(str::to_owned)
            .ok_or_else(|| TaskError::Transient(anyhow!("missing or non-string argument {index}")))
    }
}

/// Routing and retry policy for one task name.
///
/// `retry_delay` is the single authoritative value for the task; there
/// is no second per-call override.
#[derive(Clone)]
pub struct RoutingRule {
    pub queue: &'static str,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub rate_limit: Option<RateLimit>,
    pub soft_time_limit: Duration,
    pub hard_time_limit: Duration,
}

/// A handler together with its routing rule.
pub struct TaskBinding {
    pub rule: RoutingRule,
    pub handler: Handler,
}

/// Mapping from task name to binding. No mutation after boot.
#[derive(Default)]
pub struct Registry {
    bindings: HashMap<TaskName, TaskBinding>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a handler and routing rule to a task name. Duplicate
    /// registration is a boot-time failure.
    pub fn register(
        &mut self,
        name: TaskName,
        rule: RoutingRule,
        handler: Handler,
    ) -> Result<(), ConfigurationError> {
        if self.bindings.contains_key(&name) {
            return Err(ConfigurationError::DuplicateRegistration(name));
        }
        self.bindings.insert(name, TaskBinding { rule, handler });
        Ok(())
    }

    pub fn binding(&self, name: TaskName) -> Option<&TaskBinding> {
        self.bindings.get(&name)
    }

    pub fn rule(&self, name: TaskName) -> Option<&RoutingRule> {
        self.bindings.get(&name).map(|b| &b.rule)
    }

    /// Build a fresh envelope for `name`, routed per its rule.
    pub fn build_envelope(
        &self,
        name: TaskName,
        args: Vec<Value>,
    ) -> Result<TaskEnvelope, EnqueueError> {
        let rule = self.rule(name).ok_or(EnqueueError::UnknownTask(name))?;
        Ok(TaskEnvelope {
            task_id: Uuid::new_v4().to_string(),
            task_name: name,
            args,
            queue: rule.queue.to_string(),
            enqueued_at: Utc::now(),
            attempt_count: 0,
            max_retries: rule.max_retries,
            retry_delay_secs: rule.retry_delay.as_secs(),
        })
    }

    /// Fail fast if any scheduled task name lacks a handler.
    pub fn validate_schedule(
        &self,
        tasks: impl IntoIterator<Item = TaskName>,
    ) -> Result<(), ConfigurationError> {
        for name in tasks {
            if !self.bindings.contains_key(&name) {
                return Err(ConfigurationError::UnregisteredScheduleTask(name));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{CLEANUP_QUEUE, EMAILS_QUEUE};

    fn noop_handler() -> Handler {
        Arc::new(|_ctx| Box::pin(async { Ok("ok".to_string()) }))
    }

    fn test_rule(queue: &'static str) -> RoutingRule {
        RoutingRule {
            queue,
            max_retries: 3,
            retry_delay: Duration::from_secs(60),
            rate_limit: None,
            soft_time_limit: Duration::from_secs(300),
            hard_time_limit: Duration::from_secs(1800),
        }
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut registry = Registry::new();
        registry
            .register(
                TaskName::CleanupExpiredBookings,
                test_rule(CLEANUP_QUEUE),
                noop_handler(),
            )
            .unwrap();

        let err = registry
            .register(
                TaskName::CleanupExpiredBookings,
                test_rule(CLEANUP_QUEUE),
                noop_handler(),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigurationError::DuplicateRegistration(TaskName::CleanupExpiredBookings)
        ));
    }

    #[test]
    fn test_build_envelope_unknown_task_fails() {
        let registry = Registry::new();
        let err = registry
            .build_envelope(TaskName::SendBookingReminderEmail, vec![])
            .unwrap_err();
        assert!(matches!(
            err,
            EnqueueError::UnknownTask(TaskName::SendBookingReminderEmail)
        ));
    }

    #[test]
    fn test_build_envelope_routes_to_configured_queue() {
        let mut registry = Registry::new();
        registry
            .register(
                TaskName::SendBookingConfirmationEmail,
                test_rule(EMAILS_QUEUE),
                noop_handler(),
            )
            .unwrap();

        let envelope = registry
            .build_envelope(
                TaskName::SendBookingConfirmationEmail,
                vec!["B1".into(), "U1".into()],
            )
            .unwrap();

        assert_eq!(envelope.queue, EMAILS_QUEUE);
        assert_eq!(envelope.attempt_count, 0);
        assert_eq!(envelope.max_retries, 3);
        assert!(!envelope.task_id.is_empty());
    }

    #[test]
    fn test_envelope_task_ids_are_unique() {
        let mut registry = Registry::new();
        registry
            .register(
                TaskName::CleanupExpiredBookings,
                test_rule(CLEANUP_QUEUE),
                noop_handler(),
            )
            .unwrap();

        let a = registry
            .build_envelope(TaskName::CleanupExpiredBookings, vec![])
            .unwrap();
        let b = registry
            .build_envelope(TaskName::CleanupExpiredBookings, vec![])
            .unwrap();
        assert_ne!(a.task_id, b.task_id);
    }

    #[test]
    fn test_validate_schedule() {
        let mut registry = Registry::new();
        registry
            .register(
                TaskName::CleanupExpiredBookings,
                test_rule(CLEANUP_QUEUE),
                noop_handler(),
            )
            .unwrap();

        assert!(registry
            .validate_schedule([TaskName::CleanupExpiredBookings])
            .is_ok());

        let err = registry
            .validate_schedule([TaskName::SendBookingReminderEmail])
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigurationError::UnregisteredScheduleTask(TaskName::SendBookingReminderEmail)
        ));
    }

    #[test]
    fn test_str_arg() {
        let ctx = TaskContext {
            task_id: "t1".to_string(),
            args: vec!["B1".into(), 42.into()],
            attempt: 1,
            soft_deadline: Instant::now() + Duration::from_secs(300),
        };

        assert_eq!(ctx.str_arg(0).unwrap(), "B1");
        assert!(ctx.str_arg(1).is_err());
        assert!(ctx.str_arg(2).is_err());
    }
}
