//! Periodic task trigger (beat).
//!
//! Maintains a static table of schedule entries and, on a fixed tick,
//! enqueues an envelope for every entry whose fire time has elapsed.
//! The scheduler never executes task bodies; it only enqueues. Missed
//! fires (scheduler downtime) are skipped, not replayed.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use crate::config::Config;
use crate::error::ConfigurationError;
use crate::queue::BrokerClient;
use crate::task::{Registry, TaskName};
use crate::worker::shutdown_signal;

/// Tick cadence of the scheduler loop.
pub const TICK: Duration = Duration::from_secs(1);

/// One recurring task. Mutated only by the scheduler.
#[derive(Debug, Clone)]
pub struct ScheduleEntry {
    pub task_name: TaskName,
    interval: chrono::Duration,
    pub next_fire_at: DateTime<Utc>,
}

impl ScheduleEntry {
    /// First fire is one full interval after `now`. Intervals are
    /// clamped to a year so fire-time arithmetic cannot overflow on
    /// degenerate config.
    pub fn new(task_name: TaskName, interval: Duration, now: DateTime<Utc>) -> Self {
        let interval = match chrono::Duration::from_std(interval) {
            Ok(d) => d.min(chrono::Duration::days(365)),
            Err(_) => chrono::Duration::days(365),
        };
        ScheduleEntry {
            task_name,
            interval,
            next_fire_at: now + interval,
        }
    }

    pub fn interval(&self) -> chrono::Duration {
        self.interval
    }

    fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_fire_at <= now
    }

    /// Advance past `now`, skipping any fires missed while the
    /// scheduler was down.
    fn advance(&mut self, now: DateTime<Utc>) {
        while self.next_fire_at <= now {
            self.next_fire_at += self.interval;
        }
    }
}

/// The schedule this deployment runs: expired-booking cleanup on the
/// configured interval.
pub fn default_schedule(config: &Config, now: DateTime<Utc>) -> Vec<ScheduleEntry> {
    vec![ScheduleEntry::new(
        TaskName::CleanupExpiredBookings,
        config.cleanup_interval,
        now,
    )]
}

/// Time-triggered enqueuer over a static schedule table.
pub struct Scheduler {
    entries: Vec<ScheduleEntry>,
    broker: BrokerClient,
    registry: Arc<Registry>,
}

impl Scheduler {
    /// Build a scheduler, failing fast if an entry names a task with
    /// no registered handler or a zero interval.
    pub fn new(
        entries: Vec<ScheduleEntry>,
        broker: BrokerClient,
        registry: Arc<Registry>,
    ) -> Result<Self, ConfigurationError> {
        registry.validate_schedule(entries.iter().map(|e| e.task_name))?;
        for entry in &entries {
            if entry.interval <= chrono::Duration::zero() {
                return Err(ConfigurationError::ZeroScheduleInterval(entry.task_name));
            }
        }
        Ok(Scheduler {
            entries,
            broker,
            registry,
        })
    }

    /// Run until SIGINT/SIGTERM.
    pub async fn run(mut self) -> Result<()> {
        info!(entries = self.entries.len(), "beat_ready");

        let mut tick = tokio::time::interval(TICK);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let shutdown = shutdown_signal();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("beat_stopping");
                    break;
                }
                _ = tick.tick() => {
                    self.fire_due(Utc::now()).await;
                }
            }
        }

        self.broker.close().await;
        info!("beat_shutdown_complete");
        Ok(())
    }

    /// Enqueue an envelope for every due entry and advance its clock.
    async fn fire_due(&mut self, now: DateTime<Utc>) {
        for entry in &mut self.entries {
            if !entry.is_due(now) {
                continue;
            }

            match self.registry.build_envelope(entry.task_name, vec![]) {
                Ok(envelope) => match self.broker.enqueue(&envelope).await {
                    Ok(task_id) => info!(
                        task = %entry.task_name,
                        task_id = %task_id,
                        "beat_task_fired"
                    ),
                    Err(e) => error!(
                        task = %entry.task_name,
                        error = %e,
                        "beat_enqueue_failed"
                    ),
                },
                // Unreachable after boot validation; log rather than
                // stall the loop.
                Err(e) => error!(task = %entry.task_name, error = %e, "beat_envelope_failed"),
            }

            // Advance even when the enqueue failed: a missed fire is
            // skipped, never replayed.
            entry.advance(now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(now: DateTime<Utc>) -> ScheduleEntry {
        ScheduleEntry::new(TaskName::CleanupExpiredBookings, Duration::from_secs(3600), now)
    }

    #[test]
    fn test_first_fire_is_one_interval_out() {
        let now = Utc::now();
        let entry = entry(now);
        assert!(!entry.is_due(now));
        assert!(entry.is_due(now + chrono::Duration::seconds(3600)));
    }

    #[test]
    fn test_advance_moves_one_interval() {
        let now = Utc::now();
        let mut entry = entry(now);
        let fire_time = now + chrono::Duration::seconds(3600);

        entry.advance(fire_time);
        assert_eq!(entry.next_fire_at, fire_time + chrono::Duration::seconds(3600));
    }

    #[test]
    fn test_missed_fires_are_skipped_not_replayed() {
        let now = Utc::now();
        let mut entry = entry(now);

        // Scheduler was down for five hours.
        let late = now + chrono::Duration::seconds(5 * 3600 + 10);
        assert!(entry.is_due(late));
        entry.advance(late);

        // Next fire lands in the future, one cadence past the missed
        // window; the four skipped fires are not backfilled.
        assert!(entry.next_fire_at > late);
        assert!(entry.next_fire_at <= late + chrono::Duration::seconds(3600));
    }

    #[test]
    fn test_absurd_interval_is_clamped_not_panicking() {
        let now = Utc::now();
        let entry = ScheduleEntry::new(
            TaskName::CleanupExpiredBookings,
            Duration::from_secs(u64::MAX),
            now,
        );

        assert_eq!(entry.interval(), chrono::Duration::days(365));
        assert!(entry.next_fire_at > now);
    }

    #[test]
    fn test_scheduler_rejects_unregistered_task() {
        let registry = Arc::new(Registry::new());
        let broker = BrokerClient::new("amqp://localhost:5672".to_string());
        let result = Scheduler::new(vec![entry(Utc::now())], broker, registry);
        assert!(matches!(
            result.err(),
            Some(ConfigurationError::UnregisteredScheduleTask(
                TaskName::CleanupExpiredBookings
            ))
        ));
    }
}
