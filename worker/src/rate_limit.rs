//! Per-task dispatch rate limiting.
//!
//! Each rate-limited task name gets a token bucket shared by every
//! worker slot in the process. The bucket holds a single token and
//! refills at the configured rate, so dispatches are spaced evenly:
//! "50/m" yields at most 50 executions in any rolling 60-second
//! window. An attempt that finds the bucket empty is deferred, never
//! dropped: the consumer re-enqueues it after the reported delay.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

use crate::task::TaskName;

/// A rate expression: `count` dispatches per `per` window.
///
/// Parsed from the usual shorthand: "50/m", "10/s", "100/h".
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimit {
    pub count: u32,
    pub per: Duration,
}

impl RateLimit {
    pub fn per_second(count: u32) -> Self {
        RateLimit {
            count,
            per: Duration::from_secs(1),
        }
    }

    pub fn per_minute(count: u32) -> Self {
        RateLimit {
            count,
            per: Duration::from_secs(60),
        }
    }

    pub fn per_hour(count: u32) -> Self {
        RateLimit {
            count,
            per: Duration::from_secs(3600),
        }
    }

    fn tokens_per_sec(&self) -> f64 {
        f64::from(self.count) / self.per.as_secs_f64()
    }
}

impl FromStr for RateLimit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (count, unit) = s
            .split_once('/')
            .ok_or_else(|| format!("expected <count>/<unit>, got {s:?}"))?;
        let count: u32 = count
            .trim()
            .parse()
            .map_err(|_| format!("invalid count in rate {s:?}"))?;
        if count == 0 {
            return Err(format!("rate count must be positive in {s:?}"));
        }
        match unit.trim() {
            "s" => Ok(RateLimit::per_second(count)),
            "m" => Ok(RateLimit::per_minute(count)),
            "h" => Ok(RateLimit::per_hour(count)),
            other => Err(format!("unknown rate unit {other:?}")),
        }
    }
}

/// The limiter's verdict for one dispatch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RateDecision {
    Proceed,
    /// Re-enqueue unchanged after this delay.
    Defer(Duration),
}

struct Bucket {
    tokens: f64,
    tokens_per_sec: f64,
    last_refill: Instant,
}

impl Bucket {
    fn new(limit: RateLimit, now: Instant) -> Self {
        Bucket {
            tokens: 1.0,
            tokens_per_sec: limit.tokens_per_sec(),
            last_refill: now,
        }
    }

    fn try_take(&mut self, now: Instant) -> Option<Duration> {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.tokens_per_sec).min(1.0);
        self.last_refill = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            None
        } else {
            Some(Duration::from_secs_f64(
                (1.0 - self.tokens) / self.tokens_per_sec,
            ))
        }
    }
}

/// Shared token buckets, one per rate-limited task name.
#[derive(Default)]
pub struct RateLimiter {
    buckets: Mutex<HashMap<TaskName, Bucket>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a dispatch token for `name`, or report how long to defer.
    /// Tasks without a limit always proceed.
    pub fn try_acquire(&self, name: TaskName, limit: Option<RateLimit>) -> RateDecision {
        let Some(limit) = limit else {
            return RateDecision::Proceed;
        };

        let now = Instant::now();
        let mut buckets = match self.buckets.lock() {
            Ok(buckets) => buckets,
            // A poisoned lock means another slot panicked mid-take;
            // letting the dispatch through beats wedging the worker.
            Err(poisoned) => poisoned.into_inner(),
        };
        let bucket = buckets
            .entry(name)
            .or_insert_with(|| Bucket::new(limit, now));

        match bucket.try_take(now) {
            None => RateDecision::Proceed,
            Some(wait) => RateDecision::Defer(wait),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NAME: TaskName = TaskName::SendBookingConfirmationEmail;

    #[test]
    fn test_parse_rate_expressions() {
        assert_eq!("50/m".parse::<RateLimit>().unwrap(), RateLimit::per_minute(50));
        assert_eq!("10/s".parse::<RateLimit>().unwrap(), RateLimit::per_second(10));
        assert_eq!("100/h".parse::<RateLimit>().unwrap(), RateLimit::per_hour(100));
        assert!("50".parse::<RateLimit>().is_err());
        assert!("0/m".parse::<RateLimit>().is_err());
        assert!("50/w".parse::<RateLimit>().is_err());
    }

    #[test]
    fn test_unlimited_task_always_proceeds() {
        let limiter = RateLimiter::new();
        for _ in 0..1000 {
            assert_eq!(limiter.try_acquire(NAME, None), RateDecision::Proceed);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_is_deferred() {
        let limiter = RateLimiter::new();
        let limit = Some(RateLimit::per_minute(50));

        let mut proceeded = 0;
        for _ in 0..100 {
            if limiter.try_acquire(NAME, limit) == RateDecision::Proceed {
                proceeded += 1;
            }
        }
        // One token available immediately; the rest must wait.
        assert_eq!(proceeded, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rolling_window_bound() {
        let limiter = RateLimiter::new();
        let limit = Some(RateLimit::per_minute(50));

        // 100 ready envelopes hammering the limiter for 60 seconds.
        let mut executed = 0;
        for _ in 0..600 {
            for _ in 0..100 {
                if limiter.try_acquire(NAME, limit) == RateDecision::Proceed {
                    executed += 1;
                }
            }
            tokio::time::advance(Duration::from_millis(100)).await;
        }
        assert!(executed <= 50, "executed {executed} dispatches in 60s");
        // Even spacing should get close to the limit, not starve.
        assert!(executed >= 49, "executed only {executed} dispatches in 60s");
    }

    #[tokio::test(start_paused = true)]
    async fn test_defer_reports_time_until_next_token() {
        let limiter = RateLimiter::new();
        let limit = Some(RateLimit::per_second(1));

        assert_eq!(limiter.try_acquire(NAME, limit), RateDecision::Proceed);
        match limiter.try_acquire(NAME, limit) {
            RateDecision::Defer(wait) => {
                assert!(wait <= Duration::from_secs(1));
                assert!(wait > Duration::from_millis(900));
            }
            RateDecision::Proceed => panic!("second dispatch should defer"),
        }

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(limiter.try_acquire(NAME, limit), RateDecision::Proceed);
    }
}
