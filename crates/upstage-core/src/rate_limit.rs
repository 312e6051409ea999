//! Minimum-spacing rate limiting for upload operations.
//!
//! The decision is a pure function of the previous window and the clock so the
//! Postgres upsert and the in-memory store apply identical rules. Only accepted
//! creations produce a new window; callers persist it atomically with the creation.

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Limits applied per (tenant, operation).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    /// Minimum time between two accepted creations
    pub min_spacing: Duration,
    /// Length of the counting window
    pub window: Duration,
    /// Maximum accepted attempts per window
    pub max_in_window: u32,
}

/// Durable state for one (tenant, operation) key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitWindow {
    pub last_allowed_at: DateTime<Utc>,
    pub window_started_at: DateTime<Utc>,
    pub count_in_window: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Accepted; the caller must persist the returned window with the creation.
    Allowed(RateLimitWindow),
    Denied { retry_after: Duration },
}

fn elapsed(since: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    // clock skew between instances yields a negative delta; treat it as zero
    (now - since).to_std().unwrap_or(Duration::ZERO)
}

impl RateLimitPolicy {
    pub fn admit(&self, previous: Option<&RateLimitWindow>, now: DateTime<Utc>) -> Admission {
        let fresh_window = RateLimitWindow {
            last_allowed_at: now,
            window_started_at: now,
            count_in_window: 1,
        };

        let Some(prev) = previous else {
            return Admission::Allowed(fresh_window);
        };

        let since_last = elapsed(prev.last_allowed_at, now);
        if since_last < self.min_spacing {
            return Admission::Denied {
                retry_after: self.min_spacing - since_last,
            };
        }

        let window_age = elapsed(prev.window_started_at, now);
        if window_age >= self.window {
            return Admission::Allowed(fresh_window);
        }

        if prev.count_in_window >= self.max_in_window {
            return Admission::Denied {
                retry_after: self.window - window_age,
            };
        }

        Admission::Allowed(RateLimitWindow {
            last_allowed_at: now,
            window_started_at: prev.window_started_at,
            count_in_window: prev.count_in_window + 1,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn policy() -> RateLimitPolicy {
        RateLimitPolicy {
            min_spacing: Duration::from_millis(250),
            window: Duration::from_secs(60),
            max_in_window: 3,
        }
    }

    fn allowed(admission: Admission) -> RateLimitWindow {
        match admission {
            Admission::Allowed(window) => window,
            Admission::Denied { retry_after } => panic!("denied, retry after {:?}", retry_after),
        }
    }

    #[test]
    fn first_attempt_opens_window() {
        let now = Utc::now();
        let window = allowed(policy().admit(None, now));
        assert_eq!(window.count_in_window, 1);
        assert_eq!(window.last_allowed_at, now);
    }

    #[test]
    fn attempt_inside_spacing_is_denied_with_remaining_wait() {
        let t0 = Utc::now();
        let window = allowed(policy().admit(None, t0));

        let t1 = t0 + TimeDelta::milliseconds(100);
        match policy().admit(Some(&window), t1) {
            Admission::Denied { retry_after } => {
                assert_eq!(retry_after, Duration::from_millis(150))
            }
            other => panic!("expected denial, got {:?}", other),
        }
    }

    #[test]
    fn attempt_after_spacing_increments_count() {
        let t0 = Utc::now();
        let window = allowed(policy().admit(None, t0));

        let t1 = t0 + TimeDelta::milliseconds(300);
        let next = allowed(policy().admit(Some(&window), t1));
        assert_eq!(next.count_in_window, 2);
        assert_eq!(next.window_started_at, t0);
        assert_eq!(next.last_allowed_at, t1);
    }

    #[test]
    fn window_maximum_is_enforced_until_window_rolls_over() {
        let t0 = Utc::now();
        let mut window = allowed(policy().admit(None, t0));
        for i in 1..3 {
            window = allowed(policy().admit(Some(&window), t0 + TimeDelta::seconds(i)));
        }
        assert_eq!(window.count_in_window, 3);

        let t_full = t0 + TimeDelta::seconds(10);
        assert!(matches!(
            policy().admit(Some(&window), t_full),
            Admission::Denied { retry_after } if retry_after == Duration::from_secs(50)
        ));

        let t_next = t0 + TimeDelta::seconds(61);
        let rolled = allowed(policy().admit(Some(&window), t_next));
        assert_eq!(rolled.count_in_window, 1);
        assert_eq!(rolled.window_started_at, t_next);
    }

    #[test]
    fn clock_skew_counts_as_no_time_elapsed() {
        let t0 = Utc::now();
        let window = allowed(policy().admit(None, t0));
        let earlier = t0 - TimeDelta::seconds(5);
        assert!(matches!(
            policy().admit(Some(&window), earlier),
            Admission::Denied { retry_after } if retry_after == Duration::from_millis(250)
        ));
    }
}
