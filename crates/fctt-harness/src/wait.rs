//! Bounded polling against a monotonic deadline.
//!
//! Every readiness wait in the harness (socket paths appearing, brokers
//! accepting connections, the notification log changing) goes through
//! [`wait_until`] so that "hang forever" becomes "fail after the bound".

use std::thread;
use std::time::{Duration, Instant};

/// Sleep schedule between two attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStep {
    /// Sleep the same amount after every failed attempt.
    Fixed(Duration),
    /// Double the sleep after every failed attempt, capped at `max`.
    Exponential {
        /// First sleep.
        initial: Duration,
        /// Largest sleep.
        max: Duration,
    },
}

impl PollStep {
    /// Fixed 200 ms step, used for filesystem polling.
    pub const FILESYSTEM: Self = Self::Fixed(Duration::from_millis(200));

    /// Exponential step from 50 ms to 1 s, used for network readiness.
    pub const BACKOFF: Self = Self::Exponential {
        initial: Duration::from_millis(50),
        max: Duration::from_secs(1),
    };

    fn first(self) -> Duration {
        match self {
            Self::Fixed(step) => step,
            Self::Exponential { initial, .. } => initial,
        }
    }

    fn next(self, current: Duration) -> Duration {
        match self {
            Self::Fixed(step) => step,
            Self::Exponential { max, .. } => current.saturating_mul(2).min(max),
        }
    }
}

/// Polls `attempt` until it yields a value or `timeout` elapses.
///
/// The attempt runs at least once, even with a zero timeout. Sleeps never
/// overshoot the deadline; the final attempt happens right at it. Returns
/// `None` once the deadline passes without a value.
pub fn wait_until<T, F>(timeout: Duration, step: PollStep, mut attempt: F) -> Option<T>
where
    F: FnMut() -> Option<T>,
{
    let deadline = Instant::now() + timeout;
    let mut sleep = step.first();
    loop {
        if let Some(value) = attempt() {
            return Some(value);
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return None;
        }
        thread::sleep(sleep.min(remaining));
        sleep = step.next(sleep);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn returns_first_available_value() {
        let mut calls = 0;
        let value = wait_until(Duration::from_secs(1), PollStep::Fixed(Duration::from_millis(1)), || {
            calls += 1;
            (calls == 3).then_some(calls)
        });
        assert_eq!(value, Some(3));
    }

    #[rstest]
    fn zero_timeout_still_attempts_once() {
        let mut calls = 0;
        let value: Option<()> = wait_until(Duration::ZERO, PollStep::FILESYSTEM, || {
            calls += 1;
            None
        });
        assert!(value.is_none());
        assert_eq!(calls, 1);
    }

    #[rstest]
    fn gives_up_near_the_deadline() {
        let started = Instant::now();
        let value: Option<()> = wait_until(Duration::from_millis(120), PollStep::BACKOFF, || None);
        let elapsed = started.elapsed();
        assert!(value.is_none());
        assert!(elapsed >= Duration::from_millis(120));
        assert!(elapsed < Duration::from_secs(1), "overshot deadline: {elapsed:?}");
    }

    #[rstest]
    #[case(Duration::from_millis(50), Duration::from_millis(100))]
    #[case(Duration::from_millis(800), Duration::from_secs(1))]
    #[case(Duration::from_secs(1), Duration::from_secs(1))]
    fn exponential_step_is_capped(#[case] current: Duration, #[case] expected: Duration) {
        assert_eq!(PollStep::BACKOFF.next(current), expected);
    }
}
