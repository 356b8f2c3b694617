//! Bounded retry-with-pause primitive.
//!
//! Every blocking consumer call in the harness goes through [`PollWait`]. The
//! receive ceiling is defined once here as [`PollWait::RECEIVE`].

use std::{thread, time::Duration};

/// Pause between checks.
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Number of pauses a receive or expect call performs before giving up.
pub const RECEIVE_ATTEMPTS: u32 = 100;

/// Bounded polling policy: check, pause `interval`, retry, at most `attempts` pauses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollWait {
    /// Maximum number of pauses.
    pub attempts: u32,
    /// Length of each pause.
    pub interval: Duration,
}

impl PollWait {
    /// The canonical receive/expect ceiling.
    pub const RECEIVE: Self = Self::new(RECEIVE_ATTEMPTS, POLL_INTERVAL);

    /// Create a policy.
    pub const fn new(attempts: u32, interval: Duration) -> Self {
        Self { attempts, interval }
    }

    /// A policy with `attempts` pauses at the canonical interval.
    pub const fn attempts(attempts: u32) -> Self {
        Self::new(attempts, POLL_INTERVAL)
    }

    /// Longest time a call under this policy can block.
    pub fn max_wait(&self) -> Duration {
        self.interval.saturating_mul(self.attempts)
    }

    /// Probe until it yields a value, sleeping between attempts.
    pub fn run<T>(&self, check: impl FnMut() -> Option<T>) -> Option<T> {
        self.run_with(check, thread::sleep)
    }

    /// Probe until it yields a value, calling `pause(interval)` between attempts.
    ///
    /// `pause` must not return before `interval` has elapsed unless a check
    /// retry can now succeed; otherwise the ceiling would be reached early.
    pub fn run_with<T>(
        &self,
        mut check: impl FnMut() -> Option<T>,
        mut pause: impl FnMut(Duration),
    ) -> Option<T> {
        let mut paused = 0;
        loop {
            if let Some(value) = check() {
                return Some(value);
            }
            if paused >= self.attempts {
                return None;
            }
            pause(self.interval);
            paused += 1;
        }
    }
}

impl Default for PollWait {
    fn default() -> Self {
        Self::RECEIVE
    }
}
