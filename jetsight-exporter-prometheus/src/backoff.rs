//! Pacing of reconnect attempts to the telemetry daemon.

use std::time::{Duration, Instant};

use crate::config::ReconnectConfig;

/// Exponential wait between failed reconnects, reset on success.
#[derive(Debug)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    failures: u32,
    not_before: Option<Instant>,
}

impl Backoff {
    pub fn new(config: &ReconnectConfig) -> Self {
        let initial = Duration::from_millis(config.initial_backoff_ms.max(1));
        let max = Duration::from_millis(config.max_backoff_ms).max(initial);

        Self {
            initial,
            max,
            failures: 0,
            not_before: None,
        }
    }

    /// Whether a reconnect attempt may start at `now`.
    pub fn is_due(&self, now: Instant) -> bool {
        self.not_before.is_none_or(|at| now >= at)
    }

    /// Record a failed attempt made at `now` and return the wait it imposes.
    pub fn record_failure(&mut self, now: Instant) -> Duration {
        self.failures = self.failures.saturating_add(1);
        let wait = self.wait_after(self.failures);
        self.not_before = Some(now + wait);
        wait
    }

    /// Forget the failure streak after a successful reconnect.
    pub fn reset(&mut self) {
        self.failures = 0;
        self.not_before = None;
    }

    /// Consecutive failed attempts since the last reset.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    fn wait_after(&self, failures: u32) -> Duration {
        let factor = 1u32
            .checked_shl(failures.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.initial.saturating_mul(factor).min(self.max)
    }
}
