//! Randomized idle wait for the dispatcher.
//!
//! When no trigger is due, the dispatcher sleeps for the idle wait minus a
//! random amount, so that several schedulers started together do not poll in
//! lockstep.

use std::time::Duration;

use rand::Rng;

/// Idle wait with a random variance subtracted on every use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdleWait {
    base: Duration,
    variance: Duration,
}

impl IdleWait {
    /// `variance` is clamped to `base`.
    pub fn new(base: Duration, variance: Duration) -> Self {
        Self {
            base,
            variance: variance.min(base),
        }
    }

    /// The un-jittered wait. Used as the acquisition look-ahead window.
    pub fn base(&self) -> Duration {
        self.base
    }

    /// A wait in `(base - variance, base]`.
    pub fn randomized(&self) -> Duration {
        let variance_ms = self.variance.as_millis() as u64;
        if variance_ms == 0 {
            return self.base;
        }
        let jitter_ms = rand::thread_rng().gen_range(0..variance_ms);
        self.base.saturating_sub(Duration::from_millis(jitter_ms))
    }
}
