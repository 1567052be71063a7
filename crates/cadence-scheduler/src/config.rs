//! Scheduler configuration.
//!
//! Worker pool size, dispatcher idle timing, misfire tolerance, and what
//! happens to triggers that will never fire again.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::SchedulerError;
use crate::jitter::IdleWait;

/// Configuration for the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Maximum number of jobs executing at once. Defaults to 10.
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,

    /// How long the dispatcher sleeps when nothing is due, and how far ahead
    /// it looks when acquiring. Defaults to 30 seconds.
    #[serde(default = "default_idle_wait_ms")]
    pub idle_wait_ms: u64,

    /// Random amount subtracted from each idle sleep. Defaults to 7 seconds.
    #[serde(default = "default_idle_wait_jitter_ms")]
    pub idle_wait_jitter_ms: u64,

    /// A trigger this late is treated as misfired. Defaults to 5 seconds.
    #[serde(default = "default_misfire_threshold_ms")]
    pub misfire_threshold_ms: u64,

    /// Keep exhausted triggers in the `Complete` state instead of removing them.
    #[serde(default)]
    pub retain_completed_triggers: bool,

    /// How long `drain_workers` waits for running jobs. Defaults to 30 seconds.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

fn default_worker_threads() -> usize {
    10
}

fn default_idle_wait_ms() -> u64 {
    30_000
}

fn default_idle_wait_jitter_ms() -> u64 {
    7_000
}

fn default_misfire_threshold_ms() -> u64 {
    5_000
}

fn default_shutdown_timeout() -> u64 {
    30
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_threads: default_worker_threads(),
            idle_wait_ms: default_idle_wait_ms(),
            idle_wait_jitter_ms: default_idle_wait_jitter_ms(),
            misfire_threshold_ms: default_misfire_threshold_ms(),
            retain_completed_triggers: false,
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

impl SchedulerConfig {
    /// Check that the values can drive a scheduler.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::InvalidConfig` naming the first bad field.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.worker_threads == 0 {
            return Err(SchedulerError::InvalidConfig(
                "worker_threads must be at least 1".to_string(),
            ));
        }
        if self.idle_wait_ms == 0 {
            return Err(SchedulerError::InvalidConfig(
                "idle_wait_ms must be at least 1".to_string(),
            ));
        }
        if self.idle_wait_jitter_ms >= self.idle_wait_ms {
            return Err(SchedulerError::InvalidConfig(format!(
                "idle_wait_jitter_ms ({}) must be less than idle_wait_ms ({})",
                self.idle_wait_jitter_ms, self.idle_wait_ms
            )));
        }
        if self.misfire_threshold_ms == 0 {
            return Err(SchedulerError::InvalidConfig(
                "misfire_threshold_ms must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn idle_wait(&self) -> IdleWait {
        IdleWait::new(
            Duration::from_millis(self.idle_wait_ms),
            Duration::from_millis(self.idle_wait_jitter_ms),
        )
    }

    pub fn misfire_threshold(&self) -> Duration {
        Duration::from_millis(self.misfire_threshold_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}
