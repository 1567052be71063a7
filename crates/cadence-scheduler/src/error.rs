//! Error types for the scheduler.

use thiserror::Error;

/// Errors that can occur in scheduler operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// A job with this name is already stored.
    #[error("job already exists: {0}")]
    DuplicateJob(String),

    /// A trigger with this name is already stored.
    #[error("trigger already exists: {0}")]
    DuplicateTrigger(String),

    /// The trigger references a job that is not stored.
    #[error("trigger {trigger} references unknown job: {job}")]
    UnresolvedJob { trigger: String, job: String },

    /// Job not found.
    #[error("job not found: {0}")]
    JobNotFound(String),

    /// Trigger not found.
    #[error("trigger not found: {0}")]
    TriggerNotFound(String),

    /// The trigger's bounds are inconsistent.
    #[error("invalid trigger {trigger}: {reason}")]
    InvalidTrigger { trigger: String, reason: String },

    /// Based on its configuration, the trigger has no first fire time.
    #[error("trigger {0} will never fire")]
    NeverFires(String),

    /// Invalid scheduler configuration.
    #[error("invalid scheduler configuration: {0}")]
    InvalidConfig(String),

    /// The working set and the trigger index disagree.
    #[error("store inconsistency: {0}")]
    Inconsistent(String),

    /// Scheduler is already running.
    #[error("scheduler is already running")]
    AlreadyRunning,

    /// Scheduler is not running.
    #[error("scheduler is not running")]
    NotRunning,
}

impl SchedulerError {
    pub(crate) fn invalid_trigger(trigger: &str, reason: impl Into<String>) -> Self {
        SchedulerError::InvalidTrigger {
            trigger: trigger.to_string(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SchedulerError::DuplicateJob("heartbeat".to_string());
        assert!(err.to_string().contains("already exists"));

        let err = SchedulerError::UnresolvedJob {
            trigger: "Trigger_a".to_string(),
            job: "a".to_string(),
        };
        assert!(err.to_string().contains("unknown job: a"));

        let err = SchedulerError::invalid_trigger("t", "end time before start time");
        assert_eq!(
            err.to_string(),
            "invalid trigger t: end time before start time"
        );

        let err = SchedulerError::NeverFires("t".to_string());
        assert!(err.to_string().contains("never fire"));

        let err = SchedulerError::AlreadyRunning;
        assert!(err.to_string().contains("already running"));

        let err = SchedulerError::NotRunning;
        assert!(err.to_string().contains("not running"));
    }
}
