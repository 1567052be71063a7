//! Trigger lifecycle states.

use serde::{Deserialize, Serialize};

/// Where a stored trigger is in its lifecycle.
///
/// Only `Waiting` triggers with a next fire time are eligible for acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerState {
    /// Scheduled and eligible for acquisition.
    Waiting,
    /// Reserved by the dispatcher, about to fire.
    Acquired,
    /// Firing an exclusive job that is still running.
    Executing,
    /// Will never fire again, but kept in the store.
    Complete,
    Paused,
    /// An exclusive job is running under another trigger.
    Blocked,
    PausedAndBlocked,
    /// Put aside after a job failure asked for it.
    Error,
}

impl TriggerState {
    /// Terminal states are never left without replacing the trigger.
    pub fn is_terminal(self) -> bool {
        matches!(self, TriggerState::Complete | TriggerState::Error)
    }

    pub fn is_paused(self) -> bool {
        matches!(self, TriggerState::Paused | TriggerState::PausedAndBlocked)
    }
}
