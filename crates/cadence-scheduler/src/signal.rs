//! The "schedule changed" signal between the store, workers and dispatcher.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;
use tokio::sync::futures::Notified;

/// A sticky flag plus a wakeup.
///
/// The flag is the source of truth: a waiter that missed a notification still
/// sees the flag raised on its next check.
#[derive(Debug, Default)]
pub(crate) struct SchedulerSignal {
    raised: AtomicBool,
    notify: Notify,
}

impl SchedulerSignal {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Mark the schedule as changed and wake the dispatcher.
    pub(crate) fn raise(&self) {
        self.raised.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    pub(crate) fn clear(&self) {
        self.raised.store(false, Ordering::SeqCst);
    }

    pub(crate) fn is_raised(&self) -> bool {
        self.raised.load(Ordering::SeqCst)
    }

    pub(crate) fn notified(&self) -> Notified<'_> {
        self.notify.notified()
    }
}
