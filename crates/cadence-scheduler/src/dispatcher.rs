//! The dispatcher: one long-running task that takes due triggers out of the
//! store and hands them to the worker pool.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, error, info, trace};

use crate::jitter::IdleWait;
use crate::signal::SchedulerSignal;
use crate::store::Store;
use crate::trigger::Trigger;
use crate::worker::{WorkerPool, WorkerSlot};

/// Whether the dispatcher should be acquiring triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running,
    /// Standby: nothing is acquired, running jobs continue.
    Paused,
    Halted,
}

enum Wait {
    Elapsed,
    Interrupted,
}

/// `from + duration`, saturating at the latest representable instant.
fn offset_by(from: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(duration)
        .ok()
        .and_then(|d| from.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

pub(crate) struct Dispatcher {
    store: Arc<Store>,
    pool: WorkerPool,
    signal: Arc<SchedulerSignal>,
    run_state: watch::Receiver<RunState>,
    idle_wait: IdleWait,
}

impl Dispatcher {
    pub(crate) fn new(
        store: Arc<Store>,
        pool: WorkerPool,
        run_state: watch::Receiver<RunState>,
        idle_wait: IdleWait,
    ) -> Self {
        let signal = store.signal().clone();
        Self {
            store,
            pool,
            signal,
            run_state,
            idle_wait,
        }
    }

    pub(crate) async fn run(mut self) {
        info!(
            workers = self.pool.size(),
            idle_wait_ms = self.idle_wait.base().as_millis() as u64,
            "dispatcher started"
        );
        let mut acquire_failing = false;

        loop {
            if !self.wait_while_paused().await {
                break;
            }

            let slot = tokio::select! {
                biased;
                slot = self.pool.reserve() => slot,
                _ = self.signal.notified() => continue,
            };
            let Some(slot) = slot else {
                error!("worker pool closed, stopping dispatcher");
                break;
            };

            let now = Utc::now();
            self.signal.clear();
            let acquired = match self
                .store
                .acquire_next_trigger(offset_by(now, self.idle_wait.base()))
                .await
            {
                Ok(trigger) => {
                    if acquire_failing {
                        info!("trigger acquisition recovered");
                        acquire_failing = false;
                    }
                    trigger
                }
                Err(e) => {
                    if !acquire_failing {
                        error!(error = %e, "failed to acquire next trigger");
                        acquire_failing = true;
                    }
                    None
                }
            };

            match acquired {
                Some(trigger) => self.fire(trigger, slot).await,
                None => {
                    drop(slot);
                    let idle = self.idle_wait.randomized();
                    trace!(idle_ms = idle.as_millis() as u64, "nothing due, idling");
                    self.wait_until(offset_by(Utc::now(), idle)).await;
                }
            }
        }

        info!("dispatcher halted");
    }

    /// Block while paused. Returns `false` once halted.
    async fn wait_while_paused(&mut self) -> bool {
        match self
            .run_state
            .wait_for(|state| *state != RunState::Paused)
            .await
        {
            Ok(state) => *state == RunState::Running,
            Err(_) => false,
        }
    }

    fn is_running(&self) -> bool {
        *self.run_state.borrow() == RunState::Running
    }

    /// Sleep until `deadline`, cut short by the schedule-changed signal.
    async fn wait_until(&self, deadline: DateTime<Utc>) -> Wait {
        loop {
            if self.signal.is_raised() {
                return Wait::Interrupted;
            }
            let Ok(remaining) = (deadline - Utc::now()).to_std() else {
                return Wait::Elapsed;
            };
            if remaining.is_zero() {
                return Wait::Elapsed;
            }
            tokio::select! {
                _ = tokio::time::sleep(remaining) => {}
                _ = self.signal.notified() => {}
            }
        }
    }

    async fn fire(&self, trigger: Trigger, slot: WorkerSlot) {
        let Some(fire_time) = trigger.next_fire_time() else {
            self.store.release_acquired_trigger(&trigger).await;
            return;
        };

        if let Wait::Interrupted = self.wait_until(fire_time).await {
            debug!(trigger = %trigger.name(), "schedule changed, releasing trigger");
            self.store.release_acquired_trigger(&trigger).await;
            return;
        }
        if !self.is_running() {
            self.store.release_acquired_trigger(&trigger).await;
            return;
        }

        match self.store.trigger_fired(&trigger).await {
            Ok(Some(bundle)) => {
                debug!(
                    trigger = %trigger.name(),
                    job = %bundle.job.name(),
                    scheduled = ?bundle.scheduled_fire_time,
                    "trigger fired"
                );
                self.pool
                    .submit(slot, bundle, self.store.clone(), self.signal.clone());
            }
            Ok(None) => {
                debug!(trigger = %trigger.name(), "trigger no longer eligible");
                self.store.release_acquired_trigger(&trigger).await;
            }
            Err(e) => {
                error!(trigger = %trigger.name(), error = %e, "failed to fire trigger");
                self.store.release_acquired_trigger(&trigger).await;
            }
        }
    }
}
