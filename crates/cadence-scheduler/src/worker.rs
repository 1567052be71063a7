//! Bounded worker pool that runs fired jobs.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::job::{JobContext, JobOutcome};
use crate::signal::SchedulerSignal;
use crate::store::{Store, TriggerFiredBundle};
use crate::trigger::SchedulerInstruction;

/// A reserved worker slot. Dropping it frees the slot.
#[derive(Debug)]
pub(crate) struct WorkerSlot {
    _permit: OwnedSemaphorePermit,
}

/// Fixed-size pool of job executors.
///
/// The dispatcher reserves a slot before acquiring a trigger, so a trigger is
/// never taken out of the store while no worker could run it.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    slots: Arc<Semaphore>,
    tracker: TaskTracker,
    size: usize,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        Self {
            slots: Arc::new(Semaphore::new(size)),
            tracker: TaskTracker::new(),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of slots not currently reserved.
    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }

    /// Wait for a free slot. Returns `None` once the pool is closed.
    pub(crate) async fn reserve(&self) -> Option<WorkerSlot> {
        let permit = self.slots.clone().acquire_owned().await.ok()?;
        Some(WorkerSlot { _permit: permit })
    }

    /// Run a fired trigger's job on a reserved slot.
    pub(crate) fn submit(
        &self,
        slot: WorkerSlot,
        bundle: TriggerFiredBundle,
        store: Arc<Store>,
        signal: Arc<SchedulerSignal>,
    ) {
        self.tracker.spawn(async move {
            run_job(bundle, &store).await;
            drop(slot);
            signal.raise();
        });
    }

    /// Wait for running jobs to finish. Returns `false` if `timeout` elapsed first.
    pub async fn drain(&self, timeout: Duration) -> bool {
        self.tracker.close();
        let drained = tokio::time::timeout(timeout, self.tracker.wait())
            .await
            .is_ok();
        self.tracker.reopen();
        if drained {
            info!("worker pool drained");
        } else {
            warn!(
                running = self.tracker.len(),
                timeout_secs = timeout.as_secs(),
                "timed out waiting for running jobs"
            );
        }
        drained
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Execute a job, re-running it while it asks for a retry, then report the
/// trigger's instruction back to the store.
#[tracing::instrument(skip_all, fields(job = %bundle.job.name(), trigger = %bundle.trigger.name()))]
async fn run_job(bundle: TriggerFiredBundle, store: &Store) {
    let mut context = JobContext::from_bundle(&bundle);
    let job = bundle.job.job().clone();

    loop {
        let started = Instant::now();
        let outcome = match AssertUnwindSafe(job.execute(&mut context))
            .catch_unwind()
            .await
        {
            Ok(outcome) => outcome,
            Err(payload) => {
                let cause = panic_message(payload.as_ref());
                error!(cause = %cause, "job panicked");
                JobOutcome::failed(format!("job panicked: {cause}"))
            }
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        match &outcome {
            JobOutcome::Success => debug!(duration_ms, "job completed"),
            JobOutcome::Retry => {
                info!(refire_count = context.refire_count(), "job asked to be re-executed");
            }
            JobOutcome::Failed(failure) => warn!(
                duration_ms,
                cause = %failure.cause,
                action = ?failure.action,
                "job failed"
            ),
        }

        let instruction = bundle.trigger.execution_complete(&outcome);
        if instruction == SchedulerInstruction::ReExecuteJob {
            context.increment_refire_count();
            continue;
        }

        store
            .triggered_job_complete(&bundle, instruction)
            .await;
        break;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchedulerConfig;
    use crate::job::{FailureAction, JobDetail, job_fn};
    use crate::state::TriggerState;
    use crate::trigger::{RepeatCount, Trigger};
    use chrono::Utc;
    use std::sync::atomic::{AtomicU32, Ordering};

    async fn fire(store: &Store, job: JobDetail, trigger: Trigger) -> TriggerFiredBundle {
        store.store_job_and_trigger(job, trigger).await.unwrap();
        let now = Utc::now();
        let acquired = store
            .acquire_next_trigger_at(now, now)
            .await
            .unwrap()
            .unwrap();
        store.trigger_fired(&acquired).await.unwrap().unwrap()
    }

    fn repeating(name: &str, job: &str) -> Trigger {
        Trigger::repeating(name, Utc::now(), Duration::from_secs(60), RepeatCount::Indefinitely)
            .for_job(job)
    }

    #[tokio::test]
    async fn test_retry_refires_with_same_context() {
        let store = Store::new(&SchedulerConfig::default());
        let job = JobDetail::new(
            "flaky",
            job_fn(|ctx| async move {
                if ctx.refire_count() < 2 {
                    JobOutcome::Retry
                } else {
                    JobOutcome::Success
                }
            }),
        );
        let bundle = fire(&store, job, repeating("t", "flaky")).await;

        run_job(bundle, &store).await;
        assert_eq!(store.trigger_state("t").await, Some(TriggerState::Waiting));
    }

    #[tokio::test]
    async fn test_panic_is_a_failure() {
        let store = Store::new(&SchedulerConfig::default());
        let job = JobDetail::new(
            "boom",
            job_fn(|ctx| async move {
                if ctx.refire_count() == 0 {
                    panic!("kaboom");
                }
                JobOutcome::Success
            }),
        );
        let bundle = fire(&store, job, repeating("t", "boom")).await;

        run_job(bundle, &store).await;
        // A plain failure keeps the trigger scheduled.
        assert_eq!(store.trigger_state("t").await, Some(TriggerState::Waiting));
    }

    #[tokio::test]
    async fn test_failure_action_reaches_store() {
        let store = Store::new(&SchedulerConfig::default());
        let job = JobDetail::new(
            "bad",
            job_fn(|_ctx| async {
                JobOutcome::failed_with("bad input", FailureAction::ErrorTrigger)
            }),
        );
        let bundle = fire(&store, job, repeating("t", "bad")).await;

        run_job(bundle, &store).await;
        assert_eq!(store.trigger_state("t").await, Some(TriggerState::Error));
    }

    #[tokio::test]
    async fn test_submit_frees_slot_and_signals() {
        let store = Arc::new(Store::new(&SchedulerConfig::default()));
        let pool = WorkerPool::new(1);
        let runs = Arc::new(AtomicU32::new(0));
        let counter = runs.clone();
        let job = JobDetail::new(
            "count",
            job_fn(move |_ctx| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    JobOutcome::Success
                }
            }),
        );
        let bundle = fire(&store, job, repeating("t", "count")).await;

        let slot = pool.reserve().await.unwrap();
        assert_eq!(pool.available(), 0);
        store.signal().clear();
        pool.submit(slot, bundle, store.clone(), store.signal().clone());

        assert!(pool.drain(Duration::from_secs(5)).await);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(pool.available(), 1);
        assert!(store.signal().is_raised());
    }

    #[tokio::test]
    async fn test_drain_times_out_on_stuck_job() {
        let store = Arc::new(Store::new(&SchedulerConfig::default()));
        let pool = WorkerPool::new(1);
        let job = JobDetail::new(
            "stuck",
            job_fn(|_ctx| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                JobOutcome::Success
            }),
        );
        let bundle = fire(&store, job, repeating("t", "stuck")).await;

        let slot = pool.reserve().await.unwrap();
        pool.submit(slot, bundle, store.clone(), store.signal().clone());
        assert!(!pool.drain(Duration::from_millis(50)).await);
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("static message");
        assert_eq!(panic_message(payload.as_ref()), "static message");
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");
        let payload: Box<dyn Any + Send> = Box::new(42);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }
}
