//! The scheduler facade: lifecycle control plus convenience scheduling calls.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::SchedulerError;
use crate::config::SchedulerConfig;
use crate::dispatcher::{Dispatcher, RunState};
use crate::job::JobDetail;
use crate::state::TriggerState;
use crate::store::Store;
use crate::trigger::{RepeatCount, Trigger};
use crate::worker::WorkerPool;

/// Prefix of the trigger name generated by the `add_scheduled_*` calls.
pub const TRIGGER_NAME_PREFIX: &str = "Trigger_";

/// In-process job scheduler.
///
/// Owns the store, the worker pool, and the dispatcher task. Jobs can be
/// scheduled before or after [`start`](Self::start).
pub struct Scheduler {
    config: SchedulerConfig,
    store: Arc<Store>,
    pool: WorkerPool,
    run_state: watch::Sender<RunState>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    /// Create a stopped scheduler.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::InvalidConfig` if the configuration is unusable.
    pub fn new(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        config.validate()?;
        let store = Arc::new(Store::new(&config));
        let pool = WorkerPool::new(config.worker_threads);
        let (run_state, _) = watch::channel(RunState::Halted);
        Ok(Self {
            config,
            store,
            pool,
            run_state,
            dispatcher: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// The underlying store, for lower-level job and trigger management.
    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn worker_pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Start the dispatcher. A scheduler paused before starting stays paused.
    #[tracing::instrument(skip(self))]
    pub async fn start(&self) -> Result<(), SchedulerError> {
        let mut dispatcher = self.dispatcher.lock().await;
        if dispatcher.is_some() {
            return Err(SchedulerError::AlreadyRunning);
        }

        self.run_state.send_if_modified(|state| {
            if *state == RunState::Halted {
                *state = RunState::Running;
                true
            } else {
                false
            }
        });

        let task = Dispatcher::new(
            self.store.clone(),
            self.pool.clone(),
            self.run_state.subscribe(),
            self.config.idle_wait(),
        );
        *dispatcher = Some(tokio::spawn(task.run()));
        info!(workers = self.config.worker_threads, "scheduler started");
        Ok(())
    }

    /// Stop the dispatcher and wait for it to exit.
    ///
    /// Jobs already running are not waited for; see
    /// [`drain_workers`](Self::drain_workers).
    #[tracing::instrument(skip(self))]
    pub async fn shutdown(&self) -> Result<(), SchedulerError> {
        let Some(handle) = self.dispatcher.lock().await.take() else {
            return Err(SchedulerError::NotRunning);
        };

        self.run_state.send_replace(RunState::Halted);
        self.store.signal().raise();
        if let Err(e) = handle.await {
            error!(error = %e, "dispatcher task failed");
        }
        info!("scheduler shut down");
        Ok(())
    }

    /// Wait up to the configured shutdown timeout for running jobs.
    /// Returns `false` if some were still running.
    pub async fn drain_workers(&self) -> bool {
        self.pool.drain(self.config.shutdown_timeout()).await
    }

    /// Stop acquiring triggers. Running jobs are unaffected.
    pub fn pause(&self) {
        let changed = self.run_state.send_if_modified(|state| {
            if *state != RunState::Paused {
                *state = RunState::Paused;
                true
            } else {
                false
            }
        });
        if changed {
            self.store.signal().raise();
            info!("scheduler paused");
        }
    }

    pub fn resume(&self) {
        let changed = self.run_state.send_if_modified(|state| {
            if *state == RunState::Paused {
                *state = RunState::Running;
                true
            } else {
                false
            }
        });
        if changed {
            info!("scheduler resumed");
        }
    }

    pub fn run_state(&self) -> RunState {
        *self.run_state.borrow()
    }

    /// Whether the dispatcher is started and not halted. A paused scheduler
    /// still counts as running.
    pub async fn is_running(&self) -> bool {
        self.dispatcher.lock().await.is_some() && self.run_state() != RunState::Halted
    }

    /// Schedule `job` with `trigger`, returning the first fire time.
    ///
    /// A trigger without a job name is attached to `job`.
    ///
    /// # Errors
    ///
    /// Fails if the trigger is invalid or never fires, or if the job or
    /// trigger name is taken.
    #[tracing::instrument(skip_all, fields(job = %job.name(), trigger = %trigger.name()))]
    pub async fn schedule_job(
        &self,
        job: JobDetail,
        mut trigger: Trigger,
    ) -> Result<DateTime<Utc>, SchedulerError> {
        if trigger.job_name().is_none() {
            trigger.set_job_name(job.name());
        }
        trigger.validate()?;
        let Some(first_fire_time) = trigger.compute_first_fire_time() else {
            return Err(SchedulerError::NeverFires(trigger.name().to_string()));
        };

        self.store.store_job_and_trigger(job, trigger).await?;
        info!(first_fire_time = %first_fire_time, "job scheduled");
        Ok(first_fire_time)
    }

    /// Run `job` now and then every `interval`, forever.
    pub async fn add_scheduled_job(
        &self,
        interval: Duration,
        job: JobDetail,
    ) -> Result<String, SchedulerError> {
        self.add_scheduled_job_with_repeat(interval, RepeatCount::Indefinitely, job)
            .await
    }

    /// Run `job` now and then every `interval`, repeating `repeat_count` times.
    pub async fn add_scheduled_job_with_repeat(
        &self,
        interval: Duration,
        repeat_count: impl Into<RepeatCount>,
        job: JobDetail,
    ) -> Result<String, SchedulerError> {
        let name = job.name().to_string();
        let trigger = Trigger::repeating(trigger_name(&name), Utc::now(), interval, repeat_count);
        self.schedule_job(job, trigger).await?;
        Ok(name)
    }

    /// Run `job` once, after `delay`.
    pub async fn add_scheduled_once_job(
        &self,
        delay: Duration,
        job: JobDetail,
    ) -> Result<String, SchedulerError> {
        let at = chrono::Duration::from_std(delay)
            .ok()
            .and_then(|delay| Utc::now().checked_add_signed(delay))
            .ok_or_else(|| {
                SchedulerError::invalid_trigger(&trigger_name(job.name()), "delay is out of range")
            })?;
        self.add_scheduled_once_job_at(at, job).await
    }

    /// Run `job` once, at `at`.
    pub async fn add_scheduled_once_job_at(
        &self,
        at: DateTime<Utc>,
        job: JobDetail,
    ) -> Result<String, SchedulerError> {
        let name = job.name().to_string();
        let trigger = Trigger::new(trigger_name(&name), at);
        self.schedule_job(job, trigger).await?;
        Ok(name)
    }

    /// Remove a job and its triggers. Returns `false` if no such job is stored,
    /// which includes one-shot jobs that already ran and were reaped.
    #[tracing::instrument(skip(self))]
    pub async fn remove_scheduled_job(&self, name: &str) -> bool {
        let removed = self.store.remove_job(name).await;
        if removed {
            info!("job removed");
        }
        removed
    }

    pub async fn scheduled_job_names(&self) -> Vec<String> {
        self.store.job_names().await
    }

    pub async fn pause_job(&self, name: &str) -> Result<(), SchedulerError> {
        if self.store.pause_job(name).await {
            Ok(())
        } else {
            Err(SchedulerError::JobNotFound(name.to_string()))
        }
    }

    pub async fn resume_job(&self, name: &str) -> Result<(), SchedulerError> {
        if self.store.resume_job(name).await {
            Ok(())
        } else {
            Err(SchedulerError::JobNotFound(name.to_string()))
        }
    }

    pub async fn pause_trigger(&self, name: &str) -> Result<(), SchedulerError> {
        if self.store.pause_trigger(name).await {
            Ok(())
        } else {
            Err(SchedulerError::TriggerNotFound(name.to_string()))
        }
    }

    pub async fn resume_trigger(&self, name: &str) -> Result<(), SchedulerError> {
        if self.store.resume_trigger(name).await {
            Ok(())
        } else {
            Err(SchedulerError::TriggerNotFound(name.to_string()))
        }
    }

    pub async fn trigger_state(&self, name: &str) -> Option<TriggerState> {
        self.store.trigger_state(name).await
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.run_state.send_replace(RunState::Halted);
        self.store.signal().raise();
    }
}

/// Name of the trigger generated for a job by the `add_scheduled_*` calls.
pub fn trigger_name(job_name: &str) -> String {
    format!("{TRIGGER_NAME_PREFIX}{job_name}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobOutcome, job_fn};

    fn noop(name: &str) -> JobDetail {
        JobDetail::new(name, job_fn(|_ctx| async { JobOutcome::Success }))
    }

    fn quiet_config() -> SchedulerConfig {
        SchedulerConfig {
            idle_wait_ms: 1_000,
            idle_wait_jitter_ms: 0,
            ..Default::default()
        }
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = SchedulerConfig {
            worker_threads: 0,
            ..Default::default()
        };
        assert!(matches!(
            Scheduler::new(config),
            Err(SchedulerError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let scheduler = Scheduler::new(quiet_config()).unwrap();
        scheduler.start().await.unwrap();
        assert!(scheduler.is_running().await);
        assert!(matches!(
            scheduler.start().await,
            Err(SchedulerError::AlreadyRunning)
        ));
        scheduler.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_when_stopped_fails() {
        let scheduler = Scheduler::new(quiet_config()).unwrap();
        assert!(matches!(
            scheduler.shutdown().await,
            Err(SchedulerError::NotRunning)
        ));
    }

    #[tokio::test]
    async fn test_restart_after_shutdown() {
        let scheduler = Scheduler::new(quiet_config()).unwrap();
        scheduler.start().await.unwrap();
        scheduler.shutdown().await.unwrap();
        assert!(!scheduler.is_running().await);
        scheduler.start().await.unwrap();
        assert_eq!(scheduler.run_state(), RunState::Running);
        scheduler.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_pause_before_start_is_kept() {
        let scheduler = Scheduler::new(quiet_config()).unwrap();
        scheduler.pause();
        assert!(!scheduler.is_running().await);
        scheduler.start().await.unwrap();
        assert_eq!(scheduler.run_state(), RunState::Paused);
        assert!(scheduler.is_running().await);
        scheduler.resume();
        assert_eq!(scheduler.run_state(), RunState::Running);
        scheduler.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_add_scheduled_job_names_trigger() {
        let scheduler = Scheduler::new(quiet_config()).unwrap();
        let name = scheduler
            .add_scheduled_job(Duration::from_secs(60), noop("report"))
            .await
            .unwrap();

        assert_eq!(name, "report");
        assert_eq!(trigger_name(&name), "Trigger_report");
        assert_eq!(
            scheduler.trigger_state("Trigger_report").await,
            Some(TriggerState::Waiting)
        );
        assert_eq!(scheduler.scheduled_job_names().await, vec!["report".to_string()]);
    }

    #[tokio::test]
    async fn test_duplicate_job_name_rejected() {
        let scheduler = Scheduler::new(quiet_config()).unwrap();
        scheduler
            .add_scheduled_once_job(Duration::from_secs(60), noop("once"))
            .await
            .unwrap();
        assert!(matches!(
            scheduler
                .add_scheduled_once_job(Duration::from_secs(60), noop("once"))
                .await,
            Err(SchedulerError::DuplicateJob(_))
        ));
    }

    #[tokio::test]
    async fn test_schedule_job_fills_job_name_and_returns_first_fire() {
        let scheduler = Scheduler::new(quiet_config()).unwrap();
        let at = Utc::now() + chrono::Duration::seconds(60);
        let first = scheduler
            .schedule_job(noop("a"), Trigger::new("custom", at))
            .await
            .unwrap();

        assert_eq!(first, at);
        let trigger = scheduler.store().retrieve_trigger("custom").await.unwrap();
        assert_eq!(trigger.job_name(), Some("a"));
    }

    #[tokio::test]
    async fn test_schedule_job_rejects_invalid_trigger() {
        let scheduler = Scheduler::new(quiet_config()).unwrap();
        let now = Utc::now();
        let trigger = Trigger::new("bad", now).with_end_time(now - chrono::Duration::seconds(1));
        assert!(matches!(
            scheduler.schedule_job(noop("a"), trigger).await,
            Err(SchedulerError::InvalidTrigger { .. })
        ));
        assert!(scheduler.scheduled_job_names().await.is_empty());
    }

    #[tokio::test]
    async fn test_pause_unknown_job_fails() {
        let scheduler = Scheduler::new(quiet_config()).unwrap();
        assert!(matches!(
            scheduler.pause_job("ghost").await,
            Err(SchedulerError::JobNotFound(_))
        ));
        assert!(matches!(
            scheduler.resume_trigger("ghost").await,
            Err(SchedulerError::TriggerNotFound(_))
        ));
    }
}
