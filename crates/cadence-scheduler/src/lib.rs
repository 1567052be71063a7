//! In-process job scheduler for Cadence.
//!
//! This crate provides a trigger-driven scheduler that:
//! - Fires jobs from simple triggers (start time, fixed interval, repeat
//!   count, optional end time)
//! - Corrects misfired triggers according to a per-trigger policy
//! - Runs jobs on a bounded worker pool, optionally one at a time per job
//! - Keeps all state in memory; nothing survives a restart
//!
//! ```no_run
//! use std::time::Duration;
//! use cadence_scheduler::{JobDetail, JobOutcome, Scheduler, SchedulerConfig, job_fn};
//!
//! # async fn demo() -> Result<(), cadence_scheduler::SchedulerError> {
//! let scheduler = Scheduler::new(SchedulerConfig::default())?;
//! scheduler
//!     .add_scheduled_job(
//!         Duration::from_secs(60),
//!         JobDetail::new("report", job_fn(|_ctx| async { JobOutcome::Success })),
//!     )
//!     .await?;
//! scheduler.start().await?;
//! # Ok(())
//! # }
//! ```

mod config;
mod dispatcher;
mod error;
mod jitter;
mod job;
mod scheduler;
mod signal;
mod state;
mod store;
mod trigger;
mod worker;

pub use config::SchedulerConfig;
pub use dispatcher::RunState;
pub use error::SchedulerError;
pub use jitter::IdleWait;
pub use job::{
    FailureAction, Job, JobContext, JobDataMap, JobDetail, JobFailure, JobOutcome, OverlapPolicy,
    job_fn,
};
pub use scheduler::{Scheduler, TRIGGER_NAME_PREFIX, trigger_name};
pub use state::TriggerState;
pub use store::{Store, TriggerFiredBundle, TriggerSummary};
pub use trigger::{
    DEFAULT_PRIORITY, MisfireInstruction, RepeatCount, SchedulerInstruction, Trigger,
};
pub use worker::WorkerPool;
