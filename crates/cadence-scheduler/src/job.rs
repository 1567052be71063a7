//! Jobs: the units of work a trigger fires.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::TriggerFiredBundle;

/// Free-form data attached to a job and handed to every execution.
pub type JobDataMap = HashMap<String, serde_json::Value>;

/// User code executed when a trigger fires.
///
/// A job reports how it went through its [`JobOutcome`]; panics are caught by
/// the worker and treated as a [`FailureAction::Continue`] failure.
#[async_trait]
pub trait Job: Send + Sync {
    async fn execute(&self, context: &mut JobContext) -> JobOutcome;
}

/// Adapter that turns an async closure into a [`Job`].
struct FnJob<F>(F);

#[async_trait]
impl<F, Fut> Job for FnJob<F>
where
    F: Fn(JobContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = JobOutcome> + Send + 'static,
{
    async fn execute(&self, context: &mut JobContext) -> JobOutcome {
        (self.0)(context.clone()).await
    }
}

/// Build a job from an async closure. The closure gets a copy of the context.
pub fn job_fn<F, Fut>(f: F) -> impl Job
where
    F: Fn(JobContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = JobOutcome> + Send + 'static,
{
    FnJob(f)
}

/// Whether firings of the same job may run at the same time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlapPolicy {
    /// Every firing runs, even if an earlier one is still executing.
    #[default]
    Concurrent,
    /// At most one execution at a time. Other triggers of the job are
    /// blocked until it finishes.
    Exclusive,
}

/// A named job plus its data and behavior flags.
#[derive(Clone)]
pub struct JobDetail {
    name: String,
    data: JobDataMap,
    overlap: OverlapPolicy,
    durable: bool,
    job: Arc<dyn Job>,
}

impl JobDetail {
    pub fn new(name: impl Into<String>, job: impl Job + 'static) -> Self {
        Self::from_arc(name, Arc::new(job))
    }

    pub fn from_arc(name: impl Into<String>, job: Arc<dyn Job>) -> Self {
        Self {
            name: name.into(),
            data: JobDataMap::new(),
            overlap: OverlapPolicy::default(),
            durable: false,
            job,
        }
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn with_overlap_policy(mut self, overlap: OverlapPolicy) -> Self {
        self.overlap = overlap;
        self
    }

    /// Durable jobs stay stored after their last trigger is removed.
    pub fn durable(mut self, durable: bool) -> Self {
        self.durable = durable;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data(&self) -> &JobDataMap {
        &self.data
    }

    pub fn overlap_policy(&self) -> OverlapPolicy {
        self.overlap
    }

    pub fn is_durable(&self) -> bool {
        self.durable
    }

    pub(crate) fn job(&self) -> &Arc<dyn Job> {
        &self.job
    }
}

impl fmt::Debug for JobDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobDetail")
            .field("name", &self.name)
            .field("data", &self.data)
            .field("overlap", &self.overlap)
            .field("durable", &self.durable)
            .finish_non_exhaustive()
    }
}

/// What the scheduler should do about a failed execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureAction {
    /// Keep the trigger scheduled as if the run had succeeded.
    #[default]
    Continue,
    /// Mark the firing trigger complete.
    UnscheduleTrigger,
    /// Mark every trigger of the job complete.
    UnscheduleAllTriggers,
    /// Put the firing trigger in the error state.
    ErrorTrigger,
    /// Put every trigger of the job in the error state.
    ErrorAllTriggers,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFailure {
    pub cause: String,
    pub action: FailureAction,
}

/// Result of one job execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Success,
    /// Run the job again immediately with the same context.
    Retry,
    Failed(JobFailure),
}

impl JobOutcome {
    pub fn failed(cause: impl Into<String>) -> Self {
        Self::failed_with(cause, FailureAction::Continue)
    }

    pub fn failed_with(cause: impl Into<String>, action: FailureAction) -> Self {
        JobOutcome::Failed(JobFailure {
            cause: cause.into(),
            action,
        })
    }

    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Success)
    }
}

impl<E: fmt::Display> From<Result<(), E>> for JobOutcome {
    fn from(result: Result<(), E>) -> Self {
        match result {
            Ok(()) => JobOutcome::Success,
            Err(e) => JobOutcome::failed(e.to_string()),
        }
    }
}

/// Everything a job sees about the firing that started it.
#[derive(Debug, Clone)]
pub struct JobContext {
    job_name: String,
    trigger_name: String,
    data: JobDataMap,
    fire_time: DateTime<Utc>,
    scheduled_fire_time: Option<DateTime<Utc>>,
    previous_fire_time: Option<DateTime<Utc>>,
    next_fire_time: Option<DateTime<Utc>>,
    refire_count: u32,
}

impl JobContext {
    pub(crate) fn from_bundle(bundle: &TriggerFiredBundle) -> Self {
        Self {
            job_name: bundle.job.name().to_string(),
            trigger_name: bundle.trigger.name().to_string(),
            data: bundle.job.data().clone(),
            fire_time: bundle.fire_time,
            scheduled_fire_time: bundle.scheduled_fire_time,
            previous_fire_time: bundle.previous_fire_time,
            next_fire_time: bundle.next_fire_time,
            refire_count: 0,
        }
    }

    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    pub fn trigger_name(&self) -> &str {
        &self.trigger_name
    }

    /// The job's data. Changes are visible to refires of the same firing only.
    pub fn data(&self) -> &JobDataMap {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut JobDataMap {
        &mut self.data
    }

    /// When the firing actually happened.
    pub fn fire_time(&self) -> DateTime<Utc> {
        self.fire_time
    }

    /// When the firing was supposed to happen.
    pub fn scheduled_fire_time(&self) -> Option<DateTime<Utc>> {
        self.scheduled_fire_time
    }

    pub fn previous_fire_time(&self) -> Option<DateTime<Utc>> {
        self.previous_fire_time
    }

    pub fn next_fire_time(&self) -> Option<DateTime<Utc>> {
        self.next_fire_time
    }

    /// How many times this firing has been re-executed after a retry.
    pub fn refire_count(&self) -> u32 {
        self.refire_count
    }

    pub(crate) fn increment_refire_count(&mut self) {
        self.refire_count += 1;
    }
}
