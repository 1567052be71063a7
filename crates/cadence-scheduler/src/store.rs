//! In-memory job and trigger store.
//!
//! The store owns every job and trigger, tracks each trigger's lifecycle
//! state, and keeps the working set: the triggers that are `Waiting` with a
//! next fire time, ordered by (fire time, priority descending, name).
//!
//! A trigger is in the working set if and only if it is `Waiting` and has a
//! next fire time. Every state change goes through [`TriggerWrapper::transition`]
//! or [`TriggerWrapper::sync`], which keep that true.

use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::SchedulerError;
use crate::config::SchedulerConfig;
use crate::job::{JobDetail, OverlapPolicy};
use crate::signal::SchedulerSignal;
use crate::state::TriggerState;
use crate::trigger::{SchedulerInstruction, Trigger};

/// Everything a worker needs to run one firing.
#[derive(Debug, Clone)]
pub struct TriggerFiredBundle {
    pub job: JobDetail,
    /// The trigger as it was right after firing.
    pub trigger: Trigger,
    pub fire_time: DateTime<Utc>,
    pub scheduled_fire_time: Option<DateTime<Utc>>,
    pub previous_fire_time: Option<DateTime<Utc>>,
    pub next_fire_time: Option<DateTime<Utc>>,
    /// Identifies the stored trigger instance that fired, so a completion
    /// does not touch a trigger stored under the same name afterwards.
    pub(crate) generation: u64,
}

/// A point-in-time view of one stored trigger.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TriggerSummary {
    pub name: String,
    pub job_name: String,
    pub state: TriggerState,
    pub next_fire_time: Option<DateTime<Utc>>,
    pub times_triggered: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct TimeKey {
    fire_time: DateTime<Utc>,
    priority: Reverse<i32>,
    name: String,
}

#[derive(Debug)]
struct TriggerWrapper {
    trigger: Trigger,
    state: TriggerState,
    /// The key this trigger is queued under, if any.
    queued: Option<TimeKey>,
    generation: u64,
}

impl TriggerWrapper {
    /// Bring working-set membership in line with the current state and fire time.
    fn sync(&mut self, time_triggers: &mut BTreeSet<TimeKey>) {
        if let Some(key) = self.queued.take() {
            time_triggers.remove(&key);
        }
        if self.state != TriggerState::Waiting {
            return;
        }
        if let Some(fire_time) = self.trigger.next_fire_time() {
            let key = TimeKey {
                fire_time,
                priority: Reverse(self.trigger.priority()),
                name: self.trigger.name().to_string(),
            };
            time_triggers.insert(key.clone());
            self.queued = Some(key);
        }
    }

    fn transition(&mut self, state: TriggerState, time_triggers: &mut BTreeSet<TimeKey>) {
        self.state = state;
        self.sync(time_triggers);
    }

    fn pause(&mut self, time_triggers: &mut BTreeSet<TimeKey>) {
        if self.state.is_paused() || self.state.is_terminal() {
            return;
        }
        let paused = match self.state {
            TriggerState::Blocked | TriggerState::Executing => TriggerState::PausedAndBlocked,
            _ => TriggerState::Paused,
        };
        self.transition(paused, time_triggers);
    }
}

enum Misfire {
    OnTime,
    Rescheduled,
    Exhausted,
}

/// Apply the trigger's misfire policy if its next fire time is older than
/// `now - threshold`.
fn apply_misfire(trigger: &mut Trigger, now: DateTime<Utc>, threshold: Duration) -> Misfire {
    let Some(stale) = trigger.next_fire_time() else {
        return Misfire::OnTime;
    };
    let Some(cutoff) = now.checked_sub_signed(threshold) else {
        return Misfire::OnTime;
    };
    if stale > cutoff {
        return Misfire::OnTime;
    }

    trigger.update_after_misfire(now);
    match trigger.next_fire_time() {
        None => {
            info!(trigger = %trigger.name(), stale = %stale, "trigger misfired and will not fire again");
            Misfire::Exhausted
        }
        Some(next) if next == stale => Misfire::OnTime,
        Some(next) => {
            info!(trigger = %trigger.name(), stale = %stale, next = %next, "trigger misfired, rescheduled");
            Misfire::Rescheduled
        }
    }
}

struct StoreState {
    jobs: HashMap<String, JobDetail>,
    triggers: HashMap<String, TriggerWrapper>,
    job_triggers: HashMap<String, BTreeSet<String>>,
    time_triggers: BTreeSet<TimeKey>,
    paused_triggers: HashSet<String>,
    paused_jobs: HashSet<String>,
    blocked_jobs: HashSet<String>,
    misfire_threshold: Duration,
    retain_completed: bool,
    last_generation: u64,
}

impl StoreState {
    fn new(config: &SchedulerConfig) -> Self {
        let threshold = i64::try_from(config.misfire_threshold_ms).unwrap_or(i64::MAX);
        Self {
            jobs: HashMap::new(),
            triggers: HashMap::new(),
            job_triggers: HashMap::new(),
            time_triggers: BTreeSet::new(),
            paused_triggers: HashSet::new(),
            paused_jobs: HashSet::new(),
            blocked_jobs: HashSet::new(),
            misfire_threshold: Duration::try_milliseconds(threshold).unwrap_or(Duration::MAX),
            retain_completed: config.retain_completed_triggers,
            last_generation: 0,
        }
    }

    fn store_job(&mut self, job: JobDetail, replace: bool) -> Result<(), SchedulerError> {
        if !replace && self.jobs.contains_key(job.name()) {
            return Err(SchedulerError::DuplicateJob(job.name().to_string()));
        }
        self.jobs.insert(job.name().to_string(), job);
        Ok(())
    }

    /// Check everything that could make `store_trigger` fail, without mutating.
    fn check_trigger(
        &self,
        trigger: &Trigger,
        replace: bool,
        pending_job: Option<&str>,
    ) -> Result<(), SchedulerError> {
        trigger.validate()?;
        let Some(job_name) = trigger.job_name() else {
            return Err(SchedulerError::invalid_trigger(
                trigger.name(),
                "trigger is not attached to a job",
            ));
        };
        if !self.jobs.contains_key(job_name) && pending_job != Some(job_name) {
            return Err(SchedulerError::UnresolvedJob {
                trigger: trigger.name().to_string(),
                job: job_name.to_string(),
            });
        }
        if !replace && self.triggers.contains_key(trigger.name()) {
            return Err(SchedulerError::DuplicateTrigger(trigger.name().to_string()));
        }
        let fresh = trigger.next_fire_time().is_none() && trigger.previous_fire_time().is_none();
        if fresh && trigger.clone().compute_first_fire_time().is_none() {
            return Err(SchedulerError::NeverFires(trigger.name().to_string()));
        }
        Ok(())
    }

    /// Insert a trigger that already passed `check_trigger`.
    fn insert_trigger(&mut self, mut trigger: Trigger) {
        let name = trigger.name().to_string();
        let job_name = trigger.job_name().unwrap_or_default().to_string();

        if self.triggers.contains_key(&name) {
            debug!(trigger = %name, "replacing trigger");
            self.remove_trigger(&name, false, false);
        }

        if trigger.next_fire_time().is_none() && trigger.previous_fire_time().is_none() {
            trigger.compute_first_fire_time();
        }

        let paused = self.paused_triggers.contains(&name) || self.paused_jobs.contains(&job_name);
        let blocked = self.blocked_jobs.contains(&job_name);
        let state = if trigger.next_fire_time().is_none() {
            TriggerState::Complete
        } else {
            match (paused, blocked) {
                (true, true) => TriggerState::PausedAndBlocked,
                (true, false) => TriggerState::Paused,
                (false, true) => TriggerState::Blocked,
                (false, false) => TriggerState::Waiting,
            }
        };

        self.last_generation += 1;
        let mut wrapper = TriggerWrapper {
            trigger,
            state,
            queued: None,
            generation: self.last_generation,
        };
        wrapper.sync(&mut self.time_triggers);

        self.job_triggers
            .entry(job_name)
            .or_default()
            .insert(name.clone());
        self.triggers.insert(name, wrapper);
    }

    fn remove_trigger(&mut self, name: &str, delete_orphaned_job: bool, clear_pause: bool) -> bool {
        let Some(mut wrapper) = self.triggers.remove(name) else {
            return false;
        };
        if let Some(key) = wrapper.queued.take() {
            self.time_triggers.remove(&key);
        }
        if clear_pause {
            self.paused_triggers.remove(name);
        }

        let job_name = wrapper.trigger.job_name().unwrap_or_default();
        let orphaned = match self.job_triggers.get_mut(job_name) {
            Some(names) => {
                names.remove(name);
                names.is_empty()
            }
            None => true,
        };
        if orphaned {
            self.job_triggers.remove(job_name);
            let durable = self.jobs.get(job_name).is_some_and(|job| job.is_durable());
            if delete_orphaned_job && !durable && self.jobs.remove(job_name).is_some() {
                self.paused_jobs.remove(job_name);
                debug!(job = %job_name, "removed job with no remaining triggers");
            }
        }
        true
    }

    fn remove_job(&mut self, name: &str) -> bool {
        let trigger_names: Vec<String> = self
            .job_triggers
            .get(name)
            .map(|names| names.iter().cloned().collect())
            .unwrap_or_default();

        let mut found = !trigger_names.is_empty();
        for trigger_name in &trigger_names {
            self.remove_trigger(trigger_name, false, true);
        }
        found |= self.jobs.remove(name).is_some();
        self.paused_jobs.remove(name);
        found
    }

    /// Drop or keep a trigger that will never fire again.
    fn finish_exhausted(&mut self, name: &str) {
        if self.retain_completed {
            self.set_state(name, TriggerState::Complete);
        } else {
            self.remove_trigger(name, true, true);
        }
    }

    fn set_state(&mut self, name: &str, state: TriggerState) {
        if let Some(wrapper) = self.triggers.get_mut(name) {
            wrapper.transition(state, &mut self.time_triggers);
        }
    }

    fn job_trigger_names(&self, job_name: &str) -> Vec<String> {
        self.job_triggers
            .get(job_name)
            .map(|names| names.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn set_all_states(&mut self, job_name: &str, state: TriggerState) {
        for name in self.job_trigger_names(job_name) {
            self.set_state(&name, state);
        }
    }

    fn acquire_next(
        &mut self,
        no_later_than: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<Trigger>, SchedulerError> {
        loop {
            let Some(key) = self.time_triggers.pop_first() else {
                return Ok(None);
            };
            let Some(wrapper) = self.triggers.get_mut(&key.name) else {
                return Err(SchedulerError::Inconsistent(format!(
                    "trigger {} is queued but not stored",
                    key.name
                )));
            };
            wrapper.queued = None;
            if wrapper.trigger.next_fire_time().is_none() {
                continue;
            }

            match apply_misfire(&mut wrapper.trigger, now, self.misfire_threshold) {
                Misfire::Rescheduled => {
                    wrapper.sync(&mut self.time_triggers);
                    continue;
                }
                Misfire::Exhausted => {
                    wrapper.transition(TriggerState::Complete, &mut self.time_triggers);
                    self.finish_exhausted(&key.name);
                    continue;
                }
                Misfire::OnTime => {}
            }

            if wrapper
                .trigger
                .next_fire_time()
                .is_some_and(|next| next > no_later_than)
            {
                wrapper.sync(&mut self.time_triggers);
                return Ok(None);
            }

            wrapper.transition(TriggerState::Acquired, &mut self.time_triggers);
            return Ok(Some(wrapper.trigger.clone()));
        }
    }

    fn release(&mut self, name: &str) {
        let Some(wrapper) = self.triggers.get_mut(name) else {
            return;
        };
        if wrapper.state != TriggerState::Acquired {
            return;
        }
        let job_blocked = wrapper
            .trigger
            .job_name()
            .is_some_and(|job| self.blocked_jobs.contains(job));
        let state = if job_blocked {
            TriggerState::Blocked
        } else {
            TriggerState::Waiting
        };
        wrapper.transition(state, &mut self.time_triggers);
    }

    fn fired(
        &mut self,
        name: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<TriggerFiredBundle>, SchedulerError> {
        let Some(wrapper) = self.triggers.get_mut(name) else {
            return Ok(None);
        };
        if wrapper.state != TriggerState::Acquired {
            return Ok(None);
        }

        let job_name = wrapper.trigger.job_name().unwrap_or_default().to_string();
        let Some(job) = self.jobs.get(&job_name).cloned() else {
            return Err(SchedulerError::UnresolvedJob {
                trigger: name.to_string(),
                job: job_name,
            });
        };

        let exclusive = job.overlap_policy() == OverlapPolicy::Exclusive;
        if exclusive && self.blocked_jobs.contains(&job_name) {
            // Acquired before a sibling started executing the same job.
            wrapper.transition(TriggerState::Blocked, &mut self.time_triggers);
            return Ok(None);
        }

        let previous_fire_time = wrapper.trigger.previous_fire_time();
        wrapper.trigger.triggered();

        let state = if exclusive {
            TriggerState::Executing
        } else {
            TriggerState::Waiting
        };
        wrapper.transition(state, &mut self.time_triggers);

        let bundle = TriggerFiredBundle {
            job,
            trigger: wrapper.trigger.clone(),
            fire_time: now,
            scheduled_fire_time: wrapper.trigger.previous_fire_time(),
            previous_fire_time,
            next_fire_time: wrapper.trigger.next_fire_time(),
            generation: wrapper.generation,
        };

        if exclusive {
            self.block_job(&job_name, name);
        }
        Ok(Some(bundle))
    }

    fn block_job(&mut self, job_name: &str, firing: &str) {
        self.blocked_jobs.insert(job_name.to_string());
        for name in self.job_trigger_names(job_name) {
            if name == firing {
                continue;
            }
            if let Some(wrapper) = self.triggers.get_mut(&name) {
                match wrapper.state {
                    TriggerState::Waiting => {
                        wrapper.transition(TriggerState::Blocked, &mut self.time_triggers);
                    }
                    TriggerState::Paused => {
                        wrapper.transition(TriggerState::PausedAndBlocked, &mut self.time_triggers);
                    }
                    _ => {}
                }
            }
        }
    }

    fn unblock_job(&mut self, job_name: &str) {
        for name in self.job_trigger_names(job_name) {
            if let Some(wrapper) = self.triggers.get_mut(&name) {
                match wrapper.state {
                    TriggerState::Executing | TriggerState::Blocked => {
                        wrapper.transition(TriggerState::Waiting, &mut self.time_triggers);
                    }
                    TriggerState::PausedAndBlocked => {
                        wrapper.transition(TriggerState::Paused, &mut self.time_triggers);
                    }
                    _ => {}
                }
            }
        }
    }

    fn complete(&mut self, bundle: &TriggerFiredBundle, instruction: SchedulerInstruction) {
        let trigger_name = bundle.trigger.name();
        let job_name = bundle.job.name();
        self.blocked_jobs.remove(job_name);

        let same_instance = self
            .triggers
            .get(trigger_name)
            .is_some_and(|wrapper| wrapper.generation == bundle.generation);
        let trigger_level = matches!(
            instruction,
            SchedulerInstruction::DeleteTrigger
                | SchedulerInstruction::SetTriggerComplete
                | SchedulerInstruction::SetTriggerError
        );

        match instruction {
            _ if trigger_level && !same_instance => {
                debug!(trigger = %trigger_name, ?instruction, "trigger was replaced or removed during execution, ignoring instruction");
            }
            SchedulerInstruction::DeleteTrigger => {
                match self.triggers.get(trigger_name) {
                    Some(wrapper) if wrapper.trigger.next_fire_time().is_none() => {
                        debug!(trigger = %trigger_name, "trigger exhausted");
                        self.finish_exhausted(trigger_name);
                    }
                    Some(_) => {
                        debug!(trigger = %trigger_name, "trigger was rescheduled during execution, keeping it");
                    }
                    None => {}
                }
            }
            SchedulerInstruction::SetTriggerComplete => {
                self.set_state(trigger_name, TriggerState::Complete);
            }
            SchedulerInstruction::SetTriggerError => {
                info!(trigger = %trigger_name, "trigger set to error state");
                self.set_state(trigger_name, TriggerState::Error);
            }
            SchedulerInstruction::SetAllJobTriggersComplete => {
                self.set_all_states(job_name, TriggerState::Complete);
            }
            SchedulerInstruction::SetAllJobTriggersError => {
                info!(job = %job_name, "all triggers of job set to error state");
                self.set_all_states(job_name, TriggerState::Error);
            }
            SchedulerInstruction::NoInstruction | SchedulerInstruction::ReExecuteJob => {}
        }

        self.unblock_job(job_name);
    }

    fn resume_wrapper(&mut self, name: &str, now: DateTime<Utc>) {
        let Some(wrapper) = self.triggers.get_mut(name) else {
            return;
        };
        let job_blocked = wrapper
            .trigger
            .job_name()
            .is_some_and(|job| self.blocked_jobs.contains(job));

        match wrapper.state {
            TriggerState::PausedAndBlocked => {
                wrapper.transition(TriggerState::Blocked, &mut self.time_triggers);
            }
            TriggerState::Paused if job_blocked => {
                wrapper.transition(TriggerState::Blocked, &mut self.time_triggers);
            }
            TriggerState::Paused => {
                match apply_misfire(&mut wrapper.trigger, now, self.misfire_threshold) {
                    Misfire::Exhausted => {
                        wrapper.transition(TriggerState::Complete, &mut self.time_triggers);
                        self.finish_exhausted(name);
                    }
                    Misfire::OnTime | Misfire::Rescheduled => {
                        wrapper.transition(TriggerState::Waiting, &mut self.time_triggers);
                    }
                }
            }
            _ => {}
        }
    }

    fn pause_trigger(&mut self, name: &str) -> bool {
        let Some(wrapper) = self.triggers.get_mut(name) else {
            return false;
        };
        wrapper.pause(&mut self.time_triggers);
        self.paused_triggers.insert(name.to_string());
        true
    }

    fn resume_trigger(&mut self, name: &str, now: DateTime<Utc>) -> bool {
        let Some(wrapper) = self.triggers.get(name) else {
            return false;
        };
        let job_paused = wrapper
            .trigger
            .job_name()
            .is_some_and(|job| self.paused_jobs.contains(job));

        self.paused_triggers.remove(name);
        if !job_paused {
            self.resume_wrapper(name, now);
        }
        true
    }

    fn pause_job(&mut self, job_name: &str) -> bool {
        if !self.jobs.contains_key(job_name) {
            return false;
        }
        self.paused_jobs.insert(job_name.to_string());
        for name in self.job_trigger_names(job_name) {
            if let Some(wrapper) = self.triggers.get_mut(&name) {
                wrapper.pause(&mut self.time_triggers);
            }
        }
        true
    }

    fn resume_job(&mut self, job_name: &str, now: DateTime<Utc>) -> bool {
        if !self.jobs.contains_key(job_name) {
            return false;
        }
        self.paused_jobs.remove(job_name);
        for name in self.job_trigger_names(job_name) {
            // Triggers paused on their own stay paused.
            if !self.paused_triggers.contains(&name) {
                self.resume_wrapper(&name, now);
            }
        }
        true
    }

    fn summary(wrapper: &TriggerWrapper) -> TriggerSummary {
        TriggerSummary {
            name: wrapper.trigger.name().to_string(),
            job_name: wrapper.trigger.job_name().unwrap_or_default().to_string(),
            state: wrapper.state,
            next_fire_time: wrapper.trigger.next_fire_time(),
            times_triggered: wrapper.trigger.times_triggered(),
        }
    }
}

/// Thread-safe store of jobs and triggers.
///
/// Every mutation that can change what fires next raises the scheduler signal,
/// so a dispatcher sleeping towards a later trigger re-evaluates.
pub struct Store {
    state: Mutex<StoreState>,
    signal: Arc<SchedulerSignal>,
}

impl Store {
    pub fn new(config: &SchedulerConfig) -> Self {
        Self {
            state: Mutex::new(StoreState::new(config)),
            signal: Arc::new(SchedulerSignal::new()),
        }
    }

    pub(crate) fn signal(&self) -> &Arc<SchedulerSignal> {
        &self.signal
    }

    /// Store a job. Fails with `DuplicateJob` unless `replace` is set.
    pub async fn store_job(&self, job: JobDetail, replace: bool) -> Result<(), SchedulerError> {
        self.state.lock().await.store_job(job, replace)
    }

    /// Store a trigger for an already stored job.
    ///
    /// A trigger that has never fired gets its first fire time computed here.
    /// Replacing a trigger keeps its paused status.
    pub async fn store_trigger(&self, trigger: Trigger, replace: bool) -> Result<(), SchedulerError> {
        {
            let mut state = self.state.lock().await;
            state.check_trigger(&trigger, replace, None)?;
            state.insert_trigger(trigger);
        }
        self.signal.raise();
        Ok(())
    }

    /// Store a new job and its trigger together. Nothing is stored on failure.
    pub async fn store_job_and_trigger(
        &self,
        job: JobDetail,
        trigger: Trigger,
    ) -> Result<(), SchedulerError> {
        {
            let mut state = self.state.lock().await;
            if state.jobs.contains_key(job.name()) {
                return Err(SchedulerError::DuplicateJob(job.name().to_string()));
            }
            state.check_trigger(&trigger, false, Some(job.name()))?;
            state.store_job(job, false)?;
            state.insert_trigger(trigger);
        }
        self.signal.raise();
        Ok(())
    }

    /// Remove a job and all of its triggers. Returns whether anything was removed.
    pub async fn remove_job(&self, name: &str) -> bool {
        let removed = self.state.lock().await.remove_job(name);
        if removed {
            self.signal.raise();
        }
        removed
    }

    /// Remove a trigger. With `delete_orphaned_job`, its job goes with it if
    /// the job is left without triggers and is not durable.
    pub async fn remove_trigger(&self, name: &str, delete_orphaned_job: bool) -> bool {
        let removed = self
            .state
            .lock()
            .await
            .remove_trigger(name, delete_orphaned_job, true);
        if removed {
            self.signal.raise();
        }
        removed
    }

    pub async fn retrieve_job(&self, name: &str) -> Option<JobDetail> {
        self.state.lock().await.jobs.get(name).cloned()
    }

    pub async fn retrieve_trigger(&self, name: &str) -> Option<Trigger> {
        let state = self.state.lock().await;
        state.triggers.get(name).map(|w| w.trigger.clone())
    }

    pub async fn triggers_for_job(&self, job_name: &str) -> Vec<Trigger> {
        let state = self.state.lock().await;
        state
            .job_trigger_names(job_name)
            .iter()
            .filter_map(|name| state.triggers.get(name))
            .map(|w| w.trigger.clone())
            .collect()
    }

    pub async fn trigger_state(&self, name: &str) -> Option<TriggerState> {
        self.state.lock().await.triggers.get(name).map(|w| w.state)
    }

    /// Names of all stored jobs, sorted.
    pub async fn job_names(&self) -> Vec<String> {
        let state = self.state.lock().await;
        let mut names: Vec<String> = state.jobs.keys().cloned().collect();
        names.sort();
        names
    }

    /// Summaries of all stored triggers, sorted by name.
    pub async fn trigger_summaries(&self) -> Vec<TriggerSummary> {
        let state = self.state.lock().await;
        let mut summaries: Vec<TriggerSummary> =
            state.triggers.values().map(StoreState::summary).collect();
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        summaries
    }

    /// Names of the triggers eligible for acquisition, in firing order.
    pub async fn working_set(&self) -> Vec<String> {
        let state = self.state.lock().await;
        state.time_triggers.iter().map(|k| k.name.clone()).collect()
    }

    /// Take the next trigger due no later than `no_later_than`, marking it
    /// `Acquired`. Misfired triggers are corrected on the way.
    pub async fn acquire_next_trigger(
        &self,
        no_later_than: DateTime<Utc>,
    ) -> Result<Option<Trigger>, SchedulerError> {
        self.acquire_next_trigger_at(no_later_than, Utc::now()).await
    }

    pub(crate) async fn acquire_next_trigger_at(
        &self,
        no_later_than: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<Trigger>, SchedulerError> {
        self.state.lock().await.acquire_next(no_later_than, now)
    }

    /// Give back a trigger acquired but not fired.
    pub async fn release_acquired_trigger(&self, trigger: &Trigger) {
        self.state.lock().await.release(trigger.name());
    }

    /// Record that an acquired trigger fired.
    ///
    /// Returns `None` if the trigger is gone or no longer `Acquired`, which
    /// happens when it was paused, removed or replaced since acquisition.
    pub async fn trigger_fired(
        &self,
        trigger: &Trigger,
    ) -> Result<Option<TriggerFiredBundle>, SchedulerError> {
        self.state.lock().await.fired(trigger.name(), Utc::now())
    }

    /// Apply the instruction a trigger produced after its job ran.
    ///
    /// Instructions aimed at the trigger itself are dropped if the trigger was
    /// replaced or removed while the job ran; the job is unblocked either way.
    pub async fn triggered_job_complete(
        &self,
        bundle: &TriggerFiredBundle,
        instruction: SchedulerInstruction,
    ) {
        self.state.lock().await.complete(bundle, instruction);
        self.signal.raise();
    }

    pub async fn pause_trigger(&self, name: &str) -> bool {
        let found = self.state.lock().await.pause_trigger(name);
        if found {
            self.signal.raise();
        }
        found
    }

    /// Resume a paused trigger, applying its misfire policy first.
    pub async fn resume_trigger(&self, name: &str) -> bool {
        let found = self.state.lock().await.resume_trigger(name, Utc::now());
        if found {
            self.signal.raise();
        }
        found
    }

    /// Pause every trigger of a job, including triggers added later.
    pub async fn pause_job(&self, name: &str) -> bool {
        let found = self.state.lock().await.pause_job(name);
        if found {
            self.signal.raise();
        }
        found
    }

    pub async fn resume_job(&self, name: &str) -> bool {
        let found = self.state.lock().await.resume_job(name, Utc::now());
        if found {
            self.signal.raise();
        }
        found
    }
}
