//! Triggers and their fire-time algebra.
//!
//! A [`Trigger`] knows nothing about the store it lives in. It only answers
//! "when should I fire next?" and "what should happen after a firing?".
//! All arithmetic is done at millisecond precision.

use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::job::{FailureAction, JobOutcome};
use crate::SchedulerError;

/// Priority assigned to triggers that do not set one.
pub const DEFAULT_PRIORITY: i32 = 5;

/// How many times a trigger repeats after its first firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "count", rename_all = "snake_case")]
pub enum RepeatCount {
    /// Repeat this many times, firing `n + 1` times in total.
    Times(u64),
    /// Repeat until the end time, if any.
    Indefinitely,
}

impl From<u64> for RepeatCount {
    fn from(n: u64) -> Self {
        RepeatCount::Times(n)
    }
}

/// What to do when a trigger's fire time was missed by more than the
/// misfire threshold.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MisfireInstruction {
    /// Resolve to one of the other instructions based on the repeat count.
    #[default]
    SmartPolicy,
    /// Fire now. Repeating triggers are treated as
    /// `RescheduleNowWithRemainingRepeatCount`.
    FireNow,
    /// Restart at now, keeping the repeats not yet fired.
    RescheduleNowWithExistingRepeatCount,
    /// Restart at now, dropping the repeats that were missed.
    RescheduleNowWithRemainingRepeatCount,
    /// Skip to the next scheduled time after now, counting missed fires as fired.
    RescheduleNextWithRemainingCount,
    /// Skip to the next scheduled time after now.
    RescheduleNextWithExistingCount,
}

/// What the store should do with a trigger once its job has run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerInstruction {
    NoInstruction,
    /// Run the job again right away, in the same worker slot.
    ReExecuteJob,
    SetTriggerComplete,
    /// The trigger has no further fire time.
    DeleteTrigger,
    SetAllJobTriggersComplete,
    SetAllJobTriggersError,
    SetTriggerError,
}

/// A firing rule for one job: a start time, an optional fixed repeat, and an
/// optional end time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
    name: String,
    job_name: Option<String>,
    start_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
    repeat_interval: StdDuration,
    repeat_count: RepeatCount,
    times_triggered: u64,
    next_fire_time: Option<DateTime<Utc>>,
    previous_fire_time: Option<DateTime<Utc>>,
    misfire_instruction: MisfireInstruction,
    priority: i32,
}

impl Trigger {
    /// Create a one-shot trigger firing at `start_time`.
    pub fn new(name: impl Into<String>, start_time: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            job_name: None,
            start_time,
            end_time: None,
            repeat_interval: StdDuration::ZERO,
            repeat_count: RepeatCount::Times(0),
            times_triggered: 0,
            next_fire_time: None,
            previous_fire_time: None,
            misfire_instruction: MisfireInstruction::default(),
            priority: DEFAULT_PRIORITY,
        }
    }

    /// Create a trigger firing at `start_time` and then every `interval`.
    pub fn repeating(
        name: impl Into<String>,
        start_time: DateTime<Utc>,
        interval: StdDuration,
        repeat_count: impl Into<RepeatCount>,
    ) -> Self {
        let mut trigger = Self::new(name, start_time);
        trigger.repeat_interval = interval;
        trigger.repeat_count = repeat_count.into();
        trigger
    }

    /// Attach the trigger to a job by name.
    pub fn for_job(mut self, job_name: impl Into<String>) -> Self {
        self.job_name = Some(job_name.into());
        self
    }

    pub fn with_end_time(mut self, end_time: DateTime<Utc>) -> Self {
        self.end_time = Some(end_time);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_misfire_instruction(mut self, instruction: MisfireInstruction) -> Self {
        self.misfire_instruction = instruction;
        self
    }

    pub(crate) fn set_job_name(&mut self, job_name: &str) {
        self.job_name = Some(job_name.to_string());
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn job_name(&self) -> Option<&str> {
        self.job_name.as_deref()
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.end_time
    }

    pub fn repeat_interval(&self) -> StdDuration {
        self.repeat_interval
    }

    pub fn repeat_count(&self) -> RepeatCount {
        self.repeat_count
    }

    pub fn times_triggered(&self) -> u64 {
        self.times_triggered
    }

    pub fn next_fire_time(&self) -> Option<DateTime<Utc>> {
        self.next_fire_time
    }

    pub fn previous_fire_time(&self) -> Option<DateTime<Utc>> {
        self.previous_fire_time
    }

    pub fn misfire_instruction(&self) -> MisfireInstruction {
        self.misfire_instruction
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// Check the trigger's bounds.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.name.is_empty() {
            return Err(SchedulerError::invalid_trigger(
                &self.name,
                "trigger name is empty",
            ));
        }
        if let Some(end) = self.end_time {
            if end < self.start_time {
                return Err(SchedulerError::invalid_trigger(
                    &self.name,
                    "end time cannot be before start time",
                ));
            }
        }
        if self.repeat_count != RepeatCount::Times(0) && self.interval_ms() == 0 {
            return Err(SchedulerError::invalid_trigger(
                &self.name,
                "a repeating trigger needs a repeat interval of at least 1ms",
            ));
        }
        Ok(())
    }

    /// Set the next fire time to the start time. Called once, at registration.
    /// A trigger whose end time is not after its start never fires.
    pub fn compute_first_fire_time(&mut self) -> Option<DateTime<Utc>> {
        self.next_fire_time = match self.end_time {
            Some(end) if end <= self.start_time => None,
            _ => Some(self.start_time),
        };
        self.next_fire_time
    }

    /// Record a firing and advance to the following fire time.
    pub fn triggered(&mut self) {
        self.times_triggered += 1;
        self.previous_fire_time = self.next_fire_time;
        self.next_fire_time = self
            .next_fire_time
            .and_then(|fired| self.fire_time_after(fired));
    }

    /// Whether the trigger still has a pending fire time.
    pub fn may_fire_again(&self) -> bool {
        self.next_fire_time.is_some()
    }

    /// The smallest scheduled fire time strictly after `after`.
    pub fn fire_time_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if let RepeatCount::Times(n) = self.repeat_count {
            if self.times_triggered > n {
                return None;
            }
            if n == 0 && after >= self.start_time {
                return None;
            }
        }
        if let Some(end) = self.end_time {
            if end <= after {
                return None;
            }
        }
        if after < self.start_time {
            return Some(self.start_time);
        }

        let interval = self.interval_ms();
        if interval == 0 {
            return None;
        }
        let elapsed = (after - self.start_time).num_milliseconds();
        let executed = elapsed / interval + 1;
        if let RepeatCount::Times(n) = self.repeat_count {
            if executed as u64 > n {
                return None;
            }
        }

        let time = self.offset(executed)?;
        match self.end_time {
            Some(end) if end <= time => None,
            _ => Some(time),
        }
    }

    /// The latest scheduled fire time strictly before `before`, ignoring the
    /// end time.
    pub fn fire_time_before(&self, before: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if before <= self.start_time {
            return None;
        }
        let interval = self.interval_ms();
        if interval == 0 {
            return Some(self.start_time);
        }
        let elapsed = (before - self.start_time).num_milliseconds();
        let mut fires = (elapsed - 1).max(0) / interval;
        if let RepeatCount::Times(n) = self.repeat_count {
            fires = fires.min(i64::try_from(n).unwrap_or(i64::MAX));
        }
        self.offset(fires)
    }

    /// The last time this trigger will ever fire, if that is bounded.
    pub fn final_fire_time(&self) -> Option<DateTime<Utc>> {
        match self.repeat_count {
            RepeatCount::Times(0) => Some(self.start_time),
            RepeatCount::Indefinitely => self.end_time.and_then(|end| self.fire_time_before(end)),
            RepeatCount::Times(n) => {
                let last = self.offset(i64::try_from(n).ok()?)?;
                match self.end_time {
                    Some(end) if last >= end => self.fire_time_before(end),
                    _ => Some(last),
                }
            }
        }
    }

    /// Number of whole intervals between two instants.
    pub fn num_times_fired_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> u64 {
        let interval = self.interval_ms();
        if interval == 0 {
            return 0;
        }
        let elapsed = (to - from).num_milliseconds();
        if elapsed <= 0 {
            return 0;
        }
        (elapsed / interval) as u64
    }

    /// Re-derive the next fire time after a misfire detected at `now`.
    pub fn update_after_misfire(&mut self, now: DateTime<Utc>) {
        let instruction = self.effective_misfire_instruction();

        match instruction {
            // Smart policy is always resolved away; treat it as the one-shot default.
            MisfireInstruction::FireNow | MisfireInstruction::SmartPolicy => {
                self.next_fire_time = Some(now);
            }
            MisfireInstruction::RescheduleNextWithExistingCount => {
                self.next_fire_time = self.fire_time_after(now);
            }
            MisfireInstruction::RescheduleNextWithRemainingCount => {
                let new_fire_time = self.fire_time_after(now);
                if let (Some(stale), Some(new)) = (self.next_fire_time, new_fire_time) {
                    self.times_triggered += self.num_times_fired_between(stale, new);
                }
                self.next_fire_time = new_fire_time;
            }
            MisfireInstruction::RescheduleNowWithExistingRepeatCount => {
                if let RepeatCount::Times(n) = self.repeat_count {
                    if n != 0 {
                        self.repeat_count = RepeatCount::Times(n.saturating_sub(self.times_triggered));
                        self.times_triggered = 0;
                    }
                }
                self.restart_at(now);
            }
            MisfireInstruction::RescheduleNowWithRemainingRepeatCount => {
                let missed = self
                    .next_fire_time
                    .map(|stale| self.num_times_fired_between(stale, now))
                    .unwrap_or(0);
                if let RepeatCount::Times(n) = self.repeat_count {
                    if n != 0 {
                        let remaining = n.saturating_sub(self.times_triggered + missed);
                        self.repeat_count = RepeatCount::Times(remaining);
                        self.times_triggered = 0;
                    }
                }
                self.restart_at(now);
            }
        }
    }

    /// Decide what happens to this trigger after its job ran with `outcome`.
    pub fn execution_complete(&self, outcome: &JobOutcome) -> SchedulerInstruction {
        match outcome {
            JobOutcome::Retry => return SchedulerInstruction::ReExecuteJob,
            JobOutcome::Failed(failure) => match failure.action {
                FailureAction::UnscheduleTrigger => {
                    return SchedulerInstruction::SetTriggerComplete;
                }
                FailureAction::UnscheduleAllTriggers => {
                    return SchedulerInstruction::SetAllJobTriggersComplete;
                }
                FailureAction::ErrorTrigger => return SchedulerInstruction::SetTriggerError,
                FailureAction::ErrorAllTriggers => {
                    return SchedulerInstruction::SetAllJobTriggersError;
                }
                FailureAction::Continue => {}
            },
            JobOutcome::Success => {}
        }

        if !self.may_fire_again() {
            return SchedulerInstruction::DeleteTrigger;
        }
        SchedulerInstruction::NoInstruction
    }

    fn effective_misfire_instruction(&self) -> MisfireInstruction {
        match (self.misfire_instruction, self.repeat_count) {
            (MisfireInstruction::SmartPolicy, RepeatCount::Times(0)) => MisfireInstruction::FireNow,
            (MisfireInstruction::SmartPolicy, RepeatCount::Indefinitely) => {
                MisfireInstruction::RescheduleNextWithRemainingCount
            }
            (MisfireInstruction::SmartPolicy, RepeatCount::Times(_)) => {
                MisfireInstruction::RescheduleNowWithExistingRepeatCount
            }
            (MisfireInstruction::FireNow, RepeatCount::Times(0)) => MisfireInstruction::FireNow,
            (MisfireInstruction::FireNow, _) => {
                MisfireInstruction::RescheduleNowWithRemainingRepeatCount
            }
            (other, _) => other,
        }
    }

    fn restart_at(&mut self, now: DateTime<Utc>) {
        match self.end_time {
            // Past the end time: the trigger will not fire again.
            Some(end) if end < now => self.next_fire_time = None,
            _ => {
                self.start_time = now;
                self.next_fire_time = Some(now);
            }
        }
    }

    fn interval_ms(&self) -> i64 {
        i64::try_from(self.repeat_interval.as_millis()).unwrap_or(i64::MAX)
    }

    fn offset(&self, fires: i64) -> Option<DateTime<Utc>> {
        let millis = self.interval_ms().checked_mul(fires)?;
        self.start_time
            .checked_add_signed(Duration::try_milliseconds(millis)?)
    }
}
