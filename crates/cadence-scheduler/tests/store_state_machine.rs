//! Stateful property testing for the job/trigger store.
//!
//! Drives the store through random interleavings of scheduling, acquiring,
//! firing, completing, pausing and removal, and checks after every step that
//! the working set, trigger states and exclusivity bookkeeping agree.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use proptest::prelude::*;
use proptest_state_machine::{ReferenceStateMachine, StateMachineTest, prop_state_machine};
use tokio::runtime::Runtime;

use cadence_scheduler::{
    FailureAction, JobDetail, JobOutcome, OverlapPolicy, RepeatCount, SchedulerConfig, Store,
    Trigger, TriggerFiredBundle, TriggerState, job_fn,
};

const JOBS: [&str; 3] = ["alpha", "beta", "gamma"];
const TRIGGERS: [&str; 5] = ["t0", "t1", "t2", "t3", "t4"];

/// Jobs with this name run exclusively.
const EXCLUSIVE_JOB: &str = "gamma";

/// How a completed execution ended.
#[derive(Debug, Clone, Copy)]
pub enum Outcome {
    Success,
    Failed(FailureAction),
}

/// Operations that can be performed on the store.
#[derive(Debug, Clone)]
pub enum StoreOperation {
    /// Store a trigger (and its job if missing), replacing any trigger of the same name.
    Schedule {
        job: usize,
        trigger: usize,
        offset_ms: i64,
        repeat: Option<u64>,
    },
    /// Acquire the next due trigger.
    Acquire,
    /// Fire one of the held acquired triggers.
    Fire { slot: usize },
    /// Release one of the held acquired triggers.
    Release { slot: usize },
    /// Complete one of the in-flight executions.
    Complete { slot: usize, outcome: Outcome },
    PauseTrigger { trigger: usize },
    ResumeTrigger { trigger: usize },
    PauseJob { job: usize },
    ResumeJob { job: usize },
    RemoveTrigger {
        trigger: usize,
        delete_orphaned_job: bool,
    },
    RemoveJob { job: usize },
}

/// Reference model: only counts steps. The interesting checks are the
/// store's own invariants.
#[derive(Clone, Debug, Default)]
pub struct StoreModel {
    pub steps: usize,
}

fn outcome_strategy() -> impl Strategy<Value = Outcome> {
    prop_oneof![
        4 => Just(Outcome::Success),
        1 => Just(Outcome::Failed(FailureAction::Continue)),
        1 => Just(Outcome::Failed(FailureAction::UnscheduleTrigger)),
        1 => Just(Outcome::Failed(FailureAction::UnscheduleAllTriggers)),
        1 => Just(Outcome::Failed(FailureAction::ErrorTrigger)),
        1 => Just(Outcome::Failed(FailureAction::ErrorAllTriggers)),
    ]
}

impl ReferenceStateMachine for StoreModel {
    type State = Self;
    type Transition = StoreOperation;

    fn init_state() -> BoxedStrategy<Self::State> {
        Just(Self::default()).boxed()
    }

    fn transitions(_state: &Self::State) -> BoxedStrategy<Self::Transition> {
        let job = 0..JOBS.len();
        let trigger = 0..TRIGGERS.len();

        prop_oneof![
            4 => (job.clone(), trigger.clone(), -3_000i64..3_000, proptest::option::of(0u64..3))
                .prop_map(|(job, trigger, offset_ms, repeat)| StoreOperation::Schedule {
                    job,
                    trigger,
                    offset_ms,
                    repeat,
                }),
            4 => Just(StoreOperation::Acquire),
            3 => (0usize..4).prop_map(|slot| StoreOperation::Fire { slot }),
            1 => (0usize..4).prop_map(|slot| StoreOperation::Release { slot }),
            3 => ((0usize..4), outcome_strategy())
                .prop_map(|(slot, outcome)| StoreOperation::Complete { slot, outcome }),
            1 => trigger.clone().prop_map(|trigger| StoreOperation::PauseTrigger { trigger }),
            1 => trigger.clone().prop_map(|trigger| StoreOperation::ResumeTrigger { trigger }),
            1 => job.clone().prop_map(|job| StoreOperation::PauseJob { job }),
            1 => job.clone().prop_map(|job| StoreOperation::ResumeJob { job }),
            1 => (trigger, any::<bool>()).prop_map(|(trigger, delete_orphaned_job)| {
                StoreOperation::RemoveTrigger {
                    trigger,
                    delete_orphaned_job,
                }
            }),
            1 => job.prop_map(|job| StoreOperation::RemoveJob { job }),
        ]
        .boxed()
    }

    fn apply(mut state: Self::State, _transition: &Self::Transition) -> Self::State {
        state.steps += 1;
        state
    }

    fn preconditions(_state: &Self::State, _transition: &Self::Transition) -> bool {
        // Slot indices wrap around, so every operation is valid from any state
        true
    }
}

/// Test harness holding the store plus what a dispatcher and workers would hold.
pub struct StoreTestHarness {
    runtime: Runtime,
    store: Arc<Store>,
    acquired: Vec<Trigger>,
    in_flight: Vec<TriggerFiredBundle>,
}

fn job_detail(name: &str) -> JobDetail {
    let job = JobDetail::new(name, job_fn(|_ctx| async { JobOutcome::Success }));
    if name == EXCLUSIVE_JOB {
        job.with_overlap_policy(OverlapPolicy::Exclusive)
    } else {
        job
    }
}

impl StoreTestHarness {
    fn new() -> Self {
        let runtime = Runtime::new().expect("Failed to create tokio runtime");
        Self {
            runtime,
            store: Arc::new(Store::new(&SchedulerConfig::default())),
            acquired: Vec::new(),
            in_flight: Vec::new(),
        }
    }

    fn apply_operation(&mut self, op: &StoreOperation) {
        let store = self.store.clone();
        let acquired = &mut self.acquired;
        let in_flight = &mut self.in_flight;

        self.runtime.block_on(async {
            match op {
                StoreOperation::Schedule {
                    job,
                    trigger,
                    offset_ms,
                    repeat,
                } => {
                    let job_name = JOBS[*job];
                    let start = Utc::now() + chrono::Duration::milliseconds(*offset_ms);
                    let repeat = match repeat {
                        Some(n) => RepeatCount::Times(*n),
                        None => RepeatCount::Indefinitely,
                    };
                    let trigger =
                        Trigger::repeating(TRIGGERS[*trigger], start, Duration::from_secs(1), repeat)
                            .for_job(job_name);

                    // Rejections (duplicate names across jobs) are fine here.
                    if store.retrieve_job(job_name).await.is_some() {
                        let _ = store.store_trigger(trigger, true).await;
                    } else {
                        let _ = store.store_job_and_trigger(job_detail(job_name), trigger).await;
                    }
                }
                StoreOperation::Acquire => {
                    let no_later_than = Utc::now() + chrono::Duration::seconds(10);
                    if let Some(trigger) = store
                        .acquire_next_trigger(no_later_than)
                        .await
                        .expect("acquisition should not fail")
                    {
                        acquired.push(trigger);
                    }
                }
                StoreOperation::Fire { slot } => {
                    if !acquired.is_empty() {
                        let trigger = acquired.remove(slot % acquired.len());
                        match store.trigger_fired(&trigger).await {
                            Ok(Some(bundle)) => in_flight.push(bundle),
                            Ok(None) => store.release_acquired_trigger(&trigger).await,
                            Err(e) => panic!("firing failed: {e}"),
                        }
                    }
                }
                StoreOperation::Release { slot } => {
                    if !acquired.is_empty() {
                        let trigger = acquired.remove(slot % acquired.len());
                        store.release_acquired_trigger(&trigger).await;
                    }
                }
                StoreOperation::Complete { slot, outcome } => {
                    if !in_flight.is_empty() {
                        let bundle = in_flight.remove(slot % in_flight.len());
                        let outcome = match outcome {
                            Outcome::Success => JobOutcome::Success,
                            Outcome::Failed(action) => JobOutcome::failed_with("boom", *action),
                        };
                        let instruction = bundle.trigger.execution_complete(&outcome);
                        store
                            .triggered_job_complete(&bundle, instruction)
                            .await;
                    }
                }
                StoreOperation::PauseTrigger { trigger } => {
                    store.pause_trigger(TRIGGERS[*trigger]).await;
                }
                StoreOperation::ResumeTrigger { trigger } => {
                    store.resume_trigger(TRIGGERS[*trigger]).await;
                }
                StoreOperation::PauseJob { job } => {
                    store.pause_job(JOBS[*job]).await;
                }
                StoreOperation::ResumeJob { job } => {
                    store.resume_job(JOBS[*job]).await;
                }
                StoreOperation::RemoveTrigger {
                    trigger,
                    delete_orphaned_job,
                } => {
                    store
                        .remove_trigger(TRIGGERS[*trigger], *delete_orphaned_job)
                        .await;
                }
                StoreOperation::RemoveJob { job } => {
                    store.remove_job(JOBS[*job]).await;
                }
            }
        });
    }

    fn verify(&self) {
        let store = self.store.clone();
        let held: HashSet<String> = self
            .acquired
            .iter()
            .map(|t| t.name().to_string())
            .collect();

        self.runtime.block_on(async {
            let summaries = store.trigger_summaries().await;
            let queued = store.working_set().await;
            let jobs: HashSet<String> = store.job_names().await.into_iter().collect();

            // Invariant: no trigger is queued twice
            let unique: HashSet<&String> = queued.iter().collect();
            assert_eq!(unique.len(), queued.len(), "duplicate working set entry");

            for summary in &summaries {
                // Invariant: queued iff Waiting with a next fire time
                let eligible =
                    summary.state == TriggerState::Waiting && summary.next_fire_time.is_some();
                assert_eq!(
                    queued.contains(&summary.name),
                    eligible,
                    "working set disagrees for {summary:?}"
                );

                // Invariant: an Acquired trigger is held by someone
                if summary.state == TriggerState::Acquired {
                    assert!(held.contains(&summary.name), "leaked acquisition: {summary:?}");
                }

                // Invariant: every trigger's job is stored
                assert!(jobs.contains(&summary.job_name), "dangling trigger: {summary:?}");
            }

            // Invariant: an exclusive job never runs twice at once
            let exclusive: Vec<_> = summaries
                .iter()
                .filter(|s| s.job_name == EXCLUSIVE_JOB)
                .collect();
            let executing = exclusive
                .iter()
                .filter(|s| s.state == TriggerState::Executing)
                .count();
            assert!(executing <= 1, "exclusive job executing {executing} times");
            if executing == 1 {
                assert!(
                    exclusive.iter().all(|s| s.state != TriggerState::Waiting),
                    "sibling of executing exclusive trigger is waiting: {exclusive:?}"
                );
            }

            // Invariant: only exclusive jobs have executing triggers
            for summary in &summaries {
                if summary.state == TriggerState::Executing {
                    assert_eq!(summary.job_name, EXCLUSIVE_JOB);
                }
            }
        });
    }
}

impl StateMachineTest for StoreTestHarness {
    type SystemUnderTest = Self;
    type Reference = StoreModel;

    fn init_test(
        _ref_state: &<Self::Reference as ReferenceStateMachine>::State,
    ) -> Self::SystemUnderTest {
        Self::new()
    }

    fn apply(
        mut state: Self::SystemUnderTest,
        _ref_state: &<Self::Reference as ReferenceStateMachine>::State,
        transition: <Self::Reference as ReferenceStateMachine>::Transition,
    ) -> Self::SystemUnderTest {
        state.apply_operation(&transition);
        state
    }

    fn check_invariants(
        state: &Self::SystemUnderTest,
        _ref_state: &<Self::Reference as ReferenceStateMachine>::State,
    ) {
        state.verify();
    }
}

// Run the state machine tests
prop_state_machine! {
    #![proptest_config(ProptestConfig {
        // Use fewer cases for CI
        cases: 50,
        max_shrink_iters: 5000,
        ..ProptestConfig::default()
    })]

    #[test]
    fn store_state_machine_test(sequential 1..40 => StoreTestHarness);
}
