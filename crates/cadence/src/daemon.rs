//! Long-running scheduler host.

use std::time::Duration;

use cadence_scheduler::{
    JobContext, JobDetail, JobOutcome, OverlapPolicy, Scheduler, SchedulerConfig, job_fn,
};
use miette::Result;
use tracing::{info, warn};

const HEARTBEAT_JOB: &str = "heartbeat";
const STARTUP_JOB: &str = "startup-report";

async fn heartbeat(ctx: JobContext) -> JobOutcome {
    let lag_ms = ctx
        .scheduled_fire_time()
        .map(|scheduled| (ctx.fire_time() - scheduled).num_milliseconds())
        .unwrap_or_default();
    info!(
        fire_time = %ctx.fire_time(),
        lag_ms,
        next = ?ctx.next_fire_time(),
        "heartbeat"
    );
    JobOutcome::Success
}

async fn startup_report(ctx: JobContext) -> JobOutcome {
    let jobs = ctx
        .data()
        .get("jobs")
        .and_then(|v| v.as_array())
        .map(|jobs| jobs.len())
        .unwrap_or_default();
    info!(jobs, "scheduler warm, first firing complete");
    JobOutcome::Success
}

/// Run the scheduler until ctrl-c.
pub async fn run(
    config: SchedulerConfig,
    heartbeat_interval: u64,
    heartbeat_repeat: Option<u64>,
) -> Result<()> {
    info!("starting Cadence");

    let scheduler = Scheduler::new(config).map_err(|e| miette::miette!("{}", e))?;

    let heartbeat_job = JobDetail::new(HEARTBEAT_JOB, job_fn(heartbeat))
        .with_overlap_policy(OverlapPolicy::Exclusive);
    let interval = Duration::from_secs(heartbeat_interval);
    match heartbeat_repeat {
        Some(repeat) => scheduler
            .add_scheduled_job_with_repeat(interval, repeat, heartbeat_job)
            .await
            .map_err(|e| miette::miette!("failed to schedule heartbeat: {}", e))?,
        None => scheduler
            .add_scheduled_job(interval, heartbeat_job)
            .await
            .map_err(|e| miette::miette!("failed to schedule heartbeat: {}", e))?,
    };

    let job_names = scheduler.scheduled_job_names().await;
    let startup_job =
        JobDetail::new(STARTUP_JOB, job_fn(startup_report)).with_data("jobs", job_names);
    scheduler
        .add_scheduled_once_job(Duration::from_secs(1), startup_job)
        .await
        .map_err(|e| miette::miette!("failed to schedule startup report: {}", e))?;

    scheduler
        .start()
        .await
        .map_err(|e| miette::miette!("{}", e))?;

    for summary in scheduler.store().trigger_summaries().await {
        // None for triggers that repeat forever
        let last = scheduler
            .store()
            .retrieve_trigger(&summary.name)
            .await
            .and_then(|trigger| trigger.final_fire_time());
        info!(
            trigger = %summary.name,
            job = %summary.job_name,
            next = ?summary.next_fire_time,
            last = ?last,
            "trigger scheduled"
        );
    }

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| miette::miette!("failed to listen for ctrl-c: {}", e))?;
    info!("received shutdown signal");

    scheduler
        .shutdown()
        .await
        .map_err(|e| miette::miette!("{}", e))?;
    if !scheduler.drain_workers().await {
        warn!("some jobs were still running at exit");
    }

    info!("Cadence stopped");
    Ok(())
}
