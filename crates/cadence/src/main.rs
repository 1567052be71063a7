//! Cadence: in-process job scheduler host
//!
//! Main binary with subcommands:
//! - `run`: Start the scheduler with a heartbeat job until ctrl-c
//! - `config`: Print the effective scheduler configuration

use cadence_scheduler::SchedulerConfig;
use clap::{Args, Parser, Subcommand};
use miette::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod daemon;

/// Parse boolean from environment variable, accepting common truthy values.
/// Accepts "1", "true", "yes", "on" (case-insensitive) as true.
/// Accepts "0", "false", "no", "off", "" (case-insensitive) as false.
fn parse_bool_env(s: &str) -> Result<bool, String> {
    match s.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(format!(
            "invalid boolean value '{s}', expected 1/true/yes/on or 0/false/no/off"
        )),
    }
}

#[derive(Parser)]
#[command(name = "cadence")]
#[command(about = "In-process job scheduler", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Scheduler settings shared by every subcommand.
#[derive(Args, Debug, Clone)]
struct SchedulerArgs {
    /// Maximum number of jobs running at once
    #[arg(long, env = "CADENCE_WORKER_THREADS", default_value = "10")]
    worker_threads: usize,

    /// Dispatcher idle wait in milliseconds
    #[arg(long, env = "CADENCE_IDLE_WAIT_MS", default_value = "30000")]
    idle_wait_ms: u64,

    /// Random variance subtracted from each idle wait, in milliseconds
    #[arg(long, env = "CADENCE_IDLE_WAIT_JITTER_MS", default_value = "7000")]
    idle_wait_jitter_ms: u64,

    /// How late a trigger may be before it counts as misfired, in milliseconds
    #[arg(long, env = "CADENCE_MISFIRE_THRESHOLD_MS", default_value = "5000")]
    misfire_threshold_ms: u64,

    /// Keep exhausted triggers in the complete state instead of removing them.
    /// Accepts "1", "true", "yes", or "on".
    #[arg(
        long,
        env = "CADENCE_RETAIN_COMPLETED",
        action = clap::ArgAction::Set,
        value_parser = parse_bool_env,
        default_value = "false"
    )]
    retain_completed: bool,

    /// Seconds to wait for running jobs on shutdown
    #[arg(long, env = "CADENCE_SHUTDOWN_TIMEOUT_SECS", default_value = "30")]
    shutdown_timeout_secs: u64,
}

impl From<SchedulerArgs> for SchedulerConfig {
    fn from(args: SchedulerArgs) -> Self {
        SchedulerConfig {
            worker_threads: args.worker_threads,
            idle_wait_ms: args.idle_wait_ms,
            idle_wait_jitter_ms: args.idle_wait_jitter_ms,
            misfire_threshold_ms: args.misfire_threshold_ms,
            retain_completed_triggers: args.retain_completed,
            shutdown_timeout_secs: args.shutdown_timeout_secs,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler until interrupted
    Run {
        #[command(flatten)]
        scheduler: SchedulerArgs,

        /// Heartbeat interval in seconds
        #[arg(long, env = "CADENCE_HEARTBEAT_INTERVAL", default_value = "60")]
        heartbeat_interval: u64,

        /// Number of heartbeats after the first; runs forever when omitted
        #[arg(long, env = "CADENCE_HEARTBEAT_REPEAT")]
        heartbeat_repeat: Option<u64>,
    },

    /// Print the effective configuration as JSON
    Config {
        #[command(flatten)]
        scheduler: SchedulerArgs,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "cadence=info,cadence_scheduler=info".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            scheduler,
            heartbeat_interval,
            heartbeat_repeat,
        } => daemon::run(scheduler.into(), heartbeat_interval, heartbeat_repeat).await,

        Commands::Config { scheduler } => {
            let config = SchedulerConfig::from(scheduler);
            config.validate().map_err(|e| miette::miette!("{}", e))?;
            let json = serde_json::to_string_pretty(&config)
                .map_err(|e| miette::miette!("failed to serialize config: {}", e))?;
            println!("{json}");
            Ok(())
        }
    }
}
