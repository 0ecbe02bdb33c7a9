//! # colearn
//!
//! Runs the online handover learner and inspects learned Q-tables.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colearn_core::{
    CoLearnConfig, EpisodeOrchestrator, EpisodeRecorder, FeedLine, PHASE_COUNT, QTable, Record,
    SimulatedHardware, State, read_feed, spawn_feed,
};
use colearn_proto::EventBus;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// CoLearn - online reinforcement learning for robot-to-human handovers
#[derive(Parser, Debug)]
#[command(name = "colearn", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, default_value = "colearn.yml", global = true)]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run handover episodes
    Run(RunArgs),

    /// Print the greedy policy and Q-values of a saved table
    Inspect(InspectArgs),
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Number of episodes (overrides run.num_test_runs)
    #[arg(short, long)]
    episodes: Option<u32>,

    /// Run without the event bus, using the diagnostic reward
    #[arg(long)]
    offline: bool,

    /// JSONL file of inbound events to replay into the bus
    #[arg(long)]
    events: Option<PathBuf>,

    /// Q-table file to load and save (overrides persistence.q_table_path)
    #[arg(long)]
    q_table: Option<PathBuf>,

    /// Scale applied to the loaded Q-table
    #[arg(long)]
    persistence_factor: Option<f64>,

    /// Initial exploration factor (overrides exploration.initial)
    #[arg(long)]
    exploration: Option<f64>,

    /// Seed for reproducible exploration
    #[arg(long)]
    seed: Option<u64>,

    /// Write status broadcasts and episode summaries to a JSONL file
    #[arg(long)]
    record: Option<PathBuf>,
}

#[derive(Parser, Debug)]
struct InspectArgs {
    /// Q-table file
    table: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG takes precedence over --verbose
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    match cli.command {
        Commands::Run(args) => run_command(&cli.config, args).await,
        Commands::Inspect(args) => inspect_command(&args),
    }
}

fn load_config(path: &Path) -> Result<CoLearnConfig> {
    if path.exists() {
        CoLearnConfig::from_file(path).with_context(|| format!("Failed to load config from {:?}", path))
    } else {
        warn!("Config file {:?} not found, using defaults", path);
        Ok(CoLearnConfig::default())
    }
}

fn apply_overrides(config: &mut CoLearnConfig, args: &RunArgs) {
    if let Some(episodes) = args.episodes {
        config.run.num_test_runs = episodes;
    }
    if args.offline {
        config.bus.offline = true;
    }
    if let Some(path) = &args.q_table {
        config.persistence.q_table_path = Some(path.clone());
    }
    if let Some(factor) = args.persistence_factor {
        config.persistence.persistence_factor = Some(factor);
    }
    if let Some(initial) = args.exploration {
        config.exploration.initial = initial;
    }
    if let Some(seed) = args.seed {
        config.exploration.seed = Some(seed);
    }
}

async fn run_command(config_path: &Path, args: RunArgs) -> Result<()> {
    let mut config = load_config(config_path)?;
    apply_overrides(&mut config, &args);
    for warning in config.validate().context("Invalid configuration")? {
        warn!("{warning}");
    }

    let (bus, feed) = connect_bus(args.events.as_deref(), config.bus.offline);
    let recorder = match &args.record {
        Some(path) => {
            let file = File::create(path).with_context(|| format!("Failed to create recording {:?}", path))?;
            let recorder = Arc::new(EpisodeRecorder::new(file));
            bus.add_observer(EpisodeRecorder::make_observer(Arc::clone(&recorder)));
            Some(recorder)
        }
        None => None,
    };

    let mut orchestrator = EpisodeOrchestrator::new(config, bus.clone(), SimulatedHardware::new())
        .context("Failed to initialise orchestrator")?;
    if let Some(recorder) = &recorder {
        orchestrator.on_episode_end(EpisodeRecorder::make_summary_observer(Arc::clone(recorder)));
    }

    if let Some(lines) = feed {
        info!(events = lines.len(), "Replaying event feed");
        spawn_feed(bus.clone(), lines).context("Failed to start event feed thread")?;
    }
    spawn_signal_handlers(&bus);

    let (result, episodes, elapsed_secs) = tokio::task::spawn_blocking(move || {
        let result = orchestrator.run();
        let state = orchestrator.state();
        (result, state.completed_episodes, state.elapsed().as_secs_f64())
    })
    .await
    .context("Orchestrator thread panicked")?;

    bus.clear_observers();

    let reason = match &result {
        Ok(reason) => *reason,
        Err(e) => {
            error!(error = %e, "Run aborted");
            e.termination_reason()
        }
    };

    if let Some(recorder) = recorder {
        recorder.record_meta(Record::meta_termination(reason, episodes, elapsed_secs));
        if let Err(e) = recorder.flush() {
            warn!(error = %e, "Failed to flush recording");
        }
    }

    info!(reason = reason.as_str(), episodes, elapsed_secs, "Run complete");
    let exit_code = reason.exit_code();
    if exit_code != 0 {
        std::process::exit(exit_code);
    }
    Ok(())
}

/// Builds the event bus.
///
/// Without a readable event source the bus is offline and the environment
/// falls back to the diagnostic reward.
fn connect_bus(events: Option<&Path>, offline: bool) -> (EventBus, Option<Vec<FeedLine>>) {
    let Some(path) = events else {
        return (EventBus::offline(), None);
    };
    if offline {
        warn!("Ignoring event feed {:?} in offline mode", path);
        return (EventBus::offline(), None);
    }

    match read_feed(path) {
        Ok(feed) => {
            if !feed.malformed.is_empty() {
                warn!(malformed = feed.malformed.len(), "Skipped malformed event feed lines");
            }
            (EventBus::connected(), Some(feed.lines))
        }
        Err(e) => {
            let error = colearn_proto::Error::BusUnavailable(format!("{}: {e}", path.display()));
            warn!(error = %error, "Continuing offline");
            (EventBus::offline(), None)
        }
    }
}

/// Signals request a cooperative shutdown; a blocked reward wait is released
/// and the current table is persisted on the way out.
fn spawn_signal_handlers(bus: &EventBus) {
    let sigint = bus.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received (SIGINT), shutting down...");
            sigint.request_shutdown();
        }
    });

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let sigterm = bus.clone();
        tokio::spawn(async move {
            match signal(SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                    warn!("SIGTERM received, shutting down...");
                    sigterm.request_shutdown();
                }
                Err(e) => warn!(error = %e, "Failed to register SIGTERM handler"),
            }
        });
    }
}

fn inspect_command(args: &InspectArgs) -> Result<()> {
    let table = QTable::load(&args.table)
        .with_context(|| format!("Failed to load Q-table from {:?}", args.table))?;

    println!("{} states x {} phases", State::all().count(), PHASE_COUNT);
    println!("{:>5}  {:<17} {:<19} values", "state", "phase", "greedy");
    for state in State::all() {
        let phase = state.phase();
        let greedy = table.greedy(state, phase);
        let values: Vec<String> = table.row(state).iter().map(|v| format!("{v:8.3}")).collect();
        println!(
            "{:>5}  {:<17} {:<19} [{}]",
            state.index(),
            phase.as_str(),
            greedy.as_str(),
            values.join(", ")
        );
    }
    Ok(())
}
