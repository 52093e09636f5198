//! Command-line runner
//!
//! Loads a simulation configuration, runs every episode and prints a summary.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use gridsim::environment::EnvironmentSnapshot;
use gridsim::{EpisodeRecord, Id, Mode, SimulationConfig, SimulationEngine, StepObserver};
use tracing::{error, info};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    Learn,
    Test,
}

impl From<ModeArg> for Mode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Learn => Mode::Learn,
            ModeArg::Test => Mode::Test,
        }
    }
}

/// Grid-world multi-agent simulator
#[derive(Parser, Debug)]
#[command(name = "gridsim")]
#[command(about = "Run beacon or foraging episodes with scripted, Q-learning and genetic agents")]
struct Args {
    /// Simulation configuration (.json or .toml)
    #[arg(long, short = 'c')]
    config: PathBuf,

    /// Override the number of episodes
    #[arg(long)]
    episodes: Option<u32>,

    /// Override the step ceiling per episode
    #[arg(long)]
    max_steps: Option<u32>,

    /// Random seed for deterministic runs
    #[arg(long)]
    seed: Option<u64>,

    /// Force every agent into this mode
    #[arg(long, value_enum)]
    mode: Option<ModeArg>,

    /// Write per-episode metrics to this CSV file
    #[arg(long)]
    csv: Option<PathBuf>,

    /// Print the grid after every step
    #[arg(long)]
    render: bool,

    /// Save learned Q-tables and genomes into this directory
    #[arg(long)]
    save_dir: Option<PathBuf>,

    /// Load learned Q-tables and genomes from this directory
    #[arg(long)]
    load_dir: Option<PathBuf>,
}

/// Prints the grid to stdout.
struct AsciiRenderer;

impl StepObserver for AsciiRenderer {
    fn on_reset(&mut self, episode: u32, snapshot: &EnvironmentSnapshot) {
        println!("--- episode {} ---", episode);
        print!("{}", snapshot.render_ascii());
    }

    fn on_step(
        &mut self,
        _episode: u32,
        step: u32,
        snapshot: &EnvironmentSnapshot,
        rewards: &BTreeMap<Id, f64>,
    ) {
        let summary: Vec<String> = rewards
            .iter()
            .map(|(id, r)| format!("{}={:+.2}", id, r))
            .collect();
        println!("step {} [{}]", step, summary.join(" "));
        print!("{}", snapshot.render_ascii());
    }

    fn on_episode_end(&mut self, record: &EpisodeRecord) {
        println!("episode {} finished after {} steps", record.episode, record.steps);
    }
}

fn run(args: Args) -> gridsim::Result<()> {
    let mut config = SimulationConfig::from_path(&args.config)?;
    if let Some(episodes) = args.episodes {
        config.episodes = episodes;
    }
    if let Some(max_steps) = args.max_steps {
        config.max_steps = max_steps;
    }
    if args.seed.is_some() {
        config.seed = args.seed;
    }
    if let Some(mode) = args.mode {
        for agent in &mut config.agents {
            agent.mode = mode.into();
        }
    }

    let mut engine = SimulationEngine::from_config(&config)?;
    if let Some(dir) = &args.load_dir {
        let loaded = engine.load_agents(dir)?;
        info!(dir = %dir.display(), loaded, "learned state loaded");
    }
    if args.render {
        engine.set_observer(Box::new(AsciiRenderer));
    }

    let tracker = engine.run()?;
    println!("{}", tracker.summary());
    if let Some(path) = &args.csv {
        tracker.save_csv(path)?;
        info!(path = %path.display(), "metrics exported");
    }

    if let Some(dir) = &args.save_dir {
        let written = engine.save_agents(dir)?;
        info!(dir = %dir.display(), files = written.len(), "learned state saved");
    }
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("gridsim=info")),
        )
        .init();

    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
