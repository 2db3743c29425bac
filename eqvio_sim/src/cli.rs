// eqvio_sim/src/cli.rs

use clap::Parser;
use std::path::PathBuf;

/// Runs the visual-inertial filter on a synthetic scenario and reports its
/// accuracy against ground truth.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// The path to the scenario TOML file to run.
    #[arg(short, long, default_value = "assets/scenarios/default.toml")]
    pub scenario: PathBuf,

    /// Overrides `simulation.seed` from the scenario.
    #[arg(long)]
    pub seed: Option<u64>,

    /// Overrides `simulation.duration_seconds` from the scenario.
    #[arg(short, long)]
    pub duration: Option<f64>,

    /// Feed the filter from the calling thread instead of producer threads.
    #[arg(long, default_value_t = false)]
    pub sequential: bool,
}
