// eqvio_sim/src/lib.rs

//! Synthetic scenarios for exercising `eqvio_core`: an analytic trajectory,
//! a simulated IMU, a point-landmark world seen through a synthetic feature
//! tracker, and runners that feed the filter and score it against truth.

pub mod cli;
pub mod config;
pub mod runner;
pub mod simulation;

pub use config::ScenarioConfig;
pub use runner::{run, RunMode, RunSummary};
pub use simulation::SyntheticDataset;
