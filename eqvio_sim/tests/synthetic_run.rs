// eqvio_sim/tests/synthetic_run.rs

use std::path::PathBuf;

use eqvio_core::estimation::{Msceqf, StateEstimator};
use eqvio_sim::runner::run_sequential;
use eqvio_sim::{run, RunMode, ScenarioConfig, SyntheticDataset};

fn default_scenario() -> ScenarioConfig {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("assets/scenarios/default.toml");
    ScenarioConfig::load(&path).expect("bundled scenario loads")
}

#[test]
fn bundled_scenario_is_valid() {
    let config = default_scenario();
    assert_eq!(config.simulation.seed, Some(42));
    assert_eq!(config.filter.state.num_clones, 10);
    // Longer than the 0.5 s the clones span at 20 Hz.
    assert_eq!(config.filter.persistent_feature_init_delay, 1.0);
    assert_eq!(config.sensors.initial_accel_bias, [0.02, -0.01, 0.03]);
}

#[test]
fn filter_tracks_figure_eight() {
    let mut config = default_scenario();
    config.simulation.duration_seconds = 10.0;
    let summary = run(&config, RunMode::Sequential).unwrap();

    assert!(summary.initialized_at.is_some());
    assert!(summary.frames_processed > 150);
    assert!(summary.accepted > summary.rejected);
    assert!(summary.landmarks_added > 0);

    let estimate = summary.final_estimate.as_ref().unwrap();
    for block in [
        &estimate.attitude_covariance,
        &estimate.velocity_covariance,
        &estimate.position_covariance,
    ] {
        assert!(block.iter().all(|v| v.is_finite()));
        assert!(block.diagonal().iter().all(|v| *v > 0.0));
    }
    // Eight seconds of motion with vision; dead reckoning alone drifts
    // by metres over the same span.
    let error = summary.final_position_error.unwrap();
    assert!(error < 1.0, "final position error {error}");
    assert!(summary.final_attitude_error_deg.unwrap() < 5.0);
}

#[test]
fn covariance_stays_positive_semidefinite() {
    let mut config = default_scenario();
    config.simulation.duration_seconds = 6.0;
    let dataset = SyntheticDataset::generate(&config, 5).unwrap();
    let mut filter = Msceqf::new(config.filter.clone()).unwrap();

    let mut checked = 0;
    for input in dataset.interleaved() {
        let reports = filter.process(&input).unwrap();
        if !reports.is_empty() {
            let state = filter.state().unwrap();
            state.check_covariance("test").unwrap();
            assert!(state.num_clones() <= state.max_clones());
            assert!(state.num_landmarks() <= state.max_landmarks());
            checked += 1;
        }
    }
    assert!(checked > 50);
}

#[test]
fn repeated_runs_are_deterministic() {
    let mut config = default_scenario();
    config.simulation.duration_seconds = 3.0;
    let dataset = SyntheticDataset::generate(&config, 8).unwrap();

    let a = run_sequential(Box::new(Msceqf::new(config.filter.clone()).unwrap()), &dataset).unwrap();
    let b = run_sequential(Box::new(Msceqf::new(config.filter.clone()).unwrap()), &dataset).unwrap();
    assert_eq!(a.frames_processed, b.frames_processed);
    assert_eq!(a.final_estimate, b.final_estimate);
}
