// eqvio_sim/src/config.rs

use std::path::Path;

use anyhow::{ensure, Context, Result};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::Deserialize;

use eqvio_core::options::MsceqfOptions;

// =========================================================================
// == Top-Level Configuration ==
// =========================================================================

/// # ScenarioConfig
/// The root of a `scenario.toml` file: what to simulate and how the filter
/// under test is configured.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ScenarioConfig {
    pub simulation: Simulation,
    pub trajectory: TrajectoryConfig,
    pub world: World,
    pub sensors: SensorsConfig,
    pub filter: MsceqfOptions,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        let mut filter = MsceqfOptions::default();
        filter.initializer.disparity_threshold = 3.0;
        filter.angular_velocity_std = 2.0e-3;
        filter.acceleration_std = 2.0e-2;
        filter.angular_velocity_bias_std = 1.0e-4;
        filter.acceleration_bias_std = 1.0e-3;
        Self {
            simulation: Simulation::default(),
            trajectory: TrajectoryConfig::default(),
            world: World::default(),
            sensors: SensorsConfig::default(),
            filter,
        }
    }
}

impl ScenarioConfig {
    /// Reads a scenario file, then applies `EQVIO_`-prefixed environment
    /// overrides (`EQVIO_SIMULATION__SEED=3` sets `simulation.seed`).
    pub fn load(path: &Path) -> Result<Self> {
        ensure!(path.exists(), "scenario file {} does not exist", path.display());
        let config: ScenarioConfig = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("EQVIO_").split("__"))
            .extract()
            .with_context(|| format!("failed to parse scenario {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.simulation.duration_seconds > 0.0, "simulation.duration_seconds must be positive");
        ensure!(self.sensors.imu_rate > 0.0, "sensors.imu_rate must be positive");
        ensure!(self.sensors.camera_rate > 0.0, "sensors.camera_rate must be positive");
        ensure!(
            self.sensors.camera_rate <= self.sensors.imu_rate,
            "sensors.camera_rate must not exceed sensors.imu_rate"
        );
        ensure!(self.sensors.pixel_std >= 0.0, "sensors.pixel_std must be non-negative");
        ensure!(
            (0.0..1.0).contains(&self.sensors.track_loss_probability),
            "sensors.track_loss_probability must lie in [0, 1)"
        );
        ensure!(self.world.num_landmarks > 0, "world.num_landmarks must be positive");
        ensure!(
            0.0 < self.world.min_distance && self.world.min_distance < self.world.max_distance,
            "world distances must satisfy 0 < min_distance < max_distance"
        );
        ensure!(
            self.trajectory.static_duration >= self.filter.initializer.imu_init_window,
            "trajectory.static_duration must cover the initializer window"
        );
        self.filter.validate()?;
        Ok(())
    }
}

// =========================================================================
// == Configuration Sub-Structs ==
// =========================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Simulation {
    /// Optional seed for the pseudo-random number generator for determinism.
    pub seed: Option<u64>,
    /// Duration of the simulation in seconds.
    pub duration_seconds: f64,
}

impl Default for Simulation {
    fn default() -> Self {
        Self {
            seed: None,
            duration_seconds: 20.0,
        }
    }
}

/// A figure-eight with a gentle vertical wave, preceded by a static phase
/// for the initializer.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct TrajectoryConfig {
    pub start_position: [f64; 3],
    /// Seconds at rest before the motion starts.
    pub static_duration: f64,
    /// Seconds over which the motion amplitude ramps up from zero.
    pub ramp_duration: f64,
    /// Amplitude of the x, y and z oscillations in metres.
    pub amplitude: [f64; 3],
    /// Base frequency of the pattern in Hz.
    pub frequency: f64,
    pub yaw_amplitude_deg: f64,
    pub tilt_amplitude_deg: f64,
}

impl Default for TrajectoryConfig {
    fn default() -> Self {
        Self {
            start_position: [0.0, 0.0, 1.0],
            static_duration: 2.0,
            ramp_duration: 1.0,
            amplitude: [2.0, 1.5, 0.3],
            frequency: 0.15,
            yaw_amplitude_deg: 30.0,
            tilt_amplitude_deg: 5.0,
        }
    }
}

/// Landmarks scattered on a spherical shell around the start position.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct World {
    pub num_landmarks: usize,
    pub min_distance: f64,
    pub max_distance: f64,
}

impl Default for World {
    fn default() -> Self {
        Self {
            num_landmarks: 600,
            min_distance: 5.0,
            max_distance: 9.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SensorsConfig {
    pub imu_rate: f64,
    pub camera_rate: f64,
    /// Continuous-time white noise densities.
    pub gyro_noise_density: f64,
    pub accel_noise_density: f64,
    /// Continuous-time bias random walk densities.
    pub gyro_bias_random_walk: f64,
    pub accel_bias_random_walk: f64,
    pub initial_gyro_bias: [f64; 3],
    pub initial_accel_bias: [f64; 3],
    /// Pixel noise standard deviation of the synthetic tracker.
    pub pixel_std: f64,
    /// Largest number of features reported per frame.
    pub max_features: usize,
    /// Per-frame probability that a visible track is lost and re-detected
    /// under a new id.
    pub track_loss_probability: f64,
}

impl Default for SensorsConfig {
    fn default() -> Self {
        Self {
            imu_rate: 200.0,
            camera_rate: 20.0,
            gyro_noise_density: 1.0e-3,
            accel_noise_density: 1.0e-2,
            gyro_bias_random_walk: 2.0e-5,
            accel_bias_random_walk: 3.0e-4,
            initial_gyro_bias: [0.0; 3],
            initial_accel_bias: [0.0; 3],
            pixel_std: 0.5,
            max_features: 60,
            track_loss_probability: 0.02,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        ScenarioConfig::default().validate().unwrap();
    }

    #[test]
    fn test_load_merges_file_over_defaults() {
        let dir = std::env::temp_dir().join(format!("eqvio_sim_config_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("scenario.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "[simulation]\nseed = 11\nduration_seconds = 5.0\n\n[filter.updater]\npixel_std = 2.0\n"
        )
        .unwrap();

        let config = ScenarioConfig::load(&path).unwrap();
        assert_eq!(config.simulation.seed, Some(11));
        assert_eq!(config.simulation.duration_seconds, 5.0);
        assert_eq!(config.filter.updater.pixel_std, 2.0);
        assert_eq!(config.sensors.imu_rate, 200.0);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        let result: Result<ScenarioConfig, _> = Figment::new()
            .merge(Toml::string("[simulation]\nsed = 3\n"))
            .extract();
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(ScenarioConfig::load(Path::new("/definitely/not/here.toml")).is_err());
    }
}
