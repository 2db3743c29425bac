// eqvio_sim/src/simulation/mod.rs

pub mod imu;
pub mod tracker;
pub mod trajectory;
pub mod world;

use anyhow::Result;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::info;

use eqvio_core::messages::{CameraMeasurement, ImuMeasurement, SensorInput, Timestamped};
use eqvio_core::vision::PinholeCamera;

use crate::config::ScenarioConfig;
use imu::ImuSimulator;
use tracker::SyntheticTracker;
use trajectory::Trajectory;
use world::LandmarkField;

/// Independent ChaCha streams so each generator draws the same numbers
/// regardless of how many samples the others consume.
const WORLD_STREAM: u64 = 0;
const IMU_STREAM: u64 = 1;
const CAMERA_STREAM: u64 = 2;

fn stream_rng(seed: u64, stream: u64) -> ChaCha8Rng {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    rng.set_stream(stream);
    rng
}

/// Everything one run needs: sensor streams and the truth they came from.
#[derive(Debug, Clone)]
pub struct SyntheticDataset {
    pub seed: u64,
    pub trajectory: Trajectory,
    pub world: LandmarkField,
    pub imu: Vec<ImuMeasurement>,
    pub frames: Vec<CameraMeasurement>,
}

impl SyntheticDataset {
    pub fn generate(config: &ScenarioConfig, seed: u64) -> Result<Self> {
        let trajectory = Trajectory::new(config.trajectory.clone());
        let center = nalgebra::Vector3::from(config.trajectory.start_position);
        let world = LandmarkField::generate(&config.world, center, &mut stream_rng(seed, WORLD_STREAM))?;

        let duration = config.simulation.duration_seconds;

        let mut imu_rng = stream_rng(seed, IMU_STREAM);
        let mut imu_sim = ImuSimulator::new(&config.sensors, config.filter.state.gravity)?;
        let num_imu = (duration * config.sensors.imu_rate).floor() as usize + 1;
        let imu = (0..num_imu)
            .map(|k| {
                let t = k as f64 / config.sensors.imu_rate;
                imu_sim.measure(&trajectory.sample(t), &mut imu_rng)
            })
            .collect();

        let camera = PinholeCamera::new(
            config.filter.camera.distortion.clone(),
            config.filter.state.initial_camera_intrinsics,
            config.filter.camera.width,
            config.filter.camera.height,
        )
        .shared();
        let mut camera_rng = stream_rng(seed, CAMERA_STREAM);
        let mut tracker = SyntheticTracker::new(
            camera,
            config.filter.state.initial_camera_extrinsics,
            &config.sensors,
            world.len(),
        )?;
        let num_frames = (duration * config.sensors.camera_rate).floor() as usize + 1;
        let frames: Vec<CameraMeasurement> = (0..num_frames)
            .map(|k| {
                let t = k as f64 / config.sensors.camera_rate;
                tracker.observe(t, &trajectory.pose(t), &world, &mut camera_rng)
            })
            .collect();

        let mean_features =
            frames.iter().map(|f| f.features.len()).sum::<usize>() as f64 / frames.len().max(1) as f64;
        info!(
            seed,
            imu_samples = num_imu,
            frames = frames.len(),
            landmarks = world.len(),
            mean_features,
            "synthetic dataset generated"
        );

        Ok(Self {
            seed,
            trajectory,
            world,
            imu,
            frames,
        })
    }

    /// Both streams merged in timestamp order; a frame sorts after an IMU
    /// sample with the same timestamp.
    pub fn interleaved(&self) -> Vec<SensorInput> {
        let mut inputs: Vec<SensorInput> = self
            .imu
            .iter()
            .copied()
            .map(SensorInput::Imu)
            .chain(self.frames.iter().cloned().map(SensorInput::Camera))
            .collect();
        inputs.sort_by(|a, b| {
            a.timestamp()
                .total_cmp(&b.timestamp())
                .then_with(|| matches!(a, SensorInput::Camera(_)).cmp(&matches!(b, SensorInput::Camera(_))))
        });
        inputs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn short_config() -> ScenarioConfig {
        let mut config = ScenarioConfig::default();
        config.simulation.duration_seconds = 2.0;
        config
    }

    #[test]
    fn test_dataset_rates_and_ordering() {
        let dataset = SyntheticDataset::generate(&short_config(), 4).unwrap();
        assert_eq!(dataset.imu.len(), 401);
        assert_eq!(dataset.frames.len(), 41);
        assert!(dataset.frames.iter().any(|f| !f.features.is_empty()));

        let inputs = dataset.interleaved();
        assert_eq!(inputs.len(), 442);
        assert!(inputs.windows(2).all(|w| w[0].timestamp() <= w[1].timestamp()));
        assert!(matches!(inputs[0], SensorInput::Imu(_)));
        assert!(matches!(inputs[1], SensorInput::Camera(_)));
    }

    #[test]
    fn test_generation_is_deterministic() {
        let a = SyntheticDataset::generate(&short_config(), 99).unwrap();
        let b = SyntheticDataset::generate(&short_config(), 99).unwrap();
        assert_eq!(a.imu, b.imu);
        assert_eq!(a.frames, b.frames);

        let c = SyntheticDataset::generate(&short_config(), 100).unwrap();
        assert_ne!(a.imu, c.imu);
    }
}
