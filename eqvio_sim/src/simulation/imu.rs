// eqvio_sim/src/simulation/imu.rs

use anyhow::Result;
use nalgebra::Vector3;
use rand::Rng;
use rand_distr::{Distribution, Normal};

use eqvio_core::messages::ImuMeasurement;

use crate::config::SensorsConfig;
use crate::simulation::trajectory::TruthSample;

// =========================================================================
// == IMU Simulator ==
// =========================================================================

/// Turns true kinematics into noisy gyroscope and accelerometer readings with
/// slowly wandering biases.
///
/// The configured densities are continuous-time; at rate `f` the per-sample
/// white noise has standard deviation `density * sqrt(f)` and each bias takes
/// a random-walk step with standard deviation `walk / sqrt(f)`.
#[derive(Debug, Clone)]
pub struct ImuSimulator {
    gravity: f64,
    gyro_noise: [Normal<f64>; 3],
    accel_noise: [Normal<f64>; 3],
    gyro_walk: [Normal<f64>; 3],
    accel_walk: [Normal<f64>; 3],
    gyro_bias: Vector3<f64>,
    accel_bias: Vector3<f64>,
}

fn isotropic(std: f64) -> Result<[Normal<f64>; 3]> {
    Ok([Normal::new(0.0, std)?, Normal::new(0.0, std)?, Normal::new(0.0, std)?])
}

fn sample3<R: Rng + ?Sized>(dist: &[Normal<f64>; 3], rng: &mut R) -> Vector3<f64> {
    Vector3::new(dist[0].sample(rng), dist[1].sample(rng), dist[2].sample(rng))
}

impl ImuSimulator {
    pub fn new(config: &SensorsConfig, gravity: f64) -> Result<Self> {
        let sqrt_rate = config.imu_rate.sqrt();
        Ok(Self {
            gravity,
            gyro_noise: isotropic(config.gyro_noise_density * sqrt_rate)?,
            accel_noise: isotropic(config.accel_noise_density * sqrt_rate)?,
            gyro_walk: isotropic(config.gyro_bias_random_walk / sqrt_rate)?,
            accel_walk: isotropic(config.accel_bias_random_walk / sqrt_rate)?,
            gyro_bias: Vector3::from(config.initial_gyro_bias),
            accel_bias: Vector3::from(config.initial_accel_bias),
        })
    }

    pub fn gyro_bias(&self) -> Vector3<f64> {
        self.gyro_bias
    }

    pub fn accel_bias(&self) -> Vector3<f64> {
        self.accel_bias
    }

    /// The noise-free specific force and rate the sensor would measure.
    pub fn ideal(&self, truth: &TruthSample) -> (Vector3<f64>, Vector3<f64>) {
        let gravity = Vector3::new(0.0, 0.0, self.gravity);
        let specific_force = truth.pose.rotation.inverse() * (truth.acceleration + gravity);
        (truth.angular_velocity, specific_force)
    }

    /// Produces one reading and advances the biases by one sample period.
    pub fn measure<R: Rng + ?Sized>(&mut self, truth: &TruthSample, rng: &mut R) -> ImuMeasurement {
        let (omega, specific_force) = self.ideal(truth);
        let angular_velocity = omega + self.gyro_bias + sample3(&self.gyro_noise, rng);
        let acceleration = specific_force + self.accel_bias + sample3(&self.accel_noise, rng);

        self.gyro_bias += sample3(&self.gyro_walk, rng);
        self.accel_bias += sample3(&self.accel_walk, rng);

        ImuMeasurement::new(truth.timestamp, angular_velocity, acceleration)
    }
}
