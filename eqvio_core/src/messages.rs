// eqvio_core/src/messages.rs

use std::collections::BTreeMap;

use nalgebra::{Isometry3, Matrix3, Vector2, Vector3};

use crate::groups::Intrinsics;
use crate::types::FeatureId;

// =========================================================================
// == Sensor Data Structures ==
// =========================================================================

/// Anything that can be ordered on the sensor timeline.
pub trait Timestamped {
    fn timestamp(&self) -> f64;
}

/// One inertial sample: body-frame angular velocity and specific force.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImuMeasurement {
    pub timestamp: f64,
    pub angular_velocity: Vector3<f64>,
    pub acceleration: Vector3<f64>,
}

impl ImuMeasurement {
    pub fn new(timestamp: f64, angular_velocity: Vector3<f64>, acceleration: Vector3<f64>) -> Self {
        Self {
            timestamp,
            angular_velocity,
            acceleration,
        }
    }

    /// Linear interpolation between two samples at time `t`. `t` outside
    /// `[a.timestamp, b.timestamp]` is clamped to the nearest sample.
    pub fn interpolate(a: &Self, b: &Self, t: f64) -> Self {
        let span = b.timestamp - a.timestamp;
        if span <= 0.0 {
            return Self { timestamp: t, ..*b };
        }
        let s = ((t - a.timestamp) / span).clamp(0.0, 1.0);
        Self {
            timestamp: t,
            angular_velocity: a.angular_velocity.lerp(&b.angular_velocity, s),
            acceleration: a.acceleration.lerp(&b.acceleration, s),
        }
    }
}

impl Timestamped for ImuMeasurement {
    fn timestamp(&self) -> f64 {
        self.timestamp
    }
}

/// Feature observations from one image, keyed by the tracker's feature id.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CameraMeasurement {
    pub timestamp: f64,
    /// Pixel coordinates. Raw when coming from the tracker, undistorted once
    /// they reach the updater.
    pub features: BTreeMap<FeatureId, Vector2<f64>>,
}

impl CameraMeasurement {
    pub fn new(timestamp: f64, features: BTreeMap<FeatureId, Vector2<f64>>) -> Self {
        Self {
            timestamp,
            features,
        }
    }
}

impl Timestamped for CameraMeasurement {
    fn timestamp(&self) -> f64 {
        self.timestamp
    }
}

// =========================================================================
// == Core Message Enums ==
// =========================================================================

/// The universal input packet for all `StateEstimator` implementations.
#[derive(Debug, Clone)]
pub enum SensorInput {
    Imu(ImuMeasurement),
    Camera(CameraMeasurement),
}

impl Timestamped for SensorInput {
    fn timestamp(&self) -> f64 {
        match self {
            SensorInput::Imu(m) => m.timestamp,
            SensorInput::Camera(m) => m.timestamp,
        }
    }
}

// =========================================================================
// == Public API Messages ==
// =========================================================================

/// The estimator's output: navigation state and calibration, with the
/// navigation uncertainty reported in the body frame.
#[derive(Debug, Clone, PartialEq)]
pub struct StateEstimate {
    pub timestamp: f64,
    /// `T_WI`.
    pub pose: Isometry3<f64>,
    pub velocity: Vector3<f64>,
    pub gyro_bias: Vector3<f64>,
    pub accel_bias: Vector3<f64>,
    /// `T_IC`.
    pub camera_extrinsics: Isometry3<f64>,
    pub camera_intrinsics: Intrinsics,
    pub attitude_covariance: Matrix3<f64>,
    pub velocity_covariance: Matrix3<f64>,
    pub position_covariance: Matrix3<f64>,
}
