// eqvio_core/src/options.rs

//! Startup options of the filter.
//!
//! Every struct deserializes from TOML with defaults for missing fields and
//! rejects unknown keys. Covariance blocks are written as lists of standard
//! deviations and expanded to diagonal matrices on load. [`MsceqfOptions::validate`]
//! must pass before a filter is built from the options.

use nalgebra::{Isometry3, Matrix4, Matrix6, Translation3, UnitQuaternion, Vector3};
use serde::Deserialize;

use crate::error::ConfigError;
use crate::groups::Intrinsics;
use crate::serde_helpers;
use crate::types::Matrix9;
use crate::vision::camera::DistortionModel;

// =========================================================================
// == Feature Representation ==
// =========================================================================

/// Parameterization used for persistent landmarks in the state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FeatureRepresentation {
    /// World-frame point `p_W`.
    Euclidean,
    /// Azimuth, elevation and distance from the anchor camera.
    AnchoredPolar,
    /// Normalized anchor-frame coordinates and inverse depth.
    #[default]
    AnchoredInverseDepth,
}

// =========================================================================
// == State ==
// =========================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct StateOptions {
    /// Initial standard deviations of `[φ, ν, ρ]`.
    #[serde(deserialize_with = "serde_helpers::covariance_from_std")]
    pub d_init_cov: Matrix9,
    /// Initial standard deviations of the extrinsic error `[φ, ρ]`.
    #[serde(deserialize_with = "serde_helpers::covariance_from_std")]
    pub delta_init_cov: Matrix6<f64>,
    /// Initial standard deviations of `[b_ω, b_a]`.
    #[serde(deserialize_with = "serde_helpers::covariance_from_std")]
    pub e_init_cov: Matrix6<f64>,
    /// Initial standard deviations of the intrinsics error.
    #[serde(deserialize_with = "serde_helpers::covariance_from_std")]
    pub l_init_cov: Matrix4<f64>,

    /// `T_IC`, the camera pose in the IMU frame.
    #[serde(deserialize_with = "serde_helpers::isometry_from_pose")]
    pub initial_camera_extrinsics: Isometry3<f64>,
    pub initial_camera_intrinsics: Intrinsics,

    pub enable_camera_extrinsics_calibration: bool,
    pub enable_camera_intrinsics_calibration: bool,

    /// Gravity magnitude in m/s².
    pub gravity: f64,
    pub num_clones: usize,
    pub num_persistent_features: usize,

    #[serde(deserialize_with = "serde_helpers::vec3")]
    pub gyro_bias_prior: Vector3<f64>,
    #[serde(deserialize_with = "serde_helpers::vec3")]
    pub accel_bias_prior: Vector3<f64>,
}

impl Default for StateOptions {
    fn default() -> Self {
        Self {
            d_init_cov: Matrix9::from_diagonal(&nalgebra::SVector::<f64, 9>::from_column_slice(&[
                1e-4, 1e-4, 1e-6, 1e-2, 1e-2, 1e-2, 1e-6, 1e-6, 1e-6,
            ])),
            delta_init_cov: Matrix6::from_diagonal(&nalgebra::Vector6::new(
                1e-4, 1e-4, 1e-4, 1e-4, 1e-4, 1e-4,
            )),
            e_init_cov: Matrix6::from_diagonal(&nalgebra::Vector6::new(
                1e-4, 1e-4, 1e-4, 1e-2, 1e-2, 1e-2,
            )),
            l_init_cov: Matrix4::from_diagonal(&nalgebra::Vector4::new(1e-4, 1e-4, 1e-4, 1e-4)),
            initial_camera_extrinsics: Isometry3::from_parts(
                Translation3::new(-0.0216, -0.0647, 0.0098),
                UnitQuaternion::from_euler_angles(0.0, 0.0, std::f64::consts::FRAC_PI_2),
            ),
            initial_camera_intrinsics: Intrinsics::new(458.654, 457.296, 367.215, 248.375),
            enable_camera_extrinsics_calibration: true,
            enable_camera_intrinsics_calibration: true,
            gravity: 9.81,
            num_clones: 10,
            num_persistent_features: 20,
            gyro_bias_prior: Vector3::zeros(),
            accel_bias_prior: Vector3::zeros(),
        }
    }
}

// =========================================================================
// == Initializer ==
// =========================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct InitializerOptions {
    /// Maximum mean pixel displacement over the window.
    pub disparity_threshold: f64,
    /// Maximum sample variance of the specific force over the window, (m/s²)².
    pub acc_threshold: f64,
    /// Window length in seconds.
    pub imu_init_window: f64,
}

impl Default for InitializerOptions {
    fn default() -> Self {
        Self {
            disparity_threshold: 1.0,
            acc_threshold: 0.2,
            imu_init_window: 1.0,
        }
    }
}

// =========================================================================
// == Updater ==
// =========================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct UpdaterOptions {
    /// Pixel measurement noise standard deviation.
    pub pixel_std: f64,
    /// Confidence level of the per-feature chi-square gate.
    pub chi2_confidence: f64,
    /// Shortest track (in clones) used for a multi-clone-constraint update.
    pub min_msc_track_length: usize,
    /// Consecutive gate failures after which a landmark is dropped.
    pub max_persistent_feature_failures: usize,
    pub persistent_feature_representation: FeatureRepresentation,
}

impl Default for UpdaterOptions {
    fn default() -> Self {
        Self {
            pixel_std: 1.0,
            chi2_confidence: 0.95,
            min_msc_track_length: 3,
            max_persistent_feature_failures: 3,
            persistent_feature_representation: FeatureRepresentation::default(),
        }
    }
}

// =========================================================================
// == Camera ==
// =========================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct CameraOptions {
    pub distortion: DistortionModel,
    pub width: u32,
    pub height: u32,
}

impl Default for CameraOptions {
    fn default() -> Self {
        Self {
            distortion: DistortionModel::Radtan {
                coefficients: [-0.28340811, 0.07395907, 0.00019359, 1.76187114e-05],
            },
            width: 752,
            height: 480,
        }
    }
}

// =========================================================================
// == Top-Level Options ==
// =========================================================================

/// # MsceqfOptions
/// Everything needed to construct a running filter.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct MsceqfOptions {
    pub state: StateOptions,
    pub initializer: InitializerOptions,
    pub updater: UpdaterOptions,
    pub camera: CameraOptions,

    /// Track age in seconds before a feature is promoted to a landmark.
    pub persistent_feature_init_delay: f64,
    /// Highest power of `A dt` kept in the transition matrix series.
    pub state_transition_order: usize,

    pub angular_velocity_std: f64,
    pub acceleration_std: f64,
    pub angular_velocity_bias_std: f64,
    pub acceleration_bias_std: f64,

    pub imu_buffer_max_size: usize,
    pub frame_buffer_max_size: usize,
}

impl Default for MsceqfOptions {
    fn default() -> Self {
        Self {
            state: StateOptions::default(),
            initializer: InitializerOptions::default(),
            updater: UpdaterOptions::default(),
            camera: CameraOptions::default(),
            persistent_feature_init_delay: 1.0,
            state_transition_order: 1,
            angular_velocity_std: 1.6968e-4 * 200f64.sqrt(),
            acceleration_std: 2.0e-3 * 200f64.sqrt(),
            angular_velocity_bias_std: 1.9393e-5 * 200f64.sqrt(),
            acceleration_bias_std: 3.0e-3 * 200f64.sqrt(),
            imu_buffer_max_size: 1000,
            frame_buffer_max_size: 20,
        }
    }
}

fn positive(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::NotPositive { name, value })
    }
}

fn non_negative(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::Negative { name, value })
    }
}

fn at_least(name: &'static str, value: usize, min: usize) -> Result<(), ConfigError> {
    if value >= min {
        Ok(())
    } else {
        Err(ConfigError::TooSmall { name, value, min })
    }
}

/// Diagonal blocks loaded from standard deviations are always valid; blocks
/// built in code may not be.
fn covariance_block<const N: usize>(
    name: &'static str,
    block: &nalgebra::SMatrix<f64, N, N>,
) -> Result<(), ConfigError> {
    let symmetric = (block - block.transpose()).amax() <= 1e-12 * block.amax().max(1.0);
    let finite = block.iter().all(|v| v.is_finite());
    if !symmetric || !finite {
        return Err(ConfigError::InvalidCovariance { name });
    }
    let dynamic = nalgebra::DMatrix::from_column_slice(N, N, block.as_slice());
    let min_eigenvalue = dynamic.symmetric_eigenvalues().min();
    if min_eigenvalue < -1e-12 * block.amax().max(1.0) {
        return Err(ConfigError::InvalidCovariance { name });
    }
    Ok(())
}

impl StateOptions {
    pub fn validate(&self) -> Result<(), ConfigError> {
        covariance_block("d_init_cov", &self.d_init_cov)?;
        covariance_block("delta_init_cov", &self.delta_init_cov)?;
        covariance_block("e_init_cov", &self.e_init_cov)?;
        covariance_block("l_init_cov", &self.l_init_cov)?;
        positive("gravity", self.gravity)?;
        positive("initial_camera_intrinsics.fx", self.initial_camera_intrinsics.fx)?;
        positive("initial_camera_intrinsics.fy", self.initial_camera_intrinsics.fy)?;
        at_least("num_clones", self.num_clones, 2)?;
        Ok(())
    }
}

impl InitializerOptions {
    pub fn validate(&self) -> Result<(), ConfigError> {
        non_negative("disparity_threshold", self.disparity_threshold)?;
        positive("acc_threshold", self.acc_threshold)?;
        positive("imu_init_window", self.imu_init_window)?;
        Ok(())
    }
}

impl UpdaterOptions {
    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("pixel_std", self.pixel_std)?;
        if !(self.chi2_confidence > 0.0 && self.chi2_confidence < 1.0) {
            return Err(ConfigError::OutOfRange {
                name: "chi2_confidence",
                value: self.chi2_confidence,
                min: 0.0,
                max: 1.0,
            });
        }
        at_least("min_msc_track_length", self.min_msc_track_length, 2)?;
        Ok(())
    }
}

impl CameraOptions {
    pub fn validate(&self) -> Result<(), ConfigError> {
        at_least("camera.width", self.width as usize, 1)?;
        at_least("camera.height", self.height as usize, 1)?;
        Ok(())
    }
}

impl MsceqfOptions {
    /// Checks every threshold, size and noise level. Construction of a filter
    /// from options that fail here is refused.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.state.validate()?;
        self.initializer.validate()?;
        self.updater.validate()?;
        self.camera.validate()?;
        non_negative("persistent_feature_init_delay", self.persistent_feature_init_delay)?;
        non_negative("angular_velocity_std", self.angular_velocity_std)?;
        non_negative("acceleration_std", self.acceleration_std)?;
        non_negative("angular_velocity_bias_std", self.angular_velocity_bias_std)?;
        non_negative("acceleration_bias_std", self.acceleration_bias_std)?;
        at_least("imu_buffer_max_size", self.imu_buffer_max_size, 1)?;
        at_least("frame_buffer_max_size", self.frame_buffer_max_size, 1)?;
        if self.updater.min_msc_track_length > self.state.num_clones {
            return Err(ConfigError::TooSmall {
                name: "num_clones",
                value: self.state.num_clones,
                min: self.updater.min_msc_track_length,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_default_options_are_valid() {
        assert_eq!(MsceqfOptions::default().validate(), Ok(()));
    }

    #[test]
    fn test_negative_noise_is_rejected() {
        let options = MsceqfOptions {
            acceleration_std: -1.0,
            ..Default::default()
        };
        assert_eq!(
            options.validate(),
            Err(ConfigError::Negative {
                name: "acceleration_std",
                value: -1.0
            })
        );
    }

    #[test]
    fn test_zero_buffer_size_is_rejected() {
        let options = MsceqfOptions {
            imu_buffer_max_size: 0,
            ..Default::default()
        };
        assert!(matches!(
            options.validate(),
            Err(ConfigError::TooSmall {
                name: "imu_buffer_max_size",
                ..
            })
        ));
    }

    #[test]
    fn test_confidence_outside_unit_interval_is_rejected() {
        let mut options = MsceqfOptions::default();
        options.updater.chi2_confidence = 1.0;
        assert!(matches!(
            options.validate(),
            Err(ConfigError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_indefinite_covariance_block_is_rejected() {
        let mut options = MsceqfOptions::default();
        options.state.l_init_cov[(0, 0)] = -1.0;
        assert_eq!(
            options.validate(),
            Err(ConfigError::InvalidCovariance { name: "l_init_cov" })
        );
    }

    #[test]
    fn test_covariance_from_std_squares_deviations() {
        use serde::de::value::{Error as ValueError, SeqDeserializer};
        let stds = vec![0.1_f64, 0.2, 0.3, 0.4];
        let cov: Matrix4<f64> = serde_helpers::covariance_from_std(
            SeqDeserializer::<_, ValueError>::new(stds.into_iter()),
        )
        .unwrap();
        assert_relative_eq!(cov[(1, 1)], 0.04, epsilon = 1e-15);
        assert_relative_eq!(cov[(0, 1)], 0.0);
    }
}
