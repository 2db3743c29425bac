// eqvio_core/src/serde_helpers.rs

//! Deserialization helpers that turn human-friendly TOML values into the
//! nalgebra types used by the options structs.

use nalgebra::{Isometry3, SMatrix, SVector, Translation3, UnitQuaternion, Vector3};
use serde::{de::Error, Deserialize, Deserializer};

/// Reads a list of `N` standard deviations and returns `diag(σ²)`.
pub fn covariance_from_std<'de, D, const N: usize>(
    deserializer: D,
) -> Result<SMatrix<f64, N, N>, D::Error>
where
    D: Deserializer<'de>,
{
    let stds: Vec<f64> = Deserialize::deserialize(deserializer)?;
    if stds.len() != N {
        return Err(D::Error::invalid_length(
            stds.len(),
            &format!("{} standard deviations", N).as_str(),
        ));
    }
    if let Some(s) = stds.iter().find(|s| !s.is_finite() || **s < 0.0) {
        return Err(D::Error::custom(format!(
            "standard deviation must be finite and non-negative, got {}",
            s
        )));
    }
    let variances = SVector::<f64, N>::from_iterator(stds.iter().map(|s| s * s));
    Ok(SMatrix::from_diagonal(&variances))
}

pub fn vec3<'de, D>(deserializer: D) -> Result<Vector3<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let arr: [f64; 3] = Deserialize::deserialize(deserializer)?;
    Ok(Vector3::from(arr))
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct PoseConfig {
    #[serde(default)]
    translation: [f64; 3],
    /// Roll, pitch, yaw in degrees.
    #[serde(default)]
    rotation: [f64; 3],
}

/// Reads `{ translation = [x, y, z], rotation = [roll, pitch, yaw] }` with the
/// angles in degrees.
pub fn isometry_from_pose<'de, D>(deserializer: D) -> Result<Isometry3<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let pose = PoseConfig::deserialize(deserializer)?;
    Ok(Isometry3::from_parts(
        Translation3::from(Vector3::from(pose.translation)),
        UnitQuaternion::from_euler_angles(
            pose.rotation[0].to_radians(),
            pose.rotation[1].to_radians(),
            pose.rotation[2].to_radians(),
        ),
    ))
}
