// eqvio_core/src/vision/camera.rs

//! Pinhole camera with a closed set of lens distortion models.
//!
//! The filter only ever sees undistorted pixel coordinates; this module is the
//! coordinate transform between raw tracker output and that space.

use std::sync::Arc;

use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

use crate::groups::Intrinsics;

/// Fixed-point iterations used to invert the radial-tangential model.
const RADTAN_UNDISTORT_ITERATIONS: usize = 20;
/// Newton iterations used to invert the equidistant model.
const EQUIDISTANT_UNDISTORT_ITERATIONS: usize = 10;
const EPS: f64 = 1e-12;

/// Lens distortion family together with its coefficients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum DistortionModel {
    /// Radial-tangential, coefficients `(k1, k2, p1, p2)`.
    Radtan { coefficients: [f64; 4] },
    /// Equidistant fisheye, coefficients `(k1, k2, k3, k4)`.
    Equidistant { coefficients: [f64; 4] },
}

impl Default for DistortionModel {
    fn default() -> Self {
        DistortionModel::Radtan {
            coefficients: [0.0; 4],
        }
    }
}

impl DistortionModel {
    /// Applies the distortion to normalized image coordinates.
    pub fn distort(&self, xy: &Vector2<f64>) -> Vector2<f64> {
        match self {
            DistortionModel::Radtan {
                coefficients: [k1, k2, p1, p2],
            } => {
                let (x, y) = (xy.x, xy.y);
                let r2 = x * x + y * y;
                let radial = 1.0 + k1 * r2 + k2 * r2 * r2;
                Vector2::new(
                    x * radial + 2.0 * p1 * x * y + p2 * (r2 + 2.0 * x * x),
                    y * radial + p1 * (r2 + 2.0 * y * y) + 2.0 * p2 * x * y,
                )
            }
            DistortionModel::Equidistant {
                coefficients: [k1, k2, k3, k4],
            } => {
                let r = xy.norm();
                if r < EPS {
                    return *xy;
                }
                let theta = r.atan();
                let t2 = theta * theta;
                let theta_d = theta * (1.0 + t2 * (k1 + t2 * (k2 + t2 * (k3 + t2 * k4))));
                xy * (theta_d / r)
            }
        }
    }

    /// Removes the distortion from normalized image coordinates.
    pub fn undistort(&self, xy_d: &Vector2<f64>) -> Vector2<f64> {
        match self {
            DistortionModel::Radtan {
                coefficients: [k1, k2, p1, p2],
            } => {
                let mut xy = *xy_d;
                for _ in 0..RADTAN_UNDISTORT_ITERATIONS {
                    let (x, y) = (xy.x, xy.y);
                    let r2 = x * x + y * y;
                    let radial = 1.0 + k1 * r2 + k2 * r2 * r2;
                    let dx = 2.0 * p1 * x * y + p2 * (r2 + 2.0 * x * x);
                    let dy = p1 * (r2 + 2.0 * y * y) + 2.0 * p2 * x * y;
                    xy = Vector2::new((xy_d.x - dx) / radial, (xy_d.y - dy) / radial);
                }
                xy
            }
            DistortionModel::Equidistant {
                coefficients: [k1, k2, k3, k4],
            } => {
                let theta_d = xy_d.norm();
                if theta_d < EPS {
                    return *xy_d;
                }
                let mut theta = theta_d;
                for _ in 0..EQUIDISTANT_UNDISTORT_ITERATIONS {
                    let t2 = theta * theta;
                    let f = theta * (1.0 + t2 * (k1 + t2 * (k2 + t2 * (k3 + t2 * k4)))) - theta_d;
                    let df = 1.0 + t2 * (3.0 * k1 + t2 * (5.0 * k2 + t2 * (7.0 * k3 + t2 * 9.0 * k4)));
                    theta -= f / df;
                }
                xy_d * (theta.tan() / theta_d)
            }
        }
    }
}

/// A pinhole camera: intrinsics, distortion and image size.
#[derive(Debug, Clone, PartialEq)]
pub struct PinholeCamera {
    distortion: DistortionModel,
    intrinsics: Intrinsics,
    width: u32,
    height: u32,
}

/// The camera is shared between the tracker side and the updater.
pub type SharedCamera = Arc<PinholeCamera>;

impl PinholeCamera {
    pub fn new(distortion: DistortionModel, intrinsics: Intrinsics, width: u32, height: u32) -> Self {
        Self {
            distortion,
            intrinsics,
            width,
            height,
        }
    }

    pub fn shared(self) -> SharedCamera {
        Arc::new(self)
    }

    /// `(fx, fy, cx, cy)`.
    pub fn intrinsics(&self) -> &Intrinsics {
        &self.intrinsics
    }

    pub fn distortion(&self) -> &DistortionModel {
        &self.distortion
    }

    pub fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn normalize(&self, points: &[Vector2<f64>]) -> Vec<Vector2<f64>> {
        points.iter().map(|p| self.intrinsics.normalize(p)).collect()
    }

    pub fn denormalize(&self, points: &[Vector2<f64>]) -> Vec<Vector2<f64>> {
        points.iter().map(|p| self.intrinsics.denormalize(p)).collect()
    }

    /// Undistorts raw pixel coordinates. With `normalize` the result is in
    /// normalized image coordinates, otherwise in undistorted pixels.
    pub fn undistort(&self, points: &[Vector2<f64>], normalize: bool) -> Vec<Vector2<f64>> {
        points
            .iter()
            .map(|uv| self.undistort_point(uv, normalize))
            .collect()
    }

    pub fn undistort_point(&self, uv: &Vector2<f64>, normalize: bool) -> Vector2<f64> {
        let xy = self.distortion.undistort(&self.intrinsics.normalize(uv));
        if normalize {
            xy
        } else {
            self.intrinsics.denormalize(&xy)
        }
    }

    /// Maps an undistorted normalized point to the raw pixel the sensor would report.
    pub fn distort_point(&self, xy: &Vector2<f64>) -> Vector2<f64> {
        self.intrinsics.denormalize(&self.distortion.distort(xy))
    }

    pub fn is_in_image(&self, uv: &Vector2<f64>) -> bool {
        uv.x >= 0.0 && uv.y >= 0.0 && uv.x < self.width as f64 && uv.y < self.height as f64
    }
}
