// eqvio_core/src/models/reprojection.rs

//! Pixel reprojection of a world point into a cloned camera pose, with the
//! Jacobians of the predicted pixel with respect to the clone error, the
//! intrinsics error and the world point.

use nalgebra::{Isometry3, Matrix2, Matrix2x3, Matrix2x4, Matrix2x6, Vector2, Vector3};

use crate::groups::so3::skew;
use crate::groups::Intrinsics;
use crate::vision::triangulation::projection_jacobian;

/// Points closer than this to the camera plane are not linearized.
const MIN_DEPTH: f64 = 1e-3;

#[derive(Debug, Clone, Copy)]
pub struct ReprojectionLinearization {
    /// `z − h(x̂)` in pixels.
    pub residual: Vector2<f64>,
    /// With respect to the clone error `T = exp(ε)·T̂`, `ε = [φ, ρ]`.
    pub h_clone: Matrix2x6<f64>,
    /// With respect to the intrinsics error `L = L̂·exp(ε)`.
    pub h_intrinsics: Matrix2x4<f64>,
    /// With respect to the world point.
    pub h_point: Matrix2x3<f64>,
}

/// Pixel measurement model for undistorted observations.
#[derive(Debug, Clone, Copy)]
pub struct ReprojectionModel {
    pub pixel_std: f64,
}

impl ReprojectionModel {
    pub fn new(pixel_std: f64) -> Self {
        Self { pixel_std }
    }

    pub fn noise_variance(&self) -> f64 {
        self.pixel_std * self.pixel_std
    }

    /// Predicted undistorted pixel, `None` for points behind the camera.
    pub fn predict(
        &self,
        camera_pose: &Isometry3<f64>,
        intrinsics: &Intrinsics,
        p_w: &Vector3<f64>,
    ) -> Option<Vector2<f64>> {
        let p_c = camera_pose.inverse_transform_vector(&(p_w - camera_pose.translation.vector));
        if p_c.z < MIN_DEPTH {
            return None;
        }
        Some(intrinsics.denormalize(&Vector2::new(p_c.x / p_c.z, p_c.y / p_c.z)))
    }

    /// Residual and Jacobians of one observation.
    pub fn linearize(
        &self,
        camera_pose: &Isometry3<f64>,
        intrinsics: &Intrinsics,
        p_w: &Vector3<f64>,
        measured: &Vector2<f64>,
    ) -> Option<ReprojectionLinearization> {
        let rot_t = camera_pose.rotation.to_rotation_matrix().into_inner().transpose();
        let p_c = rot_t * (p_w - camera_pose.translation.vector);
        if p_c.z < MIN_DEPTH {
            return None;
        }
        let xy = Vector2::new(p_c.x / p_c.z, p_c.y / p_c.z);
        let predicted = intrinsics.denormalize(&xy);

        let focal = Matrix2::new(intrinsics.fx, 0.0, 0.0, intrinsics.fy);
        let h_pc = focal * projection_jacobian(&p_c);

        let mut h_clone = Matrix2x6::zeros();
        h_clone
            .fixed_view_mut::<2, 3>(0, 0)
            .copy_from(&(h_pc * rot_t * skew(p_w)));
        h_clone
            .fixed_view_mut::<2, 3>(0, 3)
            .copy_from(&(-h_pc * rot_t));

        #[rustfmt::skip]
        let h_intrinsics = Matrix2x4::new(
            intrinsics.fx * xy.x, 0.0, intrinsics.fx, 0.0,
            0.0, intrinsics.fy * xy.y, 0.0, intrinsics.fy,
        );

        Some(ReprojectionLinearization {
            residual: measured - predicted,
            h_clone,
            h_intrinsics,
            h_point: h_pc * rot_t,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::groups::LieGroup;
    use approx::assert_relative_eq;
    use nalgebra::{Translation3, UnitQuaternion, Vector4, Vector6};

    fn setup() -> (Isometry3<f64>, Intrinsics, Vector3<f64>) {
        let pose = Isometry3::from_parts(
            Translation3::new(0.3, -0.2, 1.0),
            UnitQuaternion::from_euler_angles(0.2, -0.1, 0.7),
        );
        let p_w = (pose * nalgebra::Point3::new(0.4, -0.3, 3.0)).coords;
        (pose, Intrinsics::new(450.0, 440.0, 320.0, 240.0), p_w)
    }

    #[test]
    fn test_zero_residual_at_prediction() {
        let (pose, k, p_w) = setup();
        let model = ReprojectionModel::new(1.0);
        let z = model.predict(&pose, &k, &p_w).unwrap();
        let lin = model.linearize(&pose, &k, &p_w, &z).unwrap();
        assert_relative_eq!(lin.residual, Vector2::zeros(), epsilon = 1e-9);
    }

    #[test]
    fn test_jacobians_match_finite_differences() {
        let (pose, k, p_w) = setup();
        let model = ReprojectionModel::new(1.0);
        let lin = model.linearize(&pose, &k, &p_w, &Vector2::zeros()).unwrap();
        let h = 1e-6;

        for i in 0..6 {
            let mut eps = Vector6::zeros();
            eps[i] = h;
            let plus = <Isometry3<f64> as LieGroup>::exp(&eps) * pose;
            let minus = <Isometry3<f64> as LieGroup>::exp(&-eps) * pose;
            let numeric = (model.predict(&plus, &k, &p_w).unwrap()
                - model.predict(&minus, &k, &p_w).unwrap())
                / (2.0 * h);
            assert_relative_eq!(lin.h_clone.column(i).into_owned(), numeric, epsilon = 1e-4);
        }

        for i in 0..4 {
            let mut eps = Vector4::zeros();
            eps[i] = h;
            let plus = k.compose(&Intrinsics::exp(&eps));
            let minus = k.compose(&Intrinsics::exp(&-eps));
            let numeric = (model.predict(&pose, &plus, &p_w).unwrap()
                - model.predict(&pose, &minus, &p_w).unwrap())
                / (2.0 * h);
            assert_relative_eq!(lin.h_intrinsics.column(i).into_owned(), numeric, epsilon = 1e-4);
        }

        for i in 0..3 {
            let mut dp = Vector3::zeros();
            dp[i] = h;
            let numeric = (model.predict(&pose, &k, &(p_w + dp)).unwrap()
                - model.predict(&pose, &k, &(p_w - dp)).unwrap())
                / (2.0 * h);
            assert_relative_eq!(lin.h_point.column(i).into_owned(), numeric, epsilon = 1e-4);
        }
    }

    #[test]
    fn test_point_behind_camera_is_not_linearized() {
        let (pose, k, _) = setup();
        let behind = (pose * nalgebra::Point3::new(0.0, 0.0, -1.0)).coords;
        let model = ReprojectionModel::new(1.0);
        assert!(model.linearize(&pose, &k, &behind, &Vector2::zeros()).is_none());
    }
}
