//! SE(3) on top of `nalgebra::Isometry3`.
//!
//! Tangent coordinates are ordered `[φ, ρ]` (rotation first).

use nalgebra::{Isometry3, Matrix6, Translation3, Vector3, Vector6};

use super::so3::{self, left_jacobian, left_jacobian_inv, skew};
use super::LieGroup;

impl LieGroup for Isometry3<f64> {
    type Tangent = Vector6<f64>;
    type Adjoint = Matrix6<f64>;

    fn identity() -> Self {
        Isometry3::identity()
    }

    fn compose(&self, other: &Self) -> Self {
        self * other
    }

    fn inverse(&self) -> Self {
        Isometry3::inverse(self)
    }

    fn exp(v: &Vector6<f64>) -> Self {
        let phi: Vector3<f64> = v.fixed_rows::<3>(0).into_owned();
        let rho: Vector3<f64> = v.fixed_rows::<3>(3).into_owned();
        Isometry3::from_parts(
            Translation3::from(left_jacobian(&phi) * rho),
            so3::exp(&phi),
        )
    }

    fn log(&self) -> Vector6<f64> {
        let phi = so3::log(&self.rotation);
        let rho = left_jacobian_inv(&phi) * self.translation.vector;
        let mut v = Vector6::zeros();
        v.fixed_rows_mut::<3>(0).copy_from(&phi);
        v.fixed_rows_mut::<3>(3).copy_from(&rho);
        v
    }

    fn adjoint(&self) -> Matrix6<f64> {
        let r = *self.rotation.to_rotation_matrix().matrix();
        let t = self.translation.vector;
        let mut ad = Matrix6::zeros();
        ad.fixed_view_mut::<3, 3>(0, 0).copy_from(&r);
        ad.fixed_view_mut::<3, 3>(3, 0).copy_from(&(skew(&t) * r));
        ad.fixed_view_mut::<3, 3>(3, 3).copy_from(&r);
        ad
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::UnitQuaternion;

    fn sample_pose() -> Isometry3<f64> {
        Isometry3::from_parts(
            Translation3::new(1.0, -2.0, 0.5),
            UnitQuaternion::from_euler_angles(0.2, -0.4, 1.1),
        )
    }

    #[test]
    fn test_log_exp_round_trip() {
        let v = Vector6::new(0.1, -0.05, 0.2, 0.3, -0.7, 1.2);
        let x = <Isometry3<f64> as LieGroup>::exp(&v);
        assert_relative_eq!(LieGroup::log(&x), v, epsilon = 1e-10);
    }

    #[test]
    fn test_adjoint_conjugation_identity() {
        let x = sample_pose();
        let v = Vector6::new(0.02, 0.01, -0.03, 0.1, 0.2, -0.1);
        let lhs = <Isometry3<f64> as LieGroup>::exp(&(x.adjoint() * v));
        let rhs = x * <Isometry3<f64> as LieGroup>::exp(&v) * x.inverse();
        assert_relative_eq!(lhs.to_homogeneous(), rhs.to_homogeneous(), epsilon = 1e-10);
    }
}
