// eqvio_core/src/models/inertial.rs

use nalgebra::{SMatrix, Vector3};

use super::ErrorDynamics;
use crate::groups::so3::skew;
use crate::groups::{LieGroup, SymmetryElement};
use crate::messages::ImuMeasurement;
use crate::types::{CoreMatrix, CORE_DIM, D_DIM, D_OFFSET, E_OFFSET, NU_OFFSET, PHI_OFFSET, RHO_OFFSET};

/// Continuous noise inputs: `[n_ω, n_a, n_bω, n_ba]`.
pub const IMU_NOISE_DIM: usize = 12;

pub type InputMatrix = SMatrix<f64, CORE_DIM, IMU_NOISE_DIM>;

/// Strapdown inertial kinematics driving the navigation element `D` with
/// random-walk biases. Calibration states are constant.
#[derive(Debug, Clone)]
pub struct InertialModel {
    /// Gravity in the world frame, `(0, 0, -g)`.
    pub gravity: Vector3<f64>,
}

impl InertialModel {
    pub fn new(gravity_magnitude: f64) -> Self {
        Self {
            gravity: Vector3::new(0.0, 0.0, -gravity_magnitude),
        }
    }
}

impl ErrorDynamics for InertialModel {
    fn propagate_mean(&self, x: &SymmetryElement, input: &ImuMeasurement, dt: f64) -> SymmetryElement {
        let omega = input.angular_velocity - x.e.fixed_rows::<3>(0);
        let acc = input.acceleration - x.e.fixed_rows::<3>(3);
        SymmetryElement {
            d: x.d.integrate(&omega, &acc, &self.gravity, dt),
            ..*x
        }
    }

    /// Linearized error dynamics `ε̇ = A ε + B n` about `x`.
    ///
    /// The navigation error is right-invariant, so its drift only depends on
    /// gravity; bias errors enter through `−Ad_D` on the body-frame input.
    fn error_jacobians(&self, x: &SymmetryElement, _input: &ImuMeasurement) -> (CoreMatrix, InputMatrix) {
        let ad = x.d.adjoint();

        let mut a = CoreMatrix::zeros();
        a.fixed_view_mut::<3, 3>(NU_OFFSET, PHI_OFFSET)
            .copy_from(&skew(&self.gravity));
        a.fixed_view_mut::<3, 3>(RHO_OFFSET, NU_OFFSET)
            .fill_with_identity();
        a.fixed_view_mut::<D_DIM, 6>(D_OFFSET, E_OFFSET)
            .copy_from(&(-ad.fixed_view::<D_DIM, 6>(0, 0).into_owned()));

        let mut b = InputMatrix::zeros();
        b.fixed_view_mut::<D_DIM, 6>(D_OFFSET, 0)
            .copy_from(&(-ad.fixed_view::<D_DIM, 6>(0, 0).into_owned()));
        b.fixed_view_mut::<6, 6>(E_OFFSET, 6).fill_with_identity();

        (a, b)
    }
}
