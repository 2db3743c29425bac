//! The compound symmetry element `X = (D, δ, E, L)` acting on the filter state.

use nalgebra::{Isometry3, Vector6};

use super::{Intrinsics, LieGroup, Se23};
use crate::types::{
    CoreMatrix, CoreVector, Matrix9, D_DIM, D_OFFSET, DELTA_DIM, DELTA_OFFSET, E_DIM, E_OFFSET,
    L_DIM, L_OFFSET,
};

/// One element of `SE₂(3) × SE(3) × ℝ⁶ × IN`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SymmetryElement {
    /// Navigation state: attitude, velocity, position.
    pub d: Se23,
    /// IMU-to-camera extrinsic transform `T_IC`.
    pub delta: Isometry3<f64>,
    /// Gyroscope bias followed by accelerometer bias.
    pub e: Vector6<f64>,
    /// Camera intrinsics.
    pub l: Intrinsics,
}

impl SymmetryElement {
    /// Applies a correction expressed in the filter's error coordinates.
    ///
    /// Each factor uses its own error convention:
    /// `D ← exp(κ_D)·D`, `δ ← δ·exp(κ_δ)`, `E ← E + κ_E`, `L ← L·exp(κ_L)`.
    pub fn retract(&self, kappa: &CoreVector) -> Self {
        let kd = kappa.fixed_rows::<D_DIM>(D_OFFSET).into_owned();
        let kdelta = kappa.fixed_rows::<DELTA_DIM>(DELTA_OFFSET).into_owned();
        let ke = kappa.fixed_rows::<E_DIM>(E_OFFSET).into_owned();
        let kl = kappa.fixed_rows::<L_DIM>(L_OFFSET).into_owned();

        Self {
            d: Se23::exp(&kd).compose(&self.d),
            delta: self.delta * <Isometry3<f64> as LieGroup>::exp(&kdelta),
            e: self.e + ke,
            l: self.l.compose(&Intrinsics::exp(&kl)),
        }
    }

    /// Transports a covariance of the navigation error from the world-frame
    /// (right-invariant) representation to the body-frame (left-invariant) one:
    /// `Σ_body = Ad_{D⁻¹} Σ_world Ad_{D⁻¹}ᵀ`.
    pub fn navigation_covariance_to_body(&self, sigma_world: &Matrix9) -> Matrix9 {
        let ad = self.d.inverse().adjoint();
        ad * sigma_world * ad.transpose()
    }
}

impl LieGroup for SymmetryElement {
    type Tangent = CoreVector;
    type Adjoint = CoreMatrix;

    fn identity() -> Self {
        Self {
            d: Se23::identity(),
            delta: Isometry3::identity(),
            e: Vector6::zeros(),
            l: Intrinsics::identity(),
        }
    }

    fn compose(&self, other: &Self) -> Self {
        Self {
            d: self.d.compose(&other.d),
            delta: self.delta * other.delta,
            e: self.e + other.e,
            l: self.l.compose(&other.l),
        }
    }

    fn inverse(&self) -> Self {
        Self {
            d: self.d.inverse(),
            delta: self.delta.inverse(),
            e: -self.e,
            l: self.l.inverse(),
        }
    }

    fn exp(v: &CoreVector) -> Self {
        Self {
            d: Se23::exp(&v.fixed_rows::<D_DIM>(D_OFFSET).into_owned()),
            delta: <Isometry3<f64> as LieGroup>::exp(
                &v.fixed_rows::<DELTA_DIM>(DELTA_OFFSET).into_owned(),
            ),
            e: v.fixed_rows::<E_DIM>(E_OFFSET).into_owned(),
            l: Intrinsics::exp(&v.fixed_rows::<L_DIM>(L_OFFSET).into_owned()),
        }
    }

    fn log(&self) -> CoreVector {
        let mut v = CoreVector::zeros();
        v.fixed_rows_mut::<D_DIM>(D_OFFSET).copy_from(&self.d.log());
        v.fixed_rows_mut::<DELTA_DIM>(DELTA_OFFSET)
            .copy_from(&LieGroup::log(&self.delta));
        v.fixed_rows_mut::<E_DIM>(E_OFFSET).copy_from(&self.e);
        v.fixed_rows_mut::<L_DIM>(L_OFFSET).copy_from(&self.l.log());
        v
    }

    fn adjoint(&self) -> CoreMatrix {
        let mut ad = CoreMatrix::zeros();
        ad.fixed_view_mut::<D_DIM, D_DIM>(D_OFFSET, D_OFFSET)
            .copy_from(&self.d.adjoint());
        ad.fixed_view_mut::<DELTA_DIM, DELTA_DIM>(DELTA_OFFSET, DELTA_OFFSET)
            .copy_from(&LieGroup::adjoint(&self.delta));
        ad.fixed_view_mut::<E_DIM, E_DIM>(E_OFFSET, E_OFFSET)
            .fill_with_identity();
        ad.fixed_view_mut::<L_DIM, L_DIM>(L_OFFSET, L_OFFSET)
            .copy_from(&self.l.adjoint());
        ad
    }
}
