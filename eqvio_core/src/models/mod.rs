// eqvio_core/src/models/mod.rs

pub mod inertial;
pub mod reprojection;

use std::fmt::Debug;

use crate::groups::SymmetryElement;
use crate::messages::ImuMeasurement;
use crate::types::CoreMatrix;

pub use inertial::{InertialModel, InputMatrix, IMU_NOISE_DIM};
pub use reprojection::{ReprojectionLinearization, ReprojectionModel};

/// The process model of the filter: how the group element evolves under an
/// inertial input, and how its error state evolves to first order.
/// Implementations should be `Send + Sync` so the filter can move between threads.
pub trait ErrorDynamics: Debug + Send + Sync {
    /// Integrates the mean over `dt` with the input held constant.
    fn propagate_mean(&self, x: &SymmetryElement, input: &ImuMeasurement, dt: f64) -> SymmetryElement;

    /// Continuous-time error-state matrix `A` and noise-input matrix `B`
    /// evaluated at the linearization point `x`.
    fn error_jacobians(&self, x: &SymmetryElement, input: &ImuMeasurement) -> (CoreMatrix, InputMatrix);
}
