// eqvio_core/src/groups/mod.rs

//! Lie-group primitives for the filter's symmetry group.
//!
//! The state of the filter is one element of the compound group
//! `SE₂(3) × SE(3) × ℝ⁶ × IN` (see [`SymmetryElement`]). Each factor exposes the
//! same contract through [`LieGroup`]: composition, inverse, closed-form
//! exponential and logarithm, and the adjoint matrix. All of them are total;
//! a non-orthonormal rotation is a precondition violation, not an error.

pub mod intrinsics;
pub mod se23;
pub mod se3;
pub mod so3;
pub mod symmetry;

pub use intrinsics::Intrinsics;
pub use se23::Se23;
pub use symmetry::SymmetryElement;

/// The contract for a matrix Lie group used by the filter.
pub trait LieGroup: Sized + Clone {
    /// Coordinates of the Lie algebra (the tangent space at identity).
    type Tangent;
    /// Matrix representation of the adjoint action on `Tangent`.
    type Adjoint;

    fn identity() -> Self;

    /// Group product `self · other`.
    fn compose(&self, other: &Self) -> Self;

    fn inverse(&self) -> Self;

    /// Exponential map from tangent coordinates.
    fn exp(v: &Self::Tangent) -> Self;

    /// Logarithm map, the inverse of [`LieGroup::exp`] near identity.
    fn log(&self) -> Self::Tangent;

    /// `Ad_X` such that `exp(Ad_X v) = X · exp(v) · X⁻¹`.
    fn adjoint(&self) -> Self::Adjoint;
}
