// eqvio_core/src/types.rs

use nalgebra::{SMatrix, SVector};

// --- Core Type Aliases ---
pub type Vector9 = SVector<f64, 9>;
pub type Matrix9 = SMatrix<f64, 9, 9>;
pub type CoreVector = SVector<f64, CORE_DIM>;
pub type CoreMatrix = SMatrix<f64, CORE_DIM, CORE_DIM>;

// --- Error-state layout of the core block ---
// [ D: φ ν ρ | δ: φ ρ | E: b_ω b_a | L: fx fy cx cy ]
pub const D_DIM: usize = 9;
pub const DELTA_DIM: usize = 6;
pub const E_DIM: usize = 6;
pub const L_DIM: usize = 4;

pub const D_OFFSET: usize = 0;
pub const DELTA_OFFSET: usize = D_OFFSET + D_DIM;
pub const E_OFFSET: usize = DELTA_OFFSET + DELTA_DIM;
pub const L_OFFSET: usize = E_OFFSET + E_DIM;
pub const CORE_DIM: usize = L_OFFSET + L_DIM;

/// Offsets of the attitude, velocity and position errors inside the D block.
pub const PHI_OFFSET: usize = D_OFFSET;
pub const NU_OFFSET: usize = D_OFFSET + 3;
pub const RHO_OFFSET: usize = D_OFFSET + 6;

pub const CLONE_DIM: usize = 6;
pub const LANDMARK_DIM: usize = 3;

// --- Core Identifiers ---

/// Identifier assigned by the feature tracker to a tracked image point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct FeatureId(pub u64);

/// Stable identifier of a stochastic clone. Monotonically increasing, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct CloneId(pub u64);

impl std::fmt::Display for FeatureId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "f{}", self.0)
    }
}

impl std::fmt::Display for CloneId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "c{}", self.0)
    }
}
