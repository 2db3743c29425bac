// eqvio_core/src/lib.rs

//! Multi-state-constraint equivariant filter for visual-inertial odometry.
//!
//! The library is framework-agnostic: it consumes inertial samples and
//! tracked feature observations and produces a state estimate. The simulator
//! crate (`eqvio_sim`) drives it with synthetic data.

pub mod error;
pub mod estimation;
pub mod groups;
pub mod messages;
pub mod models;
pub mod options;
pub mod prelude;
pub mod sensors;
pub mod serde_helpers;
pub mod state;
pub mod types;
pub mod vision;
