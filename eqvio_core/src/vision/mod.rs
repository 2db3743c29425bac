// eqvio_core/src/vision/mod.rs

pub mod camera;
pub mod triangulation;

pub use camera::{DistortionModel, PinholeCamera, SharedCamera};
