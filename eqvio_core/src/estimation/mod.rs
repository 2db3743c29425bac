// eqvio_core/src/estimation/mod.rs

use std::any::Any;

use crate::error::FilterError;
use crate::messages::{SensorInput, StateEstimate};

pub mod chi_square;
pub mod initializer;
pub mod linalg;
pub mod msceqf;
pub mod propagator;
pub mod updater;

pub use initializer::{Initializer, InitializerStatus};
pub use msceqf::Msceqf;
pub use propagator::{PropagationStatus, Propagator};
pub use updater::{UpdateReport, Updater};

/// The contract for any algorithm that performs the "State Estimator" role.
/// Its sole responsibility is to estimate the state of an agent.
pub trait StateEstimator: Send + Sync {
    /// The single, unified method for processing all types of input data.
    /// Returns a report for every camera frame the input allowed to complete.
    fn process(&mut self, input: &SensorInput) -> Result<Vec<UpdateReport>, FilterError>;

    /// The current best estimate, `None` while still initializing.
    fn estimate(&self) -> Option<StateEstimate>;

    /// Allows for dynamic downcasting to access algorithm-specific methods if needed.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}
