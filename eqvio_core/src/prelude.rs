// eqvio_core/src/prelude.rs

// --- Core Abstractions (The main contracts of the library) ---
pub use crate::estimation::StateEstimator;
pub use crate::groups::LieGroup;
pub use crate::messages::{SensorInput, Timestamped};
pub use crate::models::ErrorDynamics;

// --- Core Data Structures (The "nouns" of the library) ---
pub use crate::error::{ConfigError, FilterError};
pub use crate::groups::{Intrinsics, Se23, SymmetryElement};
pub use crate::messages::{CameraMeasurement, ImuMeasurement, StateEstimate};
pub use crate::options::{FeatureRepresentation, MsceqfOptions};
pub use crate::state::{BlockKey, FilterState, LandmarkInsertion, PersistentFeature, PoseClone};
pub use crate::types::{CloneId, FeatureId};

// --- Estimation Algorithms ---
pub use crate::estimation::{
    InitializerStatus, Msceqf, PropagationStatus, UpdateReport,
};

// --- Sensors and Camera ---
pub use crate::sensors::{PushStatus, TimeOrderedQueue};
pub use crate::vision::{DistortionModel, PinholeCamera, SharedCamera};
