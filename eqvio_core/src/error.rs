// eqvio_core/src/error.rs

use thiserror::Error;

use crate::types::{CloneId, FeatureId};

/// Invalid options, rejected before a filter is constructed.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("option `{name}` must be strictly positive (got {value})")]
    NotPositive { name: &'static str, value: f64 },

    #[error("option `{name}` must be non-negative (got {value})")]
    Negative { name: &'static str, value: f64 },

    #[error("option `{name}` must be at least {min} (got {value})")]
    TooSmall {
        name: &'static str,
        value: usize,
        min: usize,
    },

    #[error("option `{name}` must lie in ({min}, {max}) (got {value})")]
    OutOfRange {
        name: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("initial covariance block `{name}` is not symmetric positive semi-definite")]
    InvalidCovariance { name: &'static str },
}

/// Conditions that stop the filter. Recoverable conditions (dropped samples,
/// rejected observations, refused landmarks, queue overflow) are reported as
/// statuses instead.
#[derive(Debug, Error)]
pub enum FilterError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("covariance lost symmetry/positive semi-definiteness during {stage}: {detail}")]
    NumericalInstability { stage: &'static str, detail: String },

    #[error("matrix decomposition failed during {stage}")]
    DecompositionFailed { stage: &'static str },

    #[error("clone {0} is not part of the state")]
    UnknownClone(CloneId),

    #[error("persistent feature {0} is not part of the state")]
    UnknownLandmark(FeatureId),

    #[error("the filter has not been initialized yet")]
    NotInitialized,
}
