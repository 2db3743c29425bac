// eqvio_core/src/estimation/initializer.rs

//! Static initialization: waits for a window of inertial data in which the
//! body is at rest, then builds the initial filter state from it.

use std::collections::VecDeque;
use std::f64::consts::PI;

use nalgebra::{UnitQuaternion, Vector3};
use tracing::{debug, info};

use crate::error::FilterError;
use crate::groups::Se23;
use crate::messages::{CameraMeasurement, ImuMeasurement};
use crate::options::{InitializerOptions, MsceqfOptions, StateOptions};
use crate::state::FilterState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitializerStatus {
    /// The window is not full yet, or the static tests failed on it.
    Waiting,
    Ready,
}

#[derive(Debug, Clone)]
pub struct Initializer {
    options: InitializerOptions,
    state_options: StateOptions,
    imu_window: VecDeque<ImuMeasurement>,
    frames: VecDeque<CameraMeasurement>,
}

impl Initializer {
    pub fn new(options: &MsceqfOptions) -> Self {
        Self {
            options: options.initializer.clone(),
            state_options: options.state.clone(),
            imu_window: VecDeque::new(),
            frames: VecDeque::new(),
        }
    }

    /// Adds a sample and slides the window. Out-of-order samples are ignored.
    pub fn add_imu(&mut self, sample: ImuMeasurement) {
        if let Some(newest) = self.imu_window.back() {
            if sample.timestamp <= newest.timestamp {
                return;
            }
        }
        self.imu_window.push_back(sample);

        // Keep exactly one sample at or before the window start so a full
        // window spans at least `imu_init_window` seconds.
        let start = sample.timestamp - self.options.imu_init_window;
        while self.imu_window.len() > 1 && self.imu_window[1].timestamp <= start {
            self.imu_window.pop_front();
        }
        if let Some(oldest) = self.imu_window.front().map(|m| m.timestamp) {
            while self.frames.front().is_some_and(|f| f.timestamp < oldest) {
                self.frames.pop_front();
            }
        }
    }

    pub fn add_frame(&mut self, frame: CameraMeasurement) {
        if self.frames.back().is_some_and(|f| frame.timestamp <= f.timestamp) {
            return;
        }
        self.frames.push_back(frame);
    }

    pub fn is_window_full(&self) -> bool {
        match (self.imu_window.front(), self.imu_window.back()) {
            (Some(oldest), Some(newest)) => {
                newest.timestamp - oldest.timestamp >= self.options.imu_init_window
            }
            _ => false,
        }
    }

    /// Sample variance of the specific force, `Σ‖aᵢ − ā‖² / (n − 1)`.
    pub fn acceleration_variance(&self) -> Option<f64> {
        let n = self.imu_window.len();
        if n < 2 {
            return None;
        }
        let mean = self.mean_acceleration()?;
        let sum: f64 = self
            .imu_window
            .iter()
            .map(|m| (m.acceleration - mean).norm_squared())
            .sum();
        Some(sum / (n - 1) as f64)
    }

    fn mean_acceleration(&self) -> Option<Vector3<f64>> {
        if self.imu_window.is_empty() {
            return None;
        }
        let sum: Vector3<f64> = self.imu_window.iter().map(|m| m.acceleration).sum();
        Some(sum / self.imu_window.len() as f64)
    }

    /// Mean pixel displacement of the features shared by the first and last
    /// frame of the window. Zero when there is nothing to compare.
    pub fn mean_disparity(&self) -> f64 {
        let (Some(first), Some(last)) = (self.frames.front(), self.frames.back()) else {
            return 0.0;
        };
        if self.frames.len() < 2 {
            return 0.0;
        }
        let displacements: Vec<f64> = first
            .features
            .iter()
            .filter_map(|(id, uv)| last.features.get(id).map(|uv2| (uv2 - uv).norm()))
            .collect();
        if displacements.is_empty() {
            return 0.0;
        }
        displacements.iter().sum::<f64>() / displacements.len() as f64
    }

    pub fn status(&self) -> InitializerStatus {
        if !self.is_window_full() {
            return InitializerStatus::Waiting;
        }
        let Some(variance) = self.acceleration_variance() else {
            return InitializerStatus::Waiting;
        };
        let disparity = self.mean_disparity();
        debug!(variance, disparity, "static initializer window tested");
        if variance < self.options.acc_threshold && disparity < self.options.disparity_threshold {
            InitializerStatus::Ready
        } else {
            InitializerStatus::Waiting
        }
    }

    /// Builds the initial state once the window passes both tests.
    ///
    /// The attitude rotates the mean measured specific force onto world up,
    /// velocity and position are zero and the biases come from the priors.
    pub fn try_initialize(&self) -> Result<Option<FilterState>, FilterError> {
        if self.status() != InitializerStatus::Ready {
            return Ok(None);
        }
        let (Some(mean), Some(newest)) = (self.mean_acceleration(), self.imu_window.back()) else {
            return Ok(None);
        };
        let specific_force = mean - self.state_options.accel_bias_prior;
        let attitude = UnitQuaternion::rotation_between(&specific_force, &Vector3::z())
            .unwrap_or_else(|| UnitQuaternion::from_axis_angle(&Vector3::x_axis(), PI));

        let d = Se23::new(attitude, Vector3::zeros(), Vector3::zeros());
        let state = FilterState::from_options(newest.timestamp, d, &self.state_options)?;
        info!(t = newest.timestamp, "filter initialized");
        Ok(Some(state))
    }
}
