// eqvio_core/src/estimation/propagator.rs

use nalgebra::SMatrix;
use tracing::{trace, warn};

use crate::error::FilterError;
use crate::messages::ImuMeasurement;
use crate::models::{ErrorDynamics, InertialModel, IMU_NOISE_DIM};
use crate::options::MsceqfOptions;
use crate::sensors::TimeOrderedQueue;
use crate::state::FilterState;
use crate::types::CoreMatrix;

pub type NoiseMatrix = SMatrix<f64, IMU_NOISE_DIM, IMU_NOISE_DIM>;

/// Outcome of one propagation step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PropagationStatus {
    Propagated { dt: f64 },
    /// The sample did not advance time; the state is untouched.
    Dropped { dt: f64 },
}

/// Advances the filter state through inertial samples.
#[derive(Debug)]
pub struct Propagator {
    model: Box<dyn ErrorDynamics>,
    /// Continuous-time noise covariance `Q_c` of `[n_ω, n_a, n_bω, n_ba]`.
    continuous_noise: NoiseMatrix,
    /// Highest power of `A dt` kept in the transition matrix series.
    order: usize,
}

impl Propagator {
    pub fn new(options: &MsceqfOptions) -> Self {
        let mut q = NoiseMatrix::zeros();
        let variances = [
            options.angular_velocity_std.powi(2),
            options.acceleration_std.powi(2),
            options.angular_velocity_bias_std.powi(2),
            options.acceleration_bias_std.powi(2),
        ];
        for (block, variance) in variances.iter().enumerate() {
            for i in 0..3 {
                q[(3 * block + i, 3 * block + i)] = *variance;
            }
        }
        Self::with_model(
            Box::new(InertialModel::new(options.state.gravity)),
            q,
            options.state_transition_order,
        )
    }

    pub fn with_model(model: Box<dyn ErrorDynamics>, continuous_noise: NoiseMatrix, order: usize) -> Self {
        Self {
            model,
            continuous_noise,
            order,
        }
    }

    /// `Φ = Σ_{k=0}^{max(order,1)} (A dt)^k / k!`.
    pub fn transition_matrix(a: &CoreMatrix, dt: f64, order: usize) -> CoreMatrix {
        let a_dt = a * dt;
        let mut term = CoreMatrix::identity();
        let mut phi = CoreMatrix::identity();
        for k in 1..=order.max(1) {
            term = term * a_dt / k as f64;
            phi += term;
        }
        phi
    }

    /// Propagates the state to `sample.timestamp`, holding the sample's input
    /// constant over `(t_state, t_sample]`.
    pub fn propagate(
        &self,
        state: &mut FilterState,
        sample: &ImuMeasurement,
    ) -> Result<PropagationStatus, FilterError> {
        let dt = sample.timestamp - state.timestamp();
        if !(dt > 0.0) || !dt.is_finite() {
            warn!(dt, t = sample.timestamp, "inertial sample dropped");
            return Ok(PropagationStatus::Dropped { dt });
        }

        // Linearize at the estimate before integration.
        let (a, b) = self.model.error_jacobians(state.element(), sample);
        let phi = Self::transition_matrix(&a, dt, self.order);
        let phi_b = phi * b;
        let q_d = phi_b * self.continuous_noise * phi_b.transpose() * dt;

        let next = self.model.propagate_mean(state.element(), sample, dt);
        *state.element_mut() = next;
        state.set_timestamp(sample.timestamp);
        state.transform_core_covariance(&phi, &q_d);
        state.covariance().check_diagonal("propagation")?;

        trace!(t = sample.timestamp, dt, "propagated");
        Ok(PropagationStatus::Propagated { dt })
    }

    /// Consumes every buffered sample up to `t` and finishes with a sample
    /// interpolated at exactly `t`. Returns `None`, without consuming
    /// anything, while the buffer does not yet cover `t`.
    ///
    /// When nothing is buffered between the state time and `t`, the state
    /// time is the lower bracket and the first later sample is held over
    /// `(t_state, t]`.
    pub fn propagate_to(
        &self,
        state: &mut FilterState,
        buffer: &TimeOrderedQueue<ImuMeasurement>,
        t: f64,
    ) -> Result<Option<usize>, FilterError> {
        let at_t = match buffer.interpolate_at(t) {
            Some(sample) => sample,
            None => match buffer.peek_oldest() {
                Some(first) if first.timestamp > t && t > state.timestamp() => ImuMeasurement {
                    timestamp: t,
                    ..first
                },
                _ => return Ok(None),
            },
        };
        let mut applied = 0;
        for sample in buffer.drain_until(t) {
            if sample.timestamp <= state.timestamp() {
                continue;
            }
            if let PropagationStatus::Propagated { .. } = self.propagate(state, &sample)? {
                applied += 1;
            }
        }
        if state.timestamp() < t {
            if let PropagationStatus::Propagated { .. } = self.propagate(state, &at_t)? {
                applied += 1;
            }
        }
        Ok(Some(applied))
    }
}
