// eqvio_sim/src/simulation/trajectory.rs

use nalgebra::{Isometry3, Translation3, UnitQuaternion, Vector3};

use crate::config::TrajectoryConfig;

/// Step used for the central differences that produce the kinematics.
const DIFF_STEP: f64 = 1.0e-3;

/// Ground-truth kinematics of the body at one instant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TruthSample {
    pub timestamp: f64,
    /// `T_WI`.
    pub pose: Isometry3<f64>,
    /// World-frame velocity.
    pub velocity: Vector3<f64>,
    /// World-frame acceleration, gravity excluded.
    pub acceleration: Vector3<f64>,
    /// Body-frame angular velocity.
    pub angular_velocity: Vector3<f64>,
}

/// A smooth analytic trajectory: at rest, then a figure-eight whose amplitude
/// ramps in with a smoothstep so the motion is twice differentiable.
#[derive(Debug, Clone)]
pub struct Trajectory {
    config: TrajectoryConfig,
}

impl Trajectory {
    pub fn new(config: TrajectoryConfig) -> Self {
        Self { config }
    }

    fn phase(&self, t: f64) -> (f64, f64) {
        let tau = (t - self.config.static_duration).max(0.0);
        let ramp = if self.config.ramp_duration > 0.0 {
            let s = (tau / self.config.ramp_duration).min(1.0);
            s * s * (3.0 - 2.0 * s)
        } else {
            1.0
        };
        (tau, ramp)
    }

    pub fn position(&self, t: f64) -> Vector3<f64> {
        let (tau, ramp) = self.phase(t);
        let w = 2.0 * std::f64::consts::PI * self.config.frequency;
        let [ax, ay, az] = self.config.amplitude;
        let offset = Vector3::new(
            ax * (w * tau).sin(),
            ay * (2.0 * w * tau).sin(),
            az * (1.0 - (w * tau).cos()),
        );
        Vector3::from(self.config.start_position) + ramp * offset
    }

    pub fn attitude(&self, t: f64) -> UnitQuaternion<f64> {
        let (tau, ramp) = self.phase(t);
        let w = 2.0 * std::f64::consts::PI * self.config.frequency;
        let yaw = ramp * self.config.yaw_amplitude_deg.to_radians() * (w * tau).sin();
        let tilt = ramp * self.config.tilt_amplitude_deg.to_radians();
        let roll = tilt * (2.0 * w * tau).sin();
        let pitch = tilt * (1.5 * w * tau).sin();
        UnitQuaternion::from_euler_angles(roll, pitch, yaw)
    }

    pub fn pose(&self, t: f64) -> Isometry3<f64> {
        Isometry3::from_parts(Translation3::from(self.position(t)), self.attitude(t))
    }

    pub fn sample(&self, t: f64) -> TruthSample {
        let h = DIFF_STEP;
        let (p_minus, p_0, p_plus) = (self.position(t - h), self.position(t), self.position(t + h));
        let velocity = (p_plus - p_minus) / (2.0 * h);
        let acceleration = (p_plus - 2.0 * p_0 + p_minus) / (h * h);

        let delta = self.attitude(t - h).inverse() * self.attitude(t + h);
        let angular_velocity = delta.scaled_axis() / (2.0 * h);

        TruthSample {
            timestamp: t,
            pose: self.pose(t),
            velocity,
            acceleration,
            angular_velocity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn trajectory() -> Trajectory {
        Trajectory::new(TrajectoryConfig::default())
    }

    #[test]
    fn test_static_phase_is_at_rest() {
        let trajectory = trajectory();
        let sample = trajectory.sample(1.0);
        assert_relative_eq!(sample.velocity, Vector3::zeros(), epsilon = 1e-12);
        assert_relative_eq!(sample.acceleration, Vector3::zeros(), epsilon = 1e-9);
        assert_relative_eq!(sample.angular_velocity, Vector3::zeros(), epsilon = 1e-12);
        assert_relative_eq!(
            sample.pose.translation.vector,
            Vector3::new(0.0, 0.0, 1.0),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_velocity_integrates_to_displacement() {
        let trajectory = trajectory();
        let (t0, t1, dt) = (4.0, 6.0, 1.0e-3);
        let mut p = trajectory.position(t0);
        let mut t = t0;
        while t < t1 - 0.5 * dt {
            // Midpoint rule on the differentiated velocity.
            p += trajectory.sample(t + 0.5 * dt).velocity * dt;
            t += dt;
        }
        assert_relative_eq!(p, trajectory.position(t1), epsilon = 1e-5);
    }

    #[test]
    fn test_angular_velocity_matches_attitude_increment() {
        let trajectory = trajectory();
        let (t, dt) = (5.3, 1.0e-4);
        let omega = trajectory.sample(t).angular_velocity;
        let predicted = trajectory.attitude(t) * UnitQuaternion::from_scaled_axis(omega * dt);
        assert_relative_eq!(predicted.angle_to(&trajectory.attitude(t + dt)), 0.0, epsilon = 1e-7);
        assert!(omega.norm() > 1e-3);
    }
}
