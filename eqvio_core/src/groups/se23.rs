//! SE₂(3), the group of extended poses `(R, v, p)`.
//!
//! Tangent coordinates are ordered `[φ, ν, ρ]`: attitude, velocity, position.

use nalgebra::{Isometry3, Translation3, UnitQuaternion, Vector3};

use super::so3::{self, left_jacobian, left_jacobian_inv, skew};
use super::LieGroup;
use crate::types::{Matrix9, Vector9};

/// Extended pose of the body in the world frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Se23 {
    /// Attitude `R_WI`.
    pub rotation: UnitQuaternion<f64>,
    /// Velocity of the body expressed in the world frame.
    pub velocity: Vector3<f64>,
    /// Position of the body expressed in the world frame.
    pub position: Vector3<f64>,
}

impl Default for Se23 {
    fn default() -> Self {
        <Self as LieGroup>::identity()
    }
}

impl Se23 {
    pub fn new(
        rotation: UnitQuaternion<f64>,
        velocity: Vector3<f64>,
        position: Vector3<f64>,
    ) -> Self {
        Self {
            rotation,
            velocity,
            position,
        }
    }

    /// The pose part `(R, p)` as an SE(3) element.
    pub fn pose(&self) -> Isometry3<f64> {
        Isometry3::from_parts(Translation3::from(self.position), self.rotation)
    }

    /// Integrates the inertial kinematics over `dt` with constant body-frame
    /// angular rate `omega` and specific force `acc`.
    ///
    /// ```text
    /// R⁺ = R Exp(ω dt)
    /// v⁺ = v + (R a + g) dt
    /// p⁺ = p + v dt + ½ (R a + g) dt²
    /// ```
    pub fn integrate(
        &self,
        omega: &Vector3<f64>,
        acc: &Vector3<f64>,
        gravity: &Vector3<f64>,
        dt: f64,
    ) -> Self {
        let accel_world = self.rotation * acc + gravity;
        Self {
            rotation: self.rotation * so3::exp(&(omega * dt)),
            velocity: self.velocity + accel_world * dt,
            position: self.position + self.velocity * dt + 0.5 * accel_world * dt * dt,
        }
    }
}

impl LieGroup for Se23 {
    type Tangent = Vector9;
    type Adjoint = Matrix9;

    fn identity() -> Self {
        Self::new(UnitQuaternion::identity(), Vector3::zeros(), Vector3::zeros())
    }

    fn compose(&self, other: &Self) -> Self {
        Self {
            rotation: self.rotation * other.rotation,
            velocity: self.rotation * other.velocity + self.velocity,
            position: self.rotation * other.position + self.position,
        }
    }

    fn inverse(&self) -> Self {
        let r_inv = self.rotation.inverse();
        Self {
            rotation: r_inv,
            velocity: -(r_inv * self.velocity),
            position: -(r_inv * self.position),
        }
    }

    fn exp(v: &Vector9) -> Self {
        let phi: Vector3<f64> = v.fixed_rows::<3>(0).into_owned();
        let jl = left_jacobian(&phi);
        Self {
            rotation: so3::exp(&phi),
            velocity: jl * v.fixed_rows::<3>(3),
            position: jl * v.fixed_rows::<3>(6),
        }
    }

    fn log(&self) -> Vector9 {
        let phi = so3::log(&self.rotation);
        let jl_inv = left_jacobian_inv(&phi);
        let mut v = Vector9::zeros();
        v.fixed_rows_mut::<3>(0).copy_from(&phi);
        v.fixed_rows_mut::<3>(3).copy_from(&(jl_inv * self.velocity));
        v.fixed_rows_mut::<3>(6).copy_from(&(jl_inv * self.position));
        v
    }

    fn adjoint(&self) -> Matrix9 {
        let r = *self.rotation.to_rotation_matrix().matrix();
        let mut ad = Matrix9::zeros();
        ad.fixed_view_mut::<3, 3>(0, 0).copy_from(&r);
        ad.fixed_view_mut::<3, 3>(3, 0)
            .copy_from(&(skew(&self.velocity) * r));
        ad.fixed_view_mut::<3, 3>(3, 3).copy_from(&r);
        ad.fixed_view_mut::<3, 3>(6, 0)
            .copy_from(&(skew(&self.position) * r));
        ad.fixed_view_mut::<3, 3>(6, 6).copy_from(&r);
        ad
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn random_element(rng: &mut ChaCha8Rng) -> Se23 {
        let v = Vector9::from_fn(|_, _| rng.gen_range(-1.0..1.0));
        Se23::exp(&v)
    }

    fn assert_se23_eq(a: &Se23, b: &Se23, eps: f64) {
        assert!(a.rotation.angle_to(&b.rotation) < eps);
        assert_relative_eq!(a.velocity, b.velocity, epsilon = eps);
        assert_relative_eq!(a.position, b.position, epsilon = eps);
    }

    #[test]
    fn test_log_exp_round_trip_small_vectors() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for _ in 0..50 {
            let v = Vector9::from_fn(|_, _| rng.gen_range(-0.1..0.1));
            assert_relative_eq!(Se23::exp(&v).log(), v, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_compose_is_associative_but_not_commutative() {
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let a = random_element(&mut rng);
        let b = random_element(&mut rng);
        let c = random_element(&mut rng);

        assert_se23_eq(&a.compose(&b).compose(&c), &a.compose(&b.compose(&c)), 1e-10);

        let ab = a.compose(&b);
        let ba = b.compose(&a);
        assert!((ab.position - ba.position).norm() > 1e-6);
    }

    #[test]
    fn test_inverse_composes_to_identity() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let a = random_element(&mut rng);
        assert_se23_eq(&a.compose(&a.inverse()), &Se23::identity(), 1e-12);
    }

    #[test]
    fn test_adjoint_conjugation_identity() {
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let x = random_element(&mut rng);
        let v = Vector9::from_fn(|_, _| rng.gen_range(-0.05..0.05));
        let lhs = Se23::exp(&(x.adjoint() * v));
        let rhs = x.compose(&Se23::exp(&v)).compose(&x.inverse());
        assert_se23_eq(&lhs, &rhs, 1e-10);
    }

    #[test]
    fn test_integrate_with_gravity_compensating_force_is_static() {
        let gravity = Vector3::new(0.0, 0.0, -9.81);
        let x = Se23::identity();
        let next = x.integrate(&Vector3::zeros(), &Vector3::new(0.0, 0.0, 9.81), &gravity, 0.5);
        assert_se23_eq(&next, &x, 1e-12);
    }
}
