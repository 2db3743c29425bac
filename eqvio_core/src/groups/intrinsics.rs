//! The intrinsics group IN: upper-triangular pinhole calibration matrices
//!
//! ```text
//! K = | fx  0  cx |
//!     |  0 fy  cy |
//!     |  0  0   1 |
//! ```
//!
//! under matrix multiplication. Tangent coordinates are `[a, b, c, d]` for the
//! algebra element `[[a, 0, c], [0, b, d], [0, 0, 0]]`.

use nalgebra::{Matrix3, Matrix4, Vector2, Vector3, Vector4};
use serde::{Deserialize, Serialize};

use super::LieGroup;

/// Below this magnitude `(eˣ - 1)/x` is evaluated by its series.
const SMALL_SCALE_THRESHOLD: f64 = 1e-8;

/// Camera focal lengths and principal point, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Intrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
}

/// `(eˣ - 1)/x`, continuous at zero.
fn expm1_over_x(x: f64) -> f64 {
    if x.abs() < SMALL_SCALE_THRESHOLD {
        1.0 + 0.5 * x
    } else {
        x.exp_m1() / x
    }
}

impl Intrinsics {
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64) -> Self {
        Self { fx, fy, cx, cy }
    }

    pub fn from_vector(v: &Vector4<f64>) -> Self {
        Self::new(v[0], v[1], v[2], v[3])
    }

    /// `(fx, fy, cx, cy)` as a 4-vector.
    pub fn as_vector(&self) -> Vector4<f64> {
        Vector4::new(self.fx, self.fy, self.cx, self.cy)
    }

    #[rustfmt::skip]
    pub fn matrix(&self) -> Matrix3<f64> {
        Matrix3::new(
            self.fx, 0.0, self.cx,
            0.0, self.fy, self.cy,
            0.0, 0.0, 1.0,
        )
    }

    /// Maps normalized image coordinates to pixels.
    pub fn denormalize(&self, xy: &Vector2<f64>) -> Vector2<f64> {
        Vector2::new(self.fx * xy.x + self.cx, self.fy * xy.y + self.cy)
    }

    /// Maps pixels to normalized image coordinates.
    pub fn normalize(&self, uv: &Vector2<f64>) -> Vector2<f64> {
        Vector2::new((uv.x - self.cx) / self.fx, (uv.y - self.cy) / self.fy)
    }

    /// Unit-depth bearing `K⁻¹ [u, v, 1]ᵀ`.
    pub fn bearing(&self, uv: &Vector2<f64>) -> Vector3<f64> {
        let xy = self.normalize(uv);
        Vector3::new(xy.x, xy.y, 1.0)
    }
}

impl LieGroup for Intrinsics {
    type Tangent = Vector4<f64>;
    type Adjoint = Matrix4<f64>;

    fn identity() -> Self {
        Self::new(1.0, 1.0, 0.0, 0.0)
    }

    fn compose(&self, other: &Self) -> Self {
        Self {
            fx: self.fx * other.fx,
            fy: self.fy * other.fy,
            cx: self.fx * other.cx + self.cx,
            cy: self.fy * other.cy + self.cy,
        }
    }

    fn inverse(&self) -> Self {
        Self {
            fx: 1.0 / self.fx,
            fy: 1.0 / self.fy,
            cx: -self.cx / self.fx,
            cy: -self.cy / self.fy,
        }
    }

    fn exp(v: &Vector4<f64>) -> Self {
        Self {
            fx: v[0].exp(),
            fy: v[1].exp(),
            cx: v[2] * expm1_over_x(v[0]),
            cy: v[3] * expm1_over_x(v[1]),
        }
    }

    fn log(&self) -> Vector4<f64> {
        let a = self.fx.ln();
        let b = self.fy.ln();
        Vector4::new(a, b, self.cx / expm1_over_x(a), self.cy / expm1_over_x(b))
    }

    #[rustfmt::skip]
    fn adjoint(&self) -> Matrix4<f64> {
        Matrix4::new(
            1.0, 0.0, 0.0, 0.0,
            0.0, 1.0, 0.0, 0.0,
            -self.cx, 0.0, self.fx, 0.0,
            0.0, -self.cy, 0.0, self.fy,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_log_exp_round_trip() {
        let v = Vector4::new(0.02, -0.01, 0.3, -0.2);
        assert_relative_eq!(Intrinsics::exp(&v).log(), v, epsilon = 1e-12);

        let k = Intrinsics::new(458.0, 457.0, 367.0, 248.0);
        let back = Intrinsics::exp(&k.log());
        assert_relative_eq!(back.as_vector(), k.as_vector(), epsilon = 1e-9);
    }

    #[test]
    fn test_compose_matches_matrix_product() {
        let a = Intrinsics::new(400.0, 410.0, 320.0, 240.0);
        let b = Intrinsics::new(1.01, 0.99, 0.5, -0.3);
        assert_relative_eq!(a.compose(&b).matrix(), a.matrix() * b.matrix(), epsilon = 1e-12);
        assert_relative_eq!(
            a.compose(&a.inverse()).matrix(),
            Matrix3::identity(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_adjoint_conjugation_identity() {
        let x = Intrinsics::new(400.0, 410.0, 320.0, 240.0);
        let v = Vector4::new(0.01, -0.02, 0.05, 0.03);
        let lhs = Intrinsics::exp(&(x.adjoint() * v));
        let rhs = x.compose(&Intrinsics::exp(&v)).compose(&x.inverse());
        assert_relative_eq!(lhs.as_vector(), rhs.as_vector(), epsilon = 1e-9);
    }

    #[test]
    fn test_normalize_denormalize() {
        let k = Intrinsics::new(458.0, 457.0, 367.0, 248.0);
        let uv = Vector2::new(100.0, 400.0);
        assert_relative_eq!(k.denormalize(&k.normalize(&uv)), uv, epsilon = 1e-12);
    }
}
