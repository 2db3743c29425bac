// eqvio_core/src/state/landmark.rs

//! Persistent landmarks and their parameterizations.
//!
//! Every parameterization has a 3-dim additive error and can report the world
//! point it encodes together with `∂p_W/∂params`. Measurement Jacobians are
//! built against `p_W` and chained through that matrix, so the updater never
//! branches on the representation.

use nalgebra::{Isometry3, Matrix3, Vector3};

use crate::options::FeatureRepresentation;
use crate::types::FeatureId;

/// Smallest depth/distance accepted when converting to an anchored form.
const MIN_ANCHOR_DEPTH: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LandmarkParameterization {
    /// World-frame point.
    Euclidean { point: Vector3<f64> },
    /// `(α, β, d)`: azimuth, elevation and distance in the anchor camera frame.
    AnchoredPolar {
        anchor: Isometry3<f64>,
        params: Vector3<f64>,
    },
    /// `(a, b, ρ)`: anchor-frame point `[a, b, 1]/ρ`.
    AnchoredInverseDepth {
        anchor: Isometry3<f64>,
        params: Vector3<f64>,
    },
}

impl LandmarkParameterization {
    /// Encodes a world point in the requested representation, anchored at the
    /// camera pose `anchor` (`T_WC`). Returns `None` when the point lies
    /// behind or on the anchor camera and cannot be expressed.
    pub fn from_world_point(
        representation: FeatureRepresentation,
        p_w: &Vector3<f64>,
        anchor: &Isometry3<f64>,
    ) -> Option<Self> {
        match representation {
            FeatureRepresentation::Euclidean => Some(Self::Euclidean { point: *p_w }),
            FeatureRepresentation::AnchoredPolar => {
                let p_a = anchor.inverse_transform_vector(&(p_w - anchor.translation.vector));
                let d = p_a.norm();
                if d < MIN_ANCHOR_DEPTH || p_a.z <= 0.0 {
                    return None;
                }
                let beta = (p_a.y / d).clamp(-1.0, 1.0).asin();
                let alpha = p_a.x.atan2(p_a.z);
                Some(Self::AnchoredPolar {
                    anchor: *anchor,
                    params: Vector3::new(alpha, beta, d),
                })
            }
            FeatureRepresentation::AnchoredInverseDepth => {
                let p_a = anchor.inverse_transform_vector(&(p_w - anchor.translation.vector));
                if p_a.z < MIN_ANCHOR_DEPTH {
                    return None;
                }
                Some(Self::AnchoredInverseDepth {
                    anchor: *anchor,
                    params: Vector3::new(p_a.x / p_a.z, p_a.y / p_a.z, 1.0 / p_a.z),
                })
            }
        }
    }

    pub fn representation(&self) -> FeatureRepresentation {
        match self {
            Self::Euclidean { .. } => FeatureRepresentation::Euclidean,
            Self::AnchoredPolar { .. } => FeatureRepresentation::AnchoredPolar,
            Self::AnchoredInverseDepth { .. } => FeatureRepresentation::AnchoredInverseDepth,
        }
    }

    pub fn params(&self) -> Vector3<f64> {
        match self {
            Self::Euclidean { point } => *point,
            Self::AnchoredPolar { params, .. } | Self::AnchoredInverseDepth { params, .. } => {
                *params
            }
        }
    }

    /// The anchor-frame point and `∂p_A/∂params` for anchored forms.
    fn anchor_point_and_jacobian(params: &Vector3<f64>, polar: bool) -> (Vector3<f64>, Matrix3<f64>) {
        if polar {
            let (alpha, beta, d) = (params.x, params.y, params.z);
            let (sa, ca) = alpha.sin_cos();
            let (sb, cb) = beta.sin_cos();
            let u = Vector3::new(cb * sa, sb, cb * ca);
            let du_dalpha = Vector3::new(cb * ca, 0.0, -cb * sa);
            let du_dbeta = Vector3::new(-sb * sa, cb, -sb * ca);
            let jac = Matrix3::from_columns(&[du_dalpha * d, du_dbeta * d, u]);
            (u * d, jac)
        } else {
            let (a, b, rho) = (params.x, params.y, params.z);
            let inv = 1.0 / rho;
            let inv2 = inv * inv;
            #[rustfmt::skip]
            let jac = Matrix3::new(
                inv, 0.0, -a * inv2,
                0.0, inv, -b * inv2,
                0.0, 0.0, -inv2,
            );
            (Vector3::new(a, b, 1.0) * inv, jac)
        }
    }

    /// The encoded world point.
    pub fn world_point(&self) -> Vector3<f64> {
        self.world_point_with_jacobian().0
    }

    /// The encoded world point and `∂p_W/∂params`.
    pub fn world_point_with_jacobian(&self) -> (Vector3<f64>, Matrix3<f64>) {
        match self {
            Self::Euclidean { point } => (*point, Matrix3::identity()),
            Self::AnchoredPolar { anchor, params } | Self::AnchoredInverseDepth { anchor, params } => {
                let polar = matches!(self, Self::AnchoredPolar { .. });
                let (p_a, jac_a) = Self::anchor_point_and_jacobian(params, polar);
                let rot = anchor.rotation.to_rotation_matrix().into_inner();
                (anchor.transform_vector(&p_a) + anchor.translation.vector, rot * jac_a)
            }
        }
    }

    /// Additive correction in parameter space.
    pub fn correct(&mut self, dx: &Vector3<f64>) {
        match self {
            Self::Euclidean { point } => *point += dx,
            Self::AnchoredPolar { params, .. } | Self::AnchoredInverseDepth { params, .. } => {
                *params += dx
            }
        }
    }
}

/// A landmark held in the filter state.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistentFeature {
    pub id: FeatureId,
    pub parameterization: LandmarkParameterization,
    /// Consecutive chi-square failures; reset on every accepted update.
    pub chi2_failures: usize,
    pub created_at: f64,
}

impl PersistentFeature {
    pub fn new(id: FeatureId, parameterization: LandmarkParameterization, created_at: f64) -> Self {
        Self {
            id,
            parameterization,
            chi2_failures: 0,
            created_at,
        }
    }

    pub fn world_point(&self) -> Vector3<f64> {
        self.parameterization.world_point()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::{Translation3, UnitQuaternion};

    fn anchor() -> Isometry3<f64> {
        Isometry3::from_parts(
            Translation3::new(0.5, -1.0, 0.2),
            UnitQuaternion::from_euler_angles(0.1, -0.3, 1.2),
        )
    }

    fn point_in_front(anchor: &Isometry3<f64>) -> Vector3<f64> {
        (anchor * nalgebra::Point3::new(0.3, -0.2, 4.0)).coords
    }

    fn all_representations() -> [FeatureRepresentation; 3] {
        [
            FeatureRepresentation::Euclidean,
            FeatureRepresentation::AnchoredPolar,
            FeatureRepresentation::AnchoredInverseDepth,
        ]
    }

    #[test]
    fn test_conversion_preserves_world_point() {
        let anchor = anchor();
        let p_w = point_in_front(&anchor);
        for repr in all_representations() {
            let lm = LandmarkParameterization::from_world_point(repr, &p_w, &anchor).unwrap();
            assert_eq!(lm.representation(), repr);
            assert_relative_eq!(lm.world_point(), p_w, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_points_behind_anchor_are_not_encoded() {
        let anchor = anchor();
        let p_w = (anchor * nalgebra::Point3::new(0.0, 0.0, -2.0)).coords;
        assert!(LandmarkParameterization::from_world_point(
            FeatureRepresentation::AnchoredInverseDepth,
            &p_w,
            &anchor
        )
        .is_none());
        assert!(LandmarkParameterization::from_world_point(
            FeatureRepresentation::Euclidean,
            &p_w,
            &anchor
        )
        .is_some());
    }

    #[test]
    fn test_world_point_jacobian_matches_finite_differences() {
        let anchor = anchor();
        let p_w = (anchor * nalgebra::Point3::new(-0.4, 0.5, 3.0)).coords;
        let h = 1e-6;
        for repr in all_representations() {
            let lm = LandmarkParameterization::from_world_point(repr, &p_w, &anchor).unwrap();
            let (_, jac) = lm.world_point_with_jacobian();
            for k in 0..3 {
                let mut dx = Vector3::zeros();
                dx[k] = h;
                let mut plus = lm;
                plus.correct(&dx);
                let mut minus = lm;
                minus.correct(&-dx);
                let numeric = (plus.world_point() - minus.world_point()) / (2.0 * h);
                assert_relative_eq!(jac.column(k).into_owned(), numeric, epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn test_new_feature_starts_without_failures() {
        let anchor = anchor();
        let lm = LandmarkParameterization::Euclidean {
            point: point_in_front(&anchor),
        };
        let feature = PersistentFeature::new(FeatureId(3), lm, 1.5);
        assert_eq!(feature.chi2_failures, 0);
        assert_relative_eq!(feature.world_point(), point_in_front(&anchor));
    }
}
