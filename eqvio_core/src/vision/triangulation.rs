// eqvio_core/src/vision/triangulation.rs

//! Multi-view triangulation of a single feature from known camera poses.
//!
//! A linear least-squares estimate (minimizing the squared distance to every
//! viewing ray) seeds a few Gauss-Newton iterations on the normalized
//! reprojection error.

use nalgebra::{Isometry3, Matrix2x3, Matrix3, Vector2, Vector3};

/// Ratio of smallest to largest eigenvalue of the normal matrix below which
/// the viewing rays are considered parallel.
const MIN_RAY_CONDITIONING: f64 = 1e-6;
const GAUSS_NEWTON_ITERATIONS: usize = 5;
/// Points closer than this to any observing camera are rejected.
const MIN_DEPTH: f64 = 0.05;

/// One observation of the feature: camera pose `T_WC` and normalized image
/// coordinates.
#[derive(Debug, Clone, Copy)]
pub struct RayObservation {
    pub camera_pose: Isometry3<f64>,
    pub normalized: Vector2<f64>,
}

/// `∂π/∂p_C` for `π(p) = [x/z, y/z]`.
pub fn projection_jacobian(p_c: &Vector3<f64>) -> Matrix2x3<f64> {
    let inv_z = 1.0 / p_c.z;
    #[rustfmt::skip]
    let jac = Matrix2x3::new(
        inv_z, 0.0, -p_c.x * inv_z * inv_z,
        0.0, inv_z, -p_c.y * inv_z * inv_z,
    );
    jac
}

fn camera_point(pose: &Isometry3<f64>, p_w: &Vector3<f64>) -> Vector3<f64> {
    pose.inverse_transform_vector(&(p_w - pose.translation.vector))
}

/// Triangulates a world point from at least two observations. Returns `None`
/// for degenerate geometry or a point that ends up behind a camera.
pub fn triangulate(observations: &[RayObservation]) -> Option<Vector3<f64>> {
    if observations.len() < 2 {
        return None;
    }

    let mut a = Matrix3::zeros();
    let mut b = Vector3::zeros();
    for obs in observations {
        let bearing = obs
            .camera_pose
            .transform_vector(&Vector3::new(obs.normalized.x, obs.normalized.y, 1.0))
            .normalize();
        let proj = Matrix3::identity() - bearing * bearing.transpose();
        a += proj;
        b += proj * obs.camera_pose.translation.vector;
    }

    let eigenvalues = a.symmetric_eigenvalues();
    let (min, max) = (eigenvalues.min(), eigenvalues.max());
    if max <= 0.0 || min / max < MIN_RAY_CONDITIONING {
        return None;
    }
    let mut p = a.cholesky()?.solve(&b);

    for _ in 0..GAUSS_NEWTON_ITERATIONS {
        let mut h = Matrix3::zeros();
        let mut g = Vector3::zeros();
        for obs in observations {
            let p_c = camera_point(&obs.camera_pose, &p);
            if p_c.z < MIN_DEPTH {
                return None;
            }
            let r = obs.normalized - Vector2::new(p_c.x / p_c.z, p_c.y / p_c.z);
            let rot_t = obs.camera_pose.rotation.to_rotation_matrix().into_inner().transpose();
            let jac = projection_jacobian(&p_c) * rot_t;
            h += jac.transpose() * jac;
            g += jac.transpose() * r;
        }
        let step = h.cholesky()?.solve(&g);
        p += step;
        if step.norm() < 1e-10 * p.norm().max(1.0) {
            break;
        }
    }

    let in_front = observations
        .iter()
        .all(|obs| camera_point(&obs.camera_pose, &p).z >= MIN_DEPTH);
    (in_front && p.iter().all(|v| v.is_finite())).then_some(p)
}
