// eqvio_core/src/estimation/linalg.rs

//! In-place Givens QR used to separate a feature's own Jacobian from the rest
//! of the state.

use nalgebra::{DMatrix, DVector};

/// The stacked system `r = H_x δx + H_f δp_f + n` after an orthonormal
/// rotation that makes `H_f` upper triangular.
///
/// The first `feature_dim` rows (`h_f1`, `h_x1`, `r1`) carry all the information
/// about the feature; the remaining rows (`h_x2`, `r2`) are the left nullspace
/// projection that no longer depends on it. The rotation is orthonormal, so
/// isotropic measurement noise stays isotropic in both parts.
#[derive(Debug, Clone)]
pub struct GivensSplit {
    pub h_f1: DMatrix<f64>,
    pub h_x1: DMatrix<f64>,
    pub r1: DVector<f64>,
    pub h_x2: DMatrix<f64>,
    pub r2: DVector<f64>,
}

fn rotate_rows(m: &mut DMatrix<f64>, upper: usize, lower: usize, first_col: usize, c: f64, s: f64) {
    for j in first_col..m.ncols() {
        let a = m[(upper, j)];
        let b = m[(lower, j)];
        m[(upper, j)] = c * a + s * b;
        m[(lower, j)] = -s * a + c * b;
    }
}

/// Applies Givens rotations bottom-up, column by column, until `h_f` is upper
/// triangular, mirroring every rotation on `h_x` and `r`.
pub fn givens_split(mut h_f: DMatrix<f64>, mut h_x: DMatrix<f64>, mut r: DVector<f64>) -> GivensSplit {
    let rows = h_f.nrows();
    let feature_dim = h_f.ncols();
    assert_eq!(h_x.nrows(), rows);
    assert_eq!(r.len(), rows);
    assert!(rows >= feature_dim, "fewer rows than feature parameters");

    for col in 0..feature_dim {
        for row in (col + 1..rows).rev() {
            let a = h_f[(row - 1, col)];
            let b = h_f[(row, col)];
            let norm = a.hypot(b);
            if norm <= f64::MIN_POSITIVE {
                continue;
            }
            let (c, s) = (a / norm, b / norm);
            rotate_rows(&mut h_f, row - 1, row, col, c, s);
            h_f[(row, col)] = 0.0;
            rotate_rows(&mut h_x, row - 1, row, 0, c, s);
            let (ra, rb) = (r[row - 1], r[row]);
            r[row - 1] = c * ra + s * rb;
            r[row] = -s * ra + c * rb;
        }
    }

    let tail = rows - feature_dim;
    GivensSplit {
        h_f1: h_f.rows(0, feature_dim).into_owned(),
        h_x1: h_x.rows(0, feature_dim).into_owned(),
        r1: r.rows(0, feature_dim).into_owned(),
        h_x2: h_x.rows(feature_dim, tail).into_owned(),
        r2: r.rows(feature_dim, tail).into_owned(),
    }
}

/// Projects the system onto the left nullspace of `h_f`, returning the
/// feature-free Jacobian and residual.
pub fn nullspace_project(
    h_f: DMatrix<f64>,
    h_x: DMatrix<f64>,
    r: DVector<f64>,
) -> (DMatrix<f64>, DVector<f64>) {
    let split = givens_split(h_f, h_x, r);
    (split.h_x2, split.r2)
}
