//! The joint covariance of the filter, stored as a resizable arena.
//!
//! Every block (the core `D, δ, E, L` block, each clone and each landmark) is
//! addressed by a stable [`BlockKey`] instead of a physical row index. Adding a
//! block appends rows/columns; removing one compacts the index, which for a
//! Gaussian in covariance form is exactly the marginalization of that block.

use std::collections::HashMap;

use nalgebra::{DMatrix, SymmetricEigen};

use crate::error::FilterError;
use crate::types::{CloneId, FeatureId};

/// Relative tolerance on negative eigenvalues, scaled by the largest eigenvalue.
pub const PSD_RELATIVE_TOLERANCE: f64 = 1e-9;
/// Floor on that tolerance for an all-zero covariance.
const PSD_ABSOLUTE_FLOOR: f64 = 1e-15;

/// Logical address of a covariance block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockKey {
    Core,
    Clone(CloneId),
    Landmark(FeatureId),
}

#[derive(Debug, Clone)]
struct Block {
    key: BlockKey,
    offset: usize,
    dim: usize,
}

#[derive(Debug, Clone)]
pub struct CovarianceArena {
    matrix: DMatrix<f64>,
    blocks: Vec<Block>,
    index: HashMap<BlockKey, usize>,
}

impl CovarianceArena {
    /// Creates an arena holding only the core block.
    pub fn new(core: DMatrix<f64>) -> Self {
        assert_eq!(core.nrows(), core.ncols(), "core covariance must be square");
        let dim = core.nrows();
        let mut arena = Self {
            matrix: core,
            blocks: vec![Block {
                key: BlockKey::Core,
                offset: 0,
                dim,
            }],
            index: HashMap::new(),
        };
        arena.reindex();
        arena
    }

    /// Total dimension of the error state.
    pub fn dim(&self) -> usize {
        self.matrix.nrows()
    }

    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.matrix
    }

    pub(crate) fn matrix_mut(&mut self) -> &mut DMatrix<f64> {
        &mut self.matrix
    }

    pub fn contains(&self, key: BlockKey) -> bool {
        self.index.contains_key(&key)
    }

    /// Row/column offset of a block in the current layout.
    pub fn offset(&self, key: BlockKey) -> Option<usize> {
        self.index.get(&key).map(|&i| self.blocks[i].offset)
    }

    pub fn block_dim(&self, key: BlockKey) -> Option<usize> {
        self.index.get(&key).map(|&i| self.blocks[i].dim)
    }

    /// Keys in layout order.
    pub fn keys(&self) -> impl Iterator<Item = BlockKey> + '_ {
        self.blocks.iter().map(|b| b.key)
    }

    /// Owned copy of the cross-covariance between two blocks.
    pub fn cross(&self, row: BlockKey, col: BlockKey) -> Option<DMatrix<f64>> {
        let (ro, rd) = (self.offset(row)?, self.block_dim(row)?);
        let (co, cd) = (self.offset(col)?, self.block_dim(col)?);
        Some(self.matrix.view((ro, co), (rd, cd)).into_owned())
    }

    /// Owned copy of a diagonal block.
    pub fn block(&self, key: BlockKey) -> Option<DMatrix<f64>> {
        self.cross(key, key)
    }

    /// Appends a block with its cross-covariance against the existing state
    /// (`cross` is `dim × self.dim()`) and its own covariance (`dim × dim`).
    pub fn append(&mut self, key: BlockKey, cross: &DMatrix<f64>, block: &DMatrix<f64>) {
        assert!(!self.contains(key), "block {:?} already present", key);
        let n = self.dim();
        let dim = block.nrows();
        assert_eq!(cross.shape(), (dim, n));
        assert_eq!(block.shape(), (dim, dim));

        let mut grown = DMatrix::zeros(n + dim, n + dim);
        grown.view_mut((0, 0), (n, n)).copy_from(&self.matrix);
        grown.view_mut((n, 0), (dim, n)).copy_from(cross);
        grown.view_mut((0, n), (n, dim)).copy_from(&cross.transpose());
        grown.view_mut((n, n), (dim, dim)).copy_from(block);

        self.matrix = grown;
        self.blocks.push(Block {
            key,
            offset: n,
            dim,
        });
        self.reindex();
        self.symmetrize();
    }

    /// Removes a block and compacts the layout. Returns `false` if the block
    /// was not present.
    pub fn remove(&mut self, key: BlockKey) -> bool {
        let Some(&pos) = self.index.get(&key) else {
            return false;
        };
        assert!(key != BlockKey::Core, "the core block cannot be removed");

        let removed = self.blocks.remove(pos);
        let keep: Vec<usize> = (0..self.dim())
            .filter(|&i| i < removed.offset || i >= removed.offset + removed.dim)
            .collect();
        self.matrix = self.matrix.select_rows(&keep).select_columns(&keep);
        self.reindex();
        true
    }

    /// Enforces exact symmetry: `Σ ← (Σ + Σᵀ)/2`.
    pub fn symmetrize(&mut self) {
        let transposed = self.matrix.transpose();
        self.matrix += transposed;
        self.matrix *= 0.5;
    }

    /// Cheap validity check: every entry finite, no negative variances.
    pub fn check_diagonal(&self, stage: &'static str) -> Result<(), FilterError> {
        if let Some(i) = (0..self.dim()).find(|&i| {
            let v = self.matrix[(i, i)];
            !v.is_finite() || v < 0.0
        }) {
            return Err(FilterError::NumericalInstability {
                stage,
                detail: format!("variance {} at index {}", self.matrix[(i, i)], i),
            });
        }
        if self.matrix.iter().any(|v| !v.is_finite()) {
            return Err(FilterError::NumericalInstability {
                stage,
                detail: "non-finite covariance entry".to_string(),
            });
        }
        Ok(())
    }

    /// Full validity check: finite entries and eigenvalues non-negative
    /// within a tolerance relative to the largest eigenvalue.
    pub fn check_psd(&self, stage: &'static str) -> Result<(), FilterError> {
        self.check_diagonal(stage)?;
        let eigenvalues = SymmetricEigen::new(self.matrix.clone()).eigenvalues;
        let max = eigenvalues.iter().cloned().fold(0.0_f64, f64::max);
        let min = eigenvalues.iter().cloned().fold(f64::INFINITY, f64::min);
        if min < -(PSD_RELATIVE_TOLERANCE * max.abs() + PSD_ABSOLUTE_FLOOR) {
            return Err(FilterError::NumericalInstability {
                stage,
                detail: format!("minimum eigenvalue {:e} (largest {:e})", min, max),
            });
        }
        Ok(())
    }

    fn reindex(&mut self) {
        self.index.clear();
        let mut offset = 0;
        for (i, block) in self.blocks.iter_mut().enumerate() {
            block.offset = offset;
            offset += block.dim;
            self.index.insert(block.key, i);
        }
    }
}
