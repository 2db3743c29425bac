// eqvio_core/src/state/mod.rs

//! The filter state: the symmetry element, the stochastic clones, the
//! persistent landmarks and the joint covariance over all of them.

pub mod covariance;
pub mod landmark;

use std::collections::{BTreeMap, VecDeque};

use nalgebra::{DMatrix, DVector, Isometry3, Matrix3, Matrix6, Vector3, Vector6};
use tracing::{debug, warn};

use crate::error::FilterError;
use crate::groups::{Intrinsics, LieGroup, Se23, SymmetryElement};
use crate::options::StateOptions;
use crate::types::{
    CloneId, CoreMatrix, CoreVector, FeatureId, CLONE_DIM, CORE_DIM, DELTA_DIM, DELTA_OFFSET,
    D_DIM, D_OFFSET, E_DIM, E_OFFSET, L_DIM, L_OFFSET, LANDMARK_DIM, PHI_OFFSET, RHO_OFFSET,
};

pub use covariance::{BlockKey, CovarianceArena};
pub use landmark::{LandmarkParameterization, PersistentFeature};

/// Camera pose `T_WC` captured at an image timestamp.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoseClone {
    pub id: CloneId,
    pub timestamp: f64,
    pub pose: Isometry3<f64>,
}

/// Outcome of a landmark insertion attempt. Only `Inserted` mutates the state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LandmarkInsertion {
    Inserted,
    AtCapacity { cap: usize },
    AlreadyPresent,
}

#[derive(Debug, Clone)]
pub struct FilterState {
    timestamp: f64,
    x: SymmetryElement,
    clones: VecDeque<PoseClone>,
    landmarks: BTreeMap<FeatureId, PersistentFeature>,
    covariance: CovarianceArena,
    next_clone_id: u64,
    max_clones: usize,
    max_landmarks: usize,
}

impl FilterState {
    /// Creates a state with the given core covariance and no clones or landmarks.
    pub fn new(
        timestamp: f64,
        x: SymmetryElement,
        core_covariance: &CoreMatrix,
        max_clones: usize,
        max_landmarks: usize,
    ) -> Self {
        let core = DMatrix::from_column_slice(CORE_DIM, CORE_DIM, core_covariance.as_slice());
        let mut covariance = CovarianceArena::new(core);
        covariance.symmetrize();
        Self {
            timestamp,
            x,
            clones: VecDeque::with_capacity(max_clones + 1),
            landmarks: BTreeMap::new(),
            covariance,
            next_clone_id: 0,
            max_clones,
            max_landmarks,
        }
    }

    /// Builds the initial state around a navigation estimate `d`. Calibration
    /// states that are not estimated online get zero covariance, which keeps
    /// them out of every correction.
    pub fn from_options(timestamp: f64, d: Se23, options: &StateOptions) -> Result<Self, FilterError> {
        options.validate()?;

        let mut e = Vector6::zeros();
        e.fixed_rows_mut::<3>(0).copy_from(&options.gyro_bias_prior);
        e.fixed_rows_mut::<3>(3).copy_from(&options.accel_bias_prior);
        let x = SymmetryElement {
            d,
            delta: options.initial_camera_extrinsics,
            e,
            l: options.initial_camera_intrinsics,
        };

        let mut core = CoreMatrix::zeros();
        core.fixed_view_mut::<D_DIM, D_DIM>(D_OFFSET, D_OFFSET)
            .copy_from(&options.d_init_cov);
        if options.enable_camera_extrinsics_calibration {
            core.fixed_view_mut::<DELTA_DIM, DELTA_DIM>(DELTA_OFFSET, DELTA_OFFSET)
                .copy_from(&options.delta_init_cov);
        }
        core.fixed_view_mut::<E_DIM, E_DIM>(E_OFFSET, E_OFFSET)
            .copy_from(&options.e_init_cov);
        if options.enable_camera_intrinsics_calibration {
            core.fixed_view_mut::<L_DIM, L_DIM>(L_OFFSET, L_OFFSET)
                .copy_from(&options.l_init_cov);
        }

        Ok(Self::new(
            timestamp,
            x,
            &core,
            options.num_clones,
            options.num_persistent_features,
        ))
    }

    // --- Read access ---

    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }

    pub(crate) fn set_timestamp(&mut self, timestamp: f64) {
        self.timestamp = timestamp;
    }

    pub fn element(&self) -> &SymmetryElement {
        &self.x
    }

    pub(crate) fn element_mut(&mut self) -> &mut SymmetryElement {
        &mut self.x
    }

    pub fn d(&self) -> &Se23 {
        &self.x.d
    }

    /// `T_IC`.
    pub fn extrinsics(&self) -> &Isometry3<f64> {
        &self.x.delta
    }

    pub fn gyro_bias(&self) -> Vector3<f64> {
        self.x.e.fixed_rows::<3>(0).into_owned()
    }

    pub fn accel_bias(&self) -> Vector3<f64> {
        self.x.e.fixed_rows::<3>(3).into_owned()
    }

    pub fn intrinsics(&self) -> &Intrinsics {
        &self.x.l
    }

    /// `T_WI`.
    pub fn imu_pose(&self) -> Isometry3<f64> {
        self.x.d.pose()
    }

    /// `T_WC = T_WI · T_IC`.
    pub fn camera_pose(&self) -> Isometry3<f64> {
        self.x.d.pose() * self.x.delta
    }

    /// Clones, oldest first.
    pub fn clones(&self) -> impl Iterator<Item = &PoseClone> {
        self.clones.iter()
    }

    pub fn num_clones(&self) -> usize {
        self.clones.len()
    }

    pub fn max_clones(&self) -> usize {
        self.max_clones
    }

    pub fn find_clone(&self, id: CloneId) -> Option<&PoseClone> {
        self.clones.iter().find(|c| c.id == id)
    }

    pub fn oldest_clone(&self) -> Option<&PoseClone> {
        self.clones.front()
    }

    pub fn newest_clone(&self) -> Option<&PoseClone> {
        self.clones.back()
    }

    pub fn landmarks(&self) -> impl Iterator<Item = &PersistentFeature> {
        self.landmarks.values()
    }

    pub fn landmark(&self, id: FeatureId) -> Option<&PersistentFeature> {
        self.landmarks.get(&id)
    }

    pub(crate) fn landmark_mut(&mut self, id: FeatureId) -> Option<&mut PersistentFeature> {
        self.landmarks.get_mut(&id)
    }

    pub fn num_landmarks(&self) -> usize {
        self.landmarks.len()
    }

    pub fn max_landmarks(&self) -> usize {
        self.max_landmarks
    }

    pub fn covariance(&self) -> &CovarianceArena {
        &self.covariance
    }

    pub(crate) fn covariance_mut(&mut self) -> &mut CovarianceArena {
        &mut self.covariance
    }

    /// The 25×25 covariance of `(D, δ, E, L)`.
    pub fn core_covariance(&self) -> CoreMatrix {
        CoreMatrix::from_fn(|r, c| self.covariance.matrix()[(r, c)])
    }

    // --- Clones ---

    /// Appends a clone of the current camera pose. When the clone count would
    /// exceed the configured maximum, the oldest clone is marginalized and
    /// returned.
    pub fn add_clone(&mut self, timestamp: f64) -> Option<PoseClone> {
        let t_wc = self.camera_pose();

        // ∂ε_clone/∂ε_core: the pose part of the right-invariant navigation
        // error passes through unchanged, the extrinsic error is transported
        // by the adjoint of the clone pose.
        let mut jac = DMatrix::<f64>::zeros(CLONE_DIM, CORE_DIM);
        jac.view_mut((0, PHI_OFFSET), (3, 3))
            .fill_with_identity();
        jac.view_mut((3, RHO_OFFSET), (3, 3))
            .fill_with_identity();
        let ad: Matrix6<f64> = LieGroup::adjoint(&t_wc);
        jac.view_mut((0, DELTA_OFFSET), (CLONE_DIM, DELTA_DIM))
            .copy_from(&ad);

        let n = self.covariance.dim();
        let core_rows = self.covariance.matrix().view((0, 0), (CORE_DIM, n));
        let cross = &jac * core_rows;
        let block = cross.view((0, 0), (CLONE_DIM, CORE_DIM)) * jac.transpose();

        let id = CloneId(self.next_clone_id);
        self.next_clone_id += 1;
        self.covariance.append(BlockKey::Clone(id), &cross, &block);
        self.clones.push_back(PoseClone {
            id,
            timestamp,
            pose: t_wc,
        });
        debug!(clone = %id, t = timestamp, "clone added");

        if self.clones.len() > self.max_clones {
            self.marginalize_oldest_clone()
        } else {
            None
        }
    }

    /// Removes the oldest clone and its covariance rows/columns.
    pub fn marginalize_oldest_clone(&mut self) -> Option<PoseClone> {
        let oldest = self.clones.pop_front()?;
        self.covariance.remove(BlockKey::Clone(oldest.id));
        debug!(clone = %oldest.id, "clone marginalized");
        Some(oldest)
    }

    pub fn marginalize_clone(&mut self, id: CloneId) -> Result<PoseClone, FilterError> {
        let pos = self
            .clones
            .iter()
            .position(|c| c.id == id)
            .ok_or(FilterError::UnknownClone(id))?;
        let removed = self.clones.remove(pos).ok_or(FilterError::UnknownClone(id))?;
        self.covariance.remove(BlockKey::Clone(id));
        Ok(removed)
    }

    // --- Landmarks ---

    /// Inserts a landmark with its cross-covariance against the current state
    /// (`3 × dim`) and its own covariance. Refused once the landmark cap is
    /// reached; a refusal leaves the state untouched.
    pub fn add_persistent_feature(
        &mut self,
        feature: PersistentFeature,
        cross: &DMatrix<f64>,
        covariance: &Matrix3<f64>,
    ) -> LandmarkInsertion {
        if self.landmarks.contains_key(&feature.id) {
            return LandmarkInsertion::AlreadyPresent;
        }
        if self.landmarks.len() >= self.max_landmarks {
            warn!(feature = %feature.id, cap = self.max_landmarks, "landmark refused at capacity");
            return LandmarkInsertion::AtCapacity {
                cap: self.max_landmarks,
            };
        }
        let block = DMatrix::from_column_slice(LANDMARK_DIM, LANDMARK_DIM, covariance.as_slice());
        self.covariance
            .append(BlockKey::Landmark(feature.id), cross, &block);
        self.landmarks.insert(feature.id, feature);
        LandmarkInsertion::Inserted
    }

    pub fn remove_persistent_feature(&mut self, id: FeatureId) -> Result<PersistentFeature, FilterError> {
        let removed = self
            .landmarks
            .remove(&id)
            .ok_or(FilterError::UnknownLandmark(id))?;
        self.covariance.remove(BlockKey::Landmark(id));
        Ok(removed)
    }

    // --- Corrections ---

    /// Applies an error-state correction laid out like the covariance.
    pub fn apply_correction(&mut self, dx: &DVector<f64>) {
        assert_eq!(dx.len(), self.covariance.dim());

        let kappa = CoreVector::from_fn(|r, _| dx[r]);
        self.x = self.x.retract(&kappa);

        for clone in self.clones.iter_mut() {
            if let Some(offset) = self.covariance.offset(BlockKey::Clone(clone.id)) {
                let eps = dx.fixed_rows::<CLONE_DIM>(offset).into_owned();
                clone.pose = <Isometry3<f64> as LieGroup>::exp(&eps) * clone.pose;
            }
        }
        for (id, landmark) in self.landmarks.iter_mut() {
            if let Some(offset) = self.covariance.offset(BlockKey::Landmark(*id)) {
                let eps = dx.fixed_rows::<LANDMARK_DIM>(offset).into_owned();
                landmark.parameterization.correct(&eps);
            }
        }
    }

    /// Replaces the core block with `Φ P_cc Φᵀ + Q` and the core rows of the
    /// cross-covariance with `Φ P_cx`.
    pub(crate) fn transform_core_covariance(&mut self, phi: &CoreMatrix, q: &CoreMatrix) {
        let n = self.covariance.dim();
        let phi = DMatrix::from_column_slice(CORE_DIM, CORE_DIM, phi.as_slice());
        let q = DMatrix::from_column_slice(CORE_DIM, CORE_DIM, q.as_slice());
        let p = self.covariance.matrix_mut();

        let p_cc = p.view((0, 0), (CORE_DIM, CORE_DIM)).into_owned();
        let new_cc = &phi * p_cc * phi.transpose() + q;
        p.view_mut((0, 0), (CORE_DIM, CORE_DIM)).copy_from(&new_cc);

        if n > CORE_DIM {
            let rest = n - CORE_DIM;
            let p_cx = p.view((0, CORE_DIM), (CORE_DIM, rest)).into_owned();
            let new_cx = &phi * p_cx;
            p.view_mut((0, CORE_DIM), (CORE_DIM, rest)).copy_from(&new_cx);
            p.view_mut((CORE_DIM, 0), (rest, CORE_DIM))
                .copy_from(&new_cx.transpose());
        }
        self.covariance.symmetrize();
    }

    /// Full check: finite entries and no negative eigenvalue beyond tolerance.
    pub fn check_covariance(&self, stage: &'static str) -> Result<(), FilterError> {
        self.covariance.check_psd(stage)
    }
}
