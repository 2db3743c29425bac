// eqvio_core/src/estimation/updater.rs

//! Visual update of the filter.
//!
//! Every frame adds a clone and produces one batched Kalman correction built
//! from two kinds of residuals:
//! - persistent landmarks seen in the frame, linearized against the newest
//!   clone and their own covariance block;
//! - multi-clone-constraint (MSC) features, i.e. tracks that ended or would
//!   lose their oldest observation, triangulated and projected onto the left
//!   nullspace of their point Jacobian so the point itself never enters the
//!   state.
//!
//! Each feature is gated on its own Mahalanobis distance before it joins the
//! batch. Mature tracks are promoted to landmarks by delayed initialization.

use std::collections::BTreeMap;

use nalgebra::{Cholesky, DMatrix, DVector, Matrix3, Vector2, Vector3};
use tracing::{debug, info};

use crate::error::FilterError;
use crate::estimation::chi_square::ChiSquareTable;
use crate::estimation::linalg::{givens_split, nullspace_project};
use crate::messages::CameraMeasurement;
use crate::models::{ReprojectionLinearization, ReprojectionModel};
use crate::options::{FeatureRepresentation, MsceqfOptions, UpdaterOptions};
use crate::state::{
    BlockKey, FilterState, LandmarkInsertion, LandmarkParameterization, PersistentFeature,
};
use crate::types::{CloneId, FeatureId, CLONE_DIM, LANDMARK_DIM, L_DIM, L_OFFSET};
use crate::vision::triangulation::{triangulate, RayObservation};

/// Outcome of one frame update. Every id in the frame ends up in at most one
/// of `accepted`/`rejected`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateReport {
    pub timestamp: f64,
    /// Clone added for this frame.
    pub clone: Option<CloneId>,
    /// Clone marginalized to make room for the new one.
    pub evicted_clone: Option<CloneId>,
    /// Features whose residuals entered a Kalman correction.
    pub accepted: Vec<FeatureId>,
    /// Features excluded by the chi-square gate or by failed triangulation.
    pub rejected: Vec<FeatureId>,
    pub landmarks_added: Vec<FeatureId>,
    /// Promotions refused because the landmark cap was reached.
    pub landmarks_refused: Vec<FeatureId>,
    pub landmarks_removed: Vec<FeatureId>,
}

/// Undistorted pixel observations of one feature, keyed by clone.
#[derive(Debug, Clone, Default)]
struct Track {
    observations: BTreeMap<CloneId, Vector2<f64>>,
}

/// A residual ready for gating, laid out against the full error state.
#[derive(Debug, Clone)]
struct FeatureResidual {
    id: FeatureId,
    h: DMatrix<f64>,
    r: DVector<f64>,
}

#[derive(Debug, Clone)]
pub struct Updater {
    options: UpdaterOptions,
    init_delay: f64,
    model: ReprojectionModel,
    chi2: ChiSquareTable,
    tracks: BTreeMap<FeatureId, Track>,
    /// First observation time of every feature tracked without a break.
    /// Outlives its `Track` when that is consumed as an MSC feature.
    first_seen: BTreeMap<FeatureId, f64>,
}

impl Updater {
    pub fn new(options: &MsceqfOptions) -> Self {
        Self {
            options: options.updater.clone(),
            init_delay: options.persistent_feature_init_delay,
            model: ReprojectionModel::new(options.updater.pixel_std),
            chi2: ChiSquareTable::new(options.updater.chi2_confidence),
            tracks: BTreeMap::new(),
            first_seen: BTreeMap::new(),
        }
    }

    pub fn representation(&self) -> FeatureRepresentation {
        self.options.persistent_feature_representation
    }

    /// Number of tracks waiting to be used as MSC features or promoted.
    pub fn num_tracks(&self) -> usize {
        self.tracks.len()
    }

    pub fn track_length(&self, id: FeatureId) -> Option<usize> {
        self.tracks.get(&id).map(|t| t.observations.len())
    }

    /// Seconds since `id` was first observed in its current unbroken run.
    pub fn track_age(&self, id: FeatureId, now: f64) -> Option<f64> {
        self.first_seen.get(&id).map(|t| now - t)
    }

    /// Processes one frame of undistorted pixel observations. The state must
    /// already be propagated to the frame timestamp.
    pub fn update(
        &mut self,
        state: &mut FilterState,
        frame: &CameraMeasurement,
    ) -> Result<UpdateReport, FilterError> {
        let mut report = UpdateReport {
            timestamp: frame.timestamp,
            ..Default::default()
        };

        // Tracks seen by the clone about to be evicted would lose that
        // observation; use them now while the clone is still in the state.
        if state.num_clones() >= state.max_clones() {
            if let Some(oldest) = state.oldest_clone().map(|c| c.id) {
                let expiring: Vec<FeatureId> = self
                    .tracks
                    .iter()
                    .filter(|(_, t)| {
                        t.observations.contains_key(&oldest)
                            && t.observations.len() >= self.options.min_msc_track_length
                    })
                    .map(|(id, _)| *id)
                    .collect();
                let candidates = self.consume_msc_tracks(state, &expiring, &mut report)?;
                self.gate_and_update(state, candidates, &mut report)?;
            }
        }

        report.evicted_clone = state.add_clone(frame.timestamp).map(|c| c.id);
        let clone_id = state
            .newest_clone()
            .map(|c| c.id)
            .ok_or(FilterError::NotInitialized)?;
        report.clone = Some(clone_id);
        self.prune_tracks(state);

        for (id, uv) in &frame.features {
            if state.landmark(*id).is_some() {
                continue;
            }
            self.first_seen.entry(*id).or_insert(frame.timestamp);
            self.tracks
                .entry(*id)
                .or_default()
                .observations
                .insert(clone_id, *uv);
        }

        // Persistent landmarks observed in this frame.
        let mut candidates = Vec::new();
        let observed_landmarks: Vec<FeatureId> = frame
            .features
            .keys()
            .copied()
            .filter(|id| state.landmark(*id).is_some())
            .collect();
        for id in &observed_landmarks {
            match self.landmark_residual(state, *id, clone_id, &frame.features[id])? {
                Some(residual) => candidates.push(residual),
                None => self.record_landmark_failure(state, *id, &mut report),
            }
        }

        // Tracks that ended before this frame.
        let lost: Vec<FeatureId> = self
            .tracks
            .keys()
            .copied()
            .filter(|id| !frame.features.contains_key(id))
            .collect();
        let long_enough: Vec<FeatureId> = lost
            .iter()
            .copied()
            .filter(|id| {
                self.track_length(*id)
                    .is_some_and(|n| n >= self.options.min_msc_track_length)
            })
            .collect();
        candidates.extend(self.consume_msc_tracks(state, &long_enough, &mut report)?);
        for id in &lost {
            self.tracks.remove(id);
        }
        self.first_seen.retain(|id, _| frame.features.contains_key(id));

        let landmark_gate = self.gate_and_update(state, candidates, &mut report)?;
        for (id, passed) in landmark_gate {
            if !observed_landmarks.contains(&id) {
                continue;
            }
            if passed {
                if let Some(landmark) = state.landmark_mut(id) {
                    landmark.chi2_failures = 0;
                }
            } else {
                self.record_landmark_failure(state, id, &mut report);
            }
        }

        // Landmark lifecycle.
        let stale: Vec<FeatureId> = state
            .landmarks()
            .filter(|l| {
                !frame.features.contains_key(&l.id)
                    || l.chi2_failures > self.options.max_persistent_feature_failures
            })
            .map(|l| l.id)
            .collect();
        for id in stale {
            state.remove_persistent_feature(id)?;
            report.landmarks_removed.push(id);
        }

        self.promote_mature_tracks(state, frame.timestamp, &mut report)?;

        debug!(
            t = frame.timestamp,
            accepted = report.accepted.len(),
            rejected = report.rejected.len(),
            landmarks = state.num_landmarks(),
            tracks = self.tracks.len(),
            "frame update"
        );
        Ok(report)
    }

    fn record_landmark_failure(&self, state: &mut FilterState, id: FeatureId, report: &mut UpdateReport) {
        if let Some(landmark) = state.landmark_mut(id) {
            landmark.chi2_failures += 1;
        }
        if !report.rejected.contains(&id) {
            report.rejected.push(id);
        }
    }

    /// Drops observations whose clone has left the state.
    fn prune_tracks(&mut self, state: &FilterState) {
        self.tracks.retain(|_, track| {
            track
                .observations
                .retain(|clone, _| state.find_clone(*clone).is_some());
            !track.observations.is_empty()
        });
    }

    // ==== == Residuals == ====

    fn write_observation_rows(
        state: &FilterState,
        h: &mut DMatrix<f64>,
        row: usize,
        clone: CloneId,
        lin: &ReprojectionLinearization,
    ) -> Result<(), FilterError> {
        let offset = state
            .covariance()
            .offset(BlockKey::Clone(clone))
            .ok_or(FilterError::UnknownClone(clone))?;
        h.fixed_view_mut::<2, CLONE_DIM>(row, offset)
            .copy_from(&lin.h_clone);
        h.fixed_view_mut::<2, L_DIM>(row, L_OFFSET)
            .copy_from(&lin.h_intrinsics);
        Ok(())
    }

    fn landmark_residual(
        &self,
        state: &FilterState,
        id: FeatureId,
        clone: CloneId,
        uv: &Vector2<f64>,
    ) -> Result<Option<FeatureResidual>, FilterError> {
        let landmark = state.landmark(id).ok_or(FilterError::UnknownLandmark(id))?;
        let pose = state
            .find_clone(clone)
            .ok_or(FilterError::UnknownClone(clone))?
            .pose;
        let (p_w, dp_dparams) = landmark.parameterization.world_point_with_jacobian();
        let Some(lin) = self.model.linearize(&pose, state.intrinsics(), &p_w, uv) else {
            return Ok(None);
        };

        let mut h = DMatrix::zeros(2, state.covariance().dim());
        Self::write_observation_rows(state, &mut h, 0, clone, &lin)?;
        let offset = state
            .covariance()
            .offset(BlockKey::Landmark(id))
            .ok_or(FilterError::UnknownLandmark(id))?;
        h.fixed_view_mut::<2, LANDMARK_DIM>(0, offset)
            .copy_from(&(lin.h_point * dp_dparams));

        Ok(Some(FeatureResidual {
            id,
            h,
            r: DVector::from_column_slice(lin.residual.as_slice()),
        }))
    }

    /// Stacks every observation of a track: `r = H_x δx + H_f δp + n`, with the
    /// point Jacobian `H_f` taken with respect to `parameters` through
    /// `dp_dparams`. `None` when an observation cannot be linearized.
    fn stack_track(
        &self,
        state: &FilterState,
        track: &Track,
        p_w: &Vector3<f64>,
        dp_dparams: &Matrix3<f64>,
    ) -> Result<Option<(DMatrix<f64>, DMatrix<f64>, DVector<f64>)>, FilterError> {
        let rows = 2 * track.observations.len();
        let mut h_x = DMatrix::zeros(rows, state.covariance().dim());
        let mut h_f = DMatrix::zeros(rows, LANDMARK_DIM);
        let mut r = DVector::zeros(rows);

        for (k, (clone, uv)) in track.observations.iter().enumerate() {
            let pose = state
                .find_clone(*clone)
                .ok_or(FilterError::UnknownClone(*clone))?
                .pose;
            let Some(lin) = self.model.linearize(&pose, state.intrinsics(), p_w, uv) else {
                return Ok(None);
            };
            Self::write_observation_rows(state, &mut h_x, 2 * k, *clone, &lin)?;
            h_f.fixed_view_mut::<2, LANDMARK_DIM>(2 * k, 0)
                .copy_from(&(lin.h_point * dp_dparams));
            r.fixed_rows_mut::<2>(2 * k).copy_from(&lin.residual);
        }
        Ok(Some((h_x, h_f, r)))
    }

    fn triangulate_track(state: &FilterState, track: &Track) -> Option<Vector3<f64>> {
        let rays: Vec<RayObservation> = track
            .observations
            .iter()
            .filter_map(|(clone, uv)| {
                state.find_clone(*clone).map(|c| RayObservation {
                    camera_pose: c.pose,
                    normalized: state.intrinsics().normalize(uv),
                })
            })
            .collect();
        triangulate(&rays)
    }

    /// Removes the given tracks from the store and turns them into
    /// point-free residuals. Tracks that cannot be triangulated or linearized
    /// are reported as rejected.
    fn consume_msc_tracks(
        &mut self,
        state: &FilterState,
        ids: &[FeatureId],
        report: &mut UpdateReport,
    ) -> Result<Vec<FeatureResidual>, FilterError> {
        let mut residuals = Vec::with_capacity(ids.len());
        for id in ids {
            let Some(track) = self.tracks.remove(id) else {
                continue;
            };
            match self.msc_residual(state, *id, &track)? {
                Some(residual) => residuals.push(residual),
                None => report.rejected.push(*id),
            }
        }
        Ok(residuals)
    }

    fn msc_residual(
        &self,
        state: &FilterState,
        id: FeatureId,
        track: &Track,
    ) -> Result<Option<FeatureResidual>, FilterError> {
        if track.observations.len() < 2 {
            return Ok(None);
        }
        let Some(p_w) = Self::triangulate_track(state, track) else {
            return Ok(None);
        };
        let Some((h_x, h_f, r)) = self.stack_track(state, track, &p_w, &Matrix3::identity())? else {
            return Ok(None);
        };
        let (h, r) = nullspace_project(h_f, h_x, r);
        Ok(Some(FeatureResidual { id, h, r }))
    }

    // ==== == Gating and correction == ====

    /// `H P Hᵀ + σ² I`.
    fn innovation_covariance(&self, state: &FilterState, h: &DMatrix<f64>) -> (DMatrix<f64>, DMatrix<f64>) {
        let ph_t = state.covariance().matrix() * h.transpose();
        let mut s = h * &ph_t;
        let variance = self.model.noise_variance();
        for i in 0..s.nrows() {
            s[(i, i)] += variance;
        }
        (s, ph_t)
    }

    /// Gates every residual independently, then applies one correction with
    /// the survivors. Returns the gate outcome per feature.
    fn gate_and_update(
        &mut self,
        state: &mut FilterState,
        candidates: Vec<FeatureResidual>,
        report: &mut UpdateReport,
    ) -> Result<Vec<(FeatureId, bool)>, FilterError> {
        let mut outcome = Vec::with_capacity(candidates.len());
        let mut accepted = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            if candidate.r.is_empty() {
                continue;
            }
            let (s, _) = self.innovation_covariance(state, &candidate.h);
            let chol = Cholesky::new(s).ok_or(FilterError::DecompositionFailed { stage: "gating" })?;
            let distance = chol.solve(&candidate.r).dot(&candidate.r);
            let threshold = self.chi2.threshold(candidate.r.len());
            if distance < threshold {
                outcome.push((candidate.id, true));
                accepted.push(candidate);
            } else {
                debug!(feature = %candidate.id, distance, threshold, "feature rejected by chi-square gate");
                outcome.push((candidate.id, false));
                report.rejected.push(candidate.id);
            }
        }
        if accepted.is_empty() {
            return Ok(outcome);
        }

        let rows: usize = accepted.iter().map(|c| c.r.len()).sum();
        let dim = state.covariance().dim();
        let mut h = DMatrix::zeros(rows, dim);
        let mut r = DVector::zeros(rows);
        let mut row = 0;
        for candidate in &accepted {
            let n = candidate.r.len();
            h.rows_mut(row, n).copy_from(&candidate.h);
            r.rows_mut(row, n).copy_from(&candidate.r);
            row += n;
            report.accepted.push(candidate.id);
        }
        self.kalman_update(state, &h, &r, "update")?;
        Ok(outcome)
    }

    /// `K = P Hᵀ S⁻¹`, `δx = K r`, `P ← P − K H P`.
    fn kalman_update(
        &self,
        state: &mut FilterState,
        h: &DMatrix<f64>,
        r: &DVector<f64>,
        stage: &'static str,
    ) -> Result<(), FilterError> {
        let (s, ph_t) = self.innovation_covariance(state, h);
        let chol = Cholesky::new(s).ok_or_else(|| FilterError::NumericalInstability {
            stage,
            detail: format!("innovation covariance of {} rows is not positive definite", r.len()),
        })?;
        let gain = chol.solve(&ph_t.transpose()).transpose();
        let dx = &gain * r;
        let reduction = &gain * ph_t.transpose();

        *state.covariance_mut().matrix_mut() -= reduction;
        state.covariance_mut().symmetrize();
        state.apply_correction(&dx);
        state.check_covariance(stage)
    }

    // ==== == Landmark promotion == ====

    fn promote_mature_tracks(
        &mut self,
        state: &mut FilterState,
        now: f64,
        report: &mut UpdateReport,
    ) -> Result<(), FilterError> {
        let mature: Vec<FeatureId> = self
            .tracks
            .iter()
            .filter(|(id, t)| {
                t.observations.len() >= 2
                    && self.track_age(**id, now).is_some_and(|age| age >= self.init_delay)
            })
            .map(|(id, _)| *id)
            .collect();

        for id in mature {
            if state.num_landmarks() >= state.max_landmarks() {
                debug!(feature = %id, "landmark promotion refused at capacity");
                report.landmarks_refused.push(id);
                continue;
            }
            let Some(track) = self.tracks.remove(&id) else {
                continue;
            };
            match self.initialize_landmark(state, id, &track, now)? {
                Some(LandmarkInsertion::Inserted) => {
                    self.first_seen.remove(&id);
                    info!(feature = %id, t = now, "landmark initialized");
                    report.landmarks_added.push(id);
                }
                Some(LandmarkInsertion::AtCapacity { .. }) => {
                    self.tracks.insert(id, track);
                    report.landmarks_refused.push(id);
                }
                Some(LandmarkInsertion::AlreadyPresent) => {}
                None => report.rejected.push(id),
            }
        }
        Ok(())
    }

    /// Delayed initialization: the stacked track residual is split by a
    /// Givens QR of the point Jacobian. The first three rows fix the new
    /// landmark's covariance and its correlation with the state, the
    /// remaining rows update the state.
    fn initialize_landmark(
        &mut self,
        state: &mut FilterState,
        id: FeatureId,
        track: &Track,
        now: f64,
    ) -> Result<Option<LandmarkInsertion>, FilterError> {
        let Some(p_w) = Self::triangulate_track(state, track) else {
            return Ok(None);
        };
        let anchor = state
            .newest_clone()
            .ok_or(FilterError::NotInitialized)?
            .pose;
        let Some(parameterization) =
            LandmarkParameterization::from_world_point(self.representation(), &p_w, &anchor)
        else {
            return Ok(None);
        };
        let (p_w, dp_dparams) = parameterization.world_point_with_jacobian();
        let Some((h_x, h_f, r)) = self.stack_track(state, track, &p_w, &dp_dparams)? else {
            return Ok(None);
        };

        let split = givens_split(h_f, h_x, r);
        if !split.r2.is_empty() {
            let (s, _) = self.innovation_covariance(state, &split.h_x2);
            let chol = Cholesky::new(s).ok_or(FilterError::DecompositionFailed {
                stage: "landmark initialization",
            })?;
            let distance = chol.solve(&split.r2).dot(&split.r2);
            if distance >= self.chi2.threshold(split.r2.len()) {
                debug!(feature = %id, distance, "landmark initialization rejected by chi-square gate");
                return Ok(None);
            }
        }

        // P_fx = −H_f1⁻¹ H_x1 P,  P_ff = H_f1⁻¹ (H_x1 P H_x1ᵀ + σ² I) H_f1⁻ᵀ
        let (s1, ph1_t) = self.innovation_covariance(state, &split.h_x1);
        let Some(cross) = split.h_f1.solve_upper_triangular(&ph1_t.transpose()) else {
            return Ok(None);
        };
        let Some(half) = split.h_f1.solve_upper_triangular(&s1) else {
            return Ok(None);
        };
        let Some(p_ff) = split.h_f1.solve_upper_triangular(&half.transpose()) else {
            return Ok(None);
        };
        let p_ff = Matrix3::from_fn(|r, c| 0.5 * (p_ff[(r, c)] + p_ff[(c, r)]));
        let cross = -cross;

        let old_dim = state.covariance().dim();
        let feature = PersistentFeature::new(id, parameterization, now);
        let insertion = state.add_persistent_feature(feature, &cross, &p_ff);
        if insertion != LandmarkInsertion::Inserted {
            return Ok(Some(insertion));
        }

        if !split.r2.is_empty() {
            let mut h = DMatrix::zeros(split.r2.len(), state.covariance().dim());
            h.columns_mut(0, old_dim).copy_from(&split.h_x2);
            self.kalman_update(state, &h, &split.r2, "landmark initialization")?;
        }
        Ok(Some(LandmarkInsertion::Inserted))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estimation::propagator::Propagator;
    use crate::groups::Se23;
    use crate::messages::ImuMeasurement;
    use crate::types::Matrix9;
    use approx::assert_relative_eq;
    use nalgebra::{Isometry3, Matrix4, Matrix6, UnitQuaternion};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use rand_distr::{Distribution, Normal};

    fn test_options() -> MsceqfOptions {
        let mut options = MsceqfOptions::default();
        options.state.d_init_cov = Matrix9::identity() * 1e-6;
        options.state.delta_init_cov = Matrix6::identity() * 1e-6;
        options.state.l_init_cov = Matrix4::identity() * 1e-8;
        options.state.initial_camera_extrinsics = Isometry3::identity();
        options.persistent_feature_init_delay = 10.0;
        options
    }

    fn state_with(options: &MsceqfOptions, velocity: Vector3<f64>) -> FilterState {
        let d = Se23::new(UnitQuaternion::identity(), velocity, Vector3::zeros());
        FilterState::from_options(0.0, d, &options.state).unwrap()
    }

    /// Points in front of the initial camera, which looks along world +z.
    fn scene() -> Vec<(FeatureId, Vector3<f64>)> {
        (0..6)
            .map(|i| {
                let x = -1.0 + 0.4 * i as f64;
                let y = if i % 2 == 0 { -0.5 } else { 0.6 };
                (FeatureId(10 + i), Vector3::new(x, y, 5.0 + 0.3 * i as f64))
            })
            .collect()
    }

    fn observe(
        state: &FilterState,
        points: &[(FeatureId, Vector3<f64>)],
        noise: Option<(&mut ChaCha8Rng, f64)>,
    ) -> CameraMeasurement {
        let model = ReprojectionModel::new(1.0);
        let pose = state.camera_pose();
        let mut features: BTreeMap<FeatureId, Vector2<f64>> = points
            .iter()
            .filter_map(|(id, p)| model.predict(&pose, state.intrinsics(), p).map(|uv| (*id, uv)))
            .collect();
        if let Some((rng, std)) = noise {
            let normal = Normal::new(0.0, std).unwrap();
            for uv in features.values_mut() {
                *uv += Vector2::new(normal.sample(rng), normal.sample(rng));
            }
        }
        CameraMeasurement::new(state.timestamp(), features)
    }

    fn insert_landmark(state: &mut FilterState, id: FeatureId, p_w: Vector3<f64>) {
        let feature = PersistentFeature::new(id, LandmarkParameterization::Euclidean { point: p_w }, 0.0);
        let cross = DMatrix::zeros(LANDMARK_DIM, state.covariance().dim());
        let insertion = state.add_persistent_feature(feature, &cross, &(Matrix3::identity() * 1e-4));
        assert_eq!(insertion, LandmarkInsertion::Inserted);
    }

    /// Advances a constant-velocity state by `dt` using exact static samples.
    fn advance(propagator: &Propagator, state: &mut FilterState, dt: f64) {
        let t0 = state.timestamp();
        for k in 1..=10 {
            let sample = ImuMeasurement::new(
                t0 + dt * k as f64 / 10.0,
                Vector3::zeros(),
                Vector3::new(0.0, 0.0, 9.81),
            );
            propagator.propagate(state, &sample).unwrap();
        }
    }

    #[test]
    fn test_outlier_is_excluded_from_batch() {
        let options = test_options();
        let scene = scene();
        let mut with_outlier = state_with(&options, Vector3::zeros());
        for (id, p) in scene.iter().take(3) {
            insert_landmark(&mut with_outlier, *id, *p + Vector3::new(0.005, -0.005, 0.01));
        }
        let mut without_outlier = with_outlier.clone();

        let mut frame = observe(&with_outlier, &scene[..3], None);
        let outlier = scene[2].0;
        *frame.features.get_mut(&outlier).unwrap() += Vector2::new(80.0, -60.0);
        let mut clean = frame.clone();
        clean.features.remove(&outlier);

        let report = Updater::new(&options).update(&mut with_outlier, &frame).unwrap();
        let clean_report = Updater::new(&options).update(&mut without_outlier, &clean).unwrap();

        assert_eq!(report.rejected, vec![outlier]);
        assert_eq!(report.accepted, vec![scene[0].0, scene[1].0]);
        assert_eq!(clean_report.accepted, report.accepted);
        assert_eq!(clean_report.landmarks_removed, vec![outlier]);
        assert_eq!(with_outlier.landmark(outlier).unwrap().chi2_failures, 1);

        assert_relative_eq!(
            with_outlier.core_covariance(),
            without_outlier.core_covariance(),
            epsilon = 1e-15
        );
        assert_eq!(with_outlier.element(), without_outlier.element());
        for (id, _) in scene.iter().take(2) {
            assert_eq!(
                with_outlier.landmark(*id).unwrap().parameterization,
                without_outlier.landmark(*id).unwrap().parameterization
            );
        }
    }

    #[test]
    fn test_lost_tracks_update_and_keep_covariance_psd() {
        let options = test_options();
        let propagator = Propagator::new(&options);
        let mut state = state_with(&options, Vector3::new(1.0, 0.0, 0.0));
        let mut updater = Updater::new(&options);
        let mut rng = ChaCha8Rng::seed_from_u64(17);
        let scene = scene();

        for _ in 0..4 {
            let frame = observe(&state, &scene, Some((&mut rng, 0.3)));
            let report = updater.update(&mut state, &frame).unwrap();
            assert!(report.accepted.is_empty());
            advance(&propagator, &mut state, 0.1);
        }
        assert_eq!(updater.num_tracks(), scene.len());
        assert_eq!(updater.track_length(scene[0].0), Some(4));

        let trace_before = state.covariance().matrix().trace();
        let empty = CameraMeasurement::new(state.timestamp(), BTreeMap::new());
        let report = updater.update(&mut state, &empty).unwrap();

        let expected: Vec<FeatureId> = scene.iter().map(|(id, _)| *id).collect();
        assert_eq!(report.accepted, expected);
        assert!(report.rejected.is_empty());
        assert_eq!(updater.num_tracks(), 0);
        assert!(state.covariance().matrix().trace() <= trace_before);
        state.check_covariance("test").unwrap();
    }

    #[test]
    fn test_oldest_clone_tracks_are_used_before_eviction() {
        let mut options = test_options();
        options.state.num_clones = 3;
        let propagator = Propagator::new(&options);
        let mut state = state_with(&options, Vector3::new(1.0, 0.0, 0.0));
        let mut updater = Updater::new(&options);
        let scene = scene();

        for _ in 0..3 {
            let frame = observe(&state, &scene, None);
            updater.update(&mut state, &frame).unwrap();
            advance(&propagator, &mut state, 0.1);
        }
        assert_eq!(state.num_clones(), 3);

        let frame = observe(&state, &scene, None);
        let report = updater.update(&mut state, &frame).unwrap();
        assert_eq!(report.evicted_clone, Some(CloneId(0)));
        assert_eq!(report.clone, Some(CloneId(3)));
        assert_eq!(report.accepted.len(), scene.len());
        assert_eq!(state.num_clones(), 3);
        // Consumed tracks restart from the current frame.
        assert_eq!(updater.track_length(scene[0].0), Some(1));
        state.check_covariance("test").unwrap();
    }

    #[test]
    fn test_feature_age_spans_clone_window() {
        let mut options = test_options();
        options.state.num_clones = 3;
        // Three clones 0.1 s apart cover 0.2 s; maturity needs longer.
        options.persistent_feature_init_delay = 0.35;
        let propagator = Propagator::new(&options);
        let mut state = state_with(&options, Vector3::new(2.0, 0.0, 0.0));
        let mut updater = Updater::new(&options);
        let scene = &scene()[..3];

        let mut added_at = None;
        for k in 0..6 {
            let frame = observe(&state, scene, None);
            let report = updater.update(&mut state, &frame).unwrap();
            if k == 3 {
                // The oldest clone's tracks were consumed, their age was not.
                assert_eq!(report.accepted.len(), scene.len());
                assert_eq!(updater.track_length(scene[0].0), Some(1));
                assert_relative_eq!(
                    updater.track_age(scene[0].0, state.timestamp()).unwrap(),
                    0.3,
                    epsilon = 1e-9
                );
            }
            if !report.landmarks_added.is_empty() && added_at.is_none() {
                added_at = Some(k);
                assert_eq!(report.landmarks_added.len(), scene.len());
            }
            advance(&propagator, &mut state, 0.1);
        }
        assert_eq!(added_at, Some(4));
        assert_eq!(state.num_landmarks(), scene.len());
        assert!(scene.iter().all(|(id, _)| updater.track_age(*id, state.timestamp()).is_none()));
        state.check_covariance("test").unwrap();
    }

    #[test]
    fn test_lost_feature_restarts_its_age() {
        let options = test_options();
        let propagator = Propagator::new(&options);
        let mut state = state_with(&options, Vector3::new(1.0, 0.0, 0.0));
        let mut updater = Updater::new(&options);
        let scene = &scene()[..2];

        let measurement = observe(&state, scene, None);
        updater.update(&mut state, &measurement).unwrap();
        advance(&propagator, &mut state, 0.1);
        let gap = CameraMeasurement::new(state.timestamp(), BTreeMap::new());
        updater.update(&mut state, &gap).unwrap();
        assert!(updater.track_age(scene[0].0, state.timestamp()).is_none());

        advance(&propagator, &mut state, 0.1);
        let measurement = observe(&state, scene, None);
        updater.update(&mut state, &measurement).unwrap();
        assert_relative_eq!(updater.track_age(scene[0].0, state.timestamp()).unwrap(), 0.0);
    }

    #[test]
    fn test_landmark_promotion_respects_cap() {
        let mut options = test_options();
        options.state.num_persistent_features = 1;
        options.state.enable_camera_intrinsics_calibration = false;
        options.persistent_feature_init_delay = 0.1;
        let propagator = Propagator::new(&options);
        let mut state = state_with(&options, Vector3::new(2.0, 0.0, 0.0));
        let mut updater = Updater::new(&options);
        let scene = &scene()[..3];

        let first = observe(&state, scene, None);
        let report = updater.update(&mut state, &first).unwrap();
        assert!(report.landmarks_added.is_empty());
        advance(&propagator, &mut state, 0.1);

        let second = observe(&state, scene, None);
        let report = updater.update(&mut state, &second).unwrap();
        assert_eq!(report.landmarks_added, vec![scene[0].0]);
        assert_eq!(report.landmarks_refused, vec![scene[1].0, scene[2].0]);
        assert_eq!(state.num_landmarks(), 1);
        assert_relative_eq!(
            state.landmark(scene[0].0).unwrap().world_point(),
            scene[0].1,
            epsilon = 1e-4
        );
        state.check_covariance("test").unwrap();

        advance(&propagator, &mut state, 0.1);
        let third = observe(&state, scene, None);
        let report = updater.update(&mut state, &third).unwrap();
        assert_eq!(report.accepted, vec![scene[0].0]);
        assert_eq!(report.landmarks_refused, vec![scene[1].0, scene[2].0]);
        assert_eq!(state.num_landmarks(), 1);
    }

    #[test]
    fn test_repeated_failures_remove_landmark() {
        let mut options = test_options();
        options.updater.max_persistent_feature_failures = 1;
        let mut state = state_with(&options, Vector3::zeros());
        let scene = scene();
        let (id, p) = scene[0];
        insert_landmark(&mut state, id, p);
        let mut updater = Updater::new(&options);

        for k in 0..2 {
            state.set_timestamp(0.1 * k as f64);
            let mut frame = observe(&state, &scene[..1], None);
            *frame.features.get_mut(&id).unwrap() += Vector2::new(120.0, 0.0);
            let report = updater.update(&mut state, &frame).unwrap();
            assert_eq!(report.rejected, vec![id]);
            if k == 0 {
                assert_eq!(state.landmark(id).unwrap().chi2_failures, 1);
            } else {
                assert_eq!(report.landmarks_removed, vec![id]);
            }
        }
        assert_eq!(state.num_landmarks(), 0);
        assert!(state.covariance().offset(BlockKey::Landmark(id)).is_none());
    }

    #[test]
    fn test_representations_agree_on_first_update() {
        let scene = &scene()[..2];
        let mut points = Vec::new();
        for representation in [
            FeatureRepresentation::Euclidean,
            FeatureRepresentation::AnchoredPolar,
            FeatureRepresentation::AnchoredInverseDepth,
        ] {
            let mut options = test_options();
            options.updater.persistent_feature_representation = representation;
            options.persistent_feature_init_delay = 0.1;
            let propagator = Propagator::new(&options);
            let mut state = state_with(&options, Vector3::new(2.0, 0.0, 0.0));
            let mut updater = Updater::new(&options);
            for _ in 0..2 {
                let frame = observe(&state, scene, None);
                updater.update(&mut state, &frame).unwrap();
                advance(&propagator, &mut state, 0.1);
            }
            let landmark = state.landmark(scene[1].0).unwrap();
            assert_eq!(landmark.parameterization.representation(), representation);
            points.push(landmark.world_point());
        }
        assert_relative_eq!(points[0], points[1], epsilon = 1e-6);
        assert_relative_eq!(points[0], points[2], epsilon = 1e-6);
        assert_relative_eq!(points[0], scene[1].1, epsilon = 1e-4);
    }

    #[test]
    fn test_points_behind_the_camera_are_rejected() {
        let options = test_options();
        let mut state = state_with(&options, Vector3::zeros());
        let id = FeatureId(1);
        insert_landmark(&mut state, id, Vector3::new(0.0, 0.0, -3.0));
        let frame = CameraMeasurement::new(0.0, BTreeMap::from([(id, Vector2::new(300.0, 200.0))]));
        let report = Updater::new(&options).update(&mut state, &frame).unwrap();
        assert_eq!(report.rejected, vec![id]);
        assert!(report.accepted.is_empty());
        assert_eq!(state.landmark(id).unwrap().chi2_failures, 1);
    }
}
