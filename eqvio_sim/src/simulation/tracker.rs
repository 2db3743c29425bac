// eqvio_sim/src/simulation/tracker.rs

use std::collections::BTreeMap;

use anyhow::Result;
use nalgebra::{Isometry3, Vector2};
use rand::seq::SliceRandom;
use rand::Rng;
use rand_distr::{Distribution, Normal};

use eqvio_core::messages::CameraMeasurement;
use eqvio_core::types::FeatureId;
use eqvio_core::vision::SharedCamera;

use crate::config::SensorsConfig;
use crate::simulation::world::LandmarkField;

/// Points closer than this along the optical axis are not observable.
const MIN_DEPTH: f64 = 0.2;
/// Tolerance on the undistortion round trip, in normalized units.
const ROUND_TRIP_TOL: f64 = 1.0e-4;

/// A stand-in for a KLT front end: projects the landmark field into the
/// camera, perturbs the pixels and hands out stable track ids.
///
/// A track ends when its landmark leaves the view, when the per-frame budget
/// excludes it, or at random with `track_loss_probability`. A landmark that
/// is picked up again gets a fresh id, as a real tracker would assign.
#[derive(Debug)]
pub struct SyntheticTracker {
    camera: SharedCamera,
    /// `T_IC`.
    extrinsics: Isometry3<f64>,
    pixel_noise: Normal<f64>,
    max_features: usize,
    loss_probability: f64,
    generation: Vec<u64>,
    tracked: Vec<bool>,
}

impl SyntheticTracker {
    pub fn new(
        camera: SharedCamera,
        extrinsics: Isometry3<f64>,
        config: &SensorsConfig,
        num_landmarks: usize,
    ) -> Result<Self> {
        Ok(Self {
            camera,
            extrinsics,
            pixel_noise: Normal::new(0.0, config.pixel_std)?,
            max_features: config.max_features,
            loss_probability: config.track_loss_probability,
            generation: vec![0; num_landmarks],
            tracked: vec![false; num_landmarks],
        })
    }

    fn feature_id(&self, index: usize) -> FeatureId {
        FeatureId(self.generation[index] * self.generation.len() as u64 + index as u64)
    }

    /// Noise-free raw pixel of landmark `index`, if the camera can see it.
    fn project(&self, camera_pose_inv: &Isometry3<f64>, world: &LandmarkField, index: usize) -> Option<Vector2<f64>> {
        let p_c = camera_pose_inv * world.points()[index];
        if p_c.z < MIN_DEPTH {
            return None;
        }
        let xy = Vector2::new(p_c.x / p_c.z, p_c.y / p_c.z);
        let uv = self.camera.distort_point(&xy);
        if !self.camera.is_in_image(&uv) {
            return None;
        }
        // Strong radial distortion folds far-off-axis points back into the
        // image; those would not survive undistortion.
        let back = self.camera.undistort_point(&uv, true);
        ((back - xy).norm() < ROUND_TRIP_TOL).then_some(uv)
    }

    /// Produces the raw-pixel frame seen from body pose `T_WI` at `timestamp`.
    pub fn observe<R: Rng + ?Sized>(
        &mut self,
        timestamp: f64,
        body_pose: &Isometry3<f64>,
        world: &LandmarkField,
        rng: &mut R,
    ) -> CameraMeasurement {
        let camera_pose_inv = (body_pose * self.extrinsics).inverse();

        let mut continuing = Vec::new();
        let mut fresh = Vec::new();
        for index in 0..world.len() {
            let Some(uv) = self.project(&camera_pose_inv, world, index) else {
                continue;
            };
            if self.tracked[index] && !rng.gen_bool(self.loss_probability) {
                continuing.push((index, uv));
            } else {
                fresh.push((index, uv));
            }
        }
        fresh.shuffle(rng);

        let selected: Vec<(usize, Vector2<f64>, bool)> = continuing
            .into_iter()
            .map(|(i, uv)| (i, uv, false))
            .chain(fresh.into_iter().map(|(i, uv)| (i, uv, true)))
            .take(self.max_features)
            .collect();

        self.tracked.iter_mut().for_each(|t| *t = false);
        let mut features = BTreeMap::new();
        for (index, uv, is_new) in selected {
            if is_new {
                self.generation[index] += 1;
            }
            self.tracked[index] = true;
            let noise = Vector2::new(self.pixel_noise.sample(rng), self.pixel_noise.sample(rng));
            features.insert(self.feature_id(index), uv + noise);
        }
        CameraMeasurement::new(timestamp, features)
    }
}
