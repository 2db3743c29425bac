// eqvio_core/src/estimation/msceqf.rs

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use nalgebra::Matrix3;
use tracing::{debug, info, warn};

use crate::error::FilterError;
use crate::estimation::initializer::Initializer;
use crate::estimation::propagator::Propagator;
use crate::estimation::updater::{UpdateReport, Updater};
use crate::estimation::StateEstimator;
use crate::messages::{CameraMeasurement, ImuMeasurement, SensorInput, StateEstimate};
use crate::options::MsceqfOptions;
use crate::sensors::{PushStatus, TimeOrderedQueue};
use crate::state::FilterState;
use crate::types::{Matrix9, D_OFFSET};
use crate::vision::{PinholeCamera, SharedCamera};

/// The complete filter: static initialization, then inertial propagation and
/// visual updates on a single state.
///
/// Sensor producers push into the shared queues (see [`Msceqf::imu_queue`]);
/// [`Msceqf::process_pending`] consumes them in timestamp order. A frame is
/// only processed once inertial data covers its timestamp.
#[derive(Debug)]
pub struct Msceqf {
    camera: SharedCamera,
    imu_queue: Arc<TimeOrderedQueue<ImuMeasurement>>,
    frame_queue: Arc<TimeOrderedQueue<CameraMeasurement>>,
    initializer: Initializer,
    propagator: Propagator,
    updater: Updater,
    state: Option<FilterState>,
}

impl Msceqf {
    /// Validates the options and builds a filter with a camera taken from them.
    pub fn new(options: MsceqfOptions) -> Result<Self, FilterError> {
        let camera = PinholeCamera::new(
            options.camera.distortion.clone(),
            options.state.initial_camera_intrinsics,
            options.camera.width,
            options.camera.height,
        )
        .shared();
        Self::with_camera(options, camera)
    }

    /// Builds a filter around an existing camera handle, e.g. the one the
    /// feature tracker already holds.
    pub fn with_camera(options: MsceqfOptions, camera: SharedCamera) -> Result<Self, FilterError> {
        options.validate()?;
        Ok(Self {
            camera,
            imu_queue: Arc::new(TimeOrderedQueue::new(options.imu_buffer_max_size)),
            frame_queue: Arc::new(TimeOrderedQueue::new(options.frame_buffer_max_size)),
            initializer: Initializer::new(&options),
            propagator: Propagator::new(&options),
            updater: Updater::new(&options),
            state: None,
        })
    }

    pub fn camera(&self) -> SharedCamera {
        Arc::clone(&self.camera)
    }

    /// Handle for an inertial producer thread.
    pub fn imu_queue(&self) -> Arc<TimeOrderedQueue<ImuMeasurement>> {
        Arc::clone(&self.imu_queue)
    }

    /// Handle for a feature-tracker thread. Frames carry raw pixels.
    pub fn frame_queue(&self) -> Arc<TimeOrderedQueue<CameraMeasurement>> {
        Arc::clone(&self.frame_queue)
    }

    pub fn feed_imu(&self, sample: ImuMeasurement) -> PushStatus {
        self.imu_queue.push(sample)
    }

    pub fn feed_camera(&self, frame: CameraMeasurement) -> PushStatus {
        self.frame_queue.push(frame)
    }

    /// Blocks for at most `timeout` until a producer pushes the input the
    /// filter is waiting on: a frame once running with none queued, inertial
    /// data otherwise. Returns whether anything arrived.
    pub fn wait_for_input(&self, timeout: Duration) -> bool {
        if self.is_initialized() && self.frame_queue.is_empty() {
            self.frame_queue.wait_for_push(timeout)
        } else {
            self.imu_queue.wait_for_push(timeout)
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.state.is_some()
    }

    pub fn state(&self) -> Option<&FilterState> {
        self.state.as_ref()
    }

    /// Feeds queued data to the initializer in timestamp order until it
    /// produces a state or the inertial queue runs dry.
    fn try_initialize(&mut self) -> Result<(), FilterError> {
        while let Some(sample) = self.imu_queue.pop() {
            for frame in self.frame_queue.drain_until(sample.timestamp) {
                self.initializer.add_frame(undistort_frame(&self.camera, frame));
            }
            self.initializer.add_imu(sample);
            if let Some(state) = self.initializer.try_initialize()? {
                info!(t = state.timestamp(), "estimator running");
                self.state = Some(state);
                return Ok(());
            }
        }
        Ok(())
    }

    /// Processes every queued frame whose timestamp is covered by inertial
    /// data. Returns one report per processed frame.
    pub fn process_pending(&mut self) -> Result<Vec<UpdateReport>, FilterError> {
        if self.state.is_none() {
            self.try_initialize()?;
        }
        let mut reports = Vec::new();
        let Some(state) = self.state.as_mut() else {
            return Ok(reports);
        };

        while let Some(t_frame) = self.frame_queue.oldest_timestamp() {
            if t_frame > state.timestamp()
                && self
                    .propagator
                    .propagate_to(state, &self.imu_queue, t_frame)?
                    .is_none()
            {
                debug!(t = t_frame, "frame deferred until inertial data covers it");
                break;
            }
            let Some(frame) = self.frame_queue.pop() else {
                break;
            };
            if frame.timestamp < state.timestamp() {
                warn!(t = frame.timestamp, state_t = state.timestamp(), "stale frame dropped");
                continue;
            }
            let frame = undistort_frame(&self.camera, frame);
            reports.push(self.updater.update(state, &frame)?);
        }
        Ok(reports)
    }

    /// The current estimate with body-frame navigation covariance.
    pub fn estimate(&self) -> Option<StateEstimate> {
        self.state.as_ref().map(estimate_from_state)
    }
}

/// Raw tracker pixels to undistorted pixels.
fn undistort_frame(camera: &PinholeCamera, frame: CameraMeasurement) -> CameraMeasurement {
    let features = frame
        .features
        .into_iter()
        .map(|(id, uv)| (id, camera.undistort_point(&uv, false)))
        .collect();
    CameraMeasurement::new(frame.timestamp, features)
}

fn estimate_from_state(state: &FilterState) -> StateEstimate {
    let p = state.covariance().matrix();
    let sigma_world = Matrix9::from_fn(|r, c| p[(D_OFFSET + r, D_OFFSET + c)]);
    let sigma_body = state.element().navigation_covariance_to_body(&sigma_world);
    let block = |i: usize| -> Matrix3<f64> { sigma_body.fixed_view::<3, 3>(i, i).into_owned() };

    StateEstimate {
        timestamp: state.timestamp(),
        pose: state.imu_pose(),
        velocity: state.d().velocity,
        gyro_bias: state.gyro_bias(),
        accel_bias: state.accel_bias(),
        camera_extrinsics: *state.extrinsics(),
        camera_intrinsics: *state.intrinsics(),
        attitude_covariance: block(0),
        velocity_covariance: block(3),
        position_covariance: block(6),
    }
}

impl StateEstimator for Msceqf {
    fn process(&mut self, input: &SensorInput) -> Result<Vec<UpdateReport>, FilterError> {
        match input {
            SensorInput::Imu(sample) => {
                self.feed_imu(*sample);
            }
            SensorInput::Camera(frame) => {
                self.feed_camera(frame.clone());
            }
        }
        self.process_pending()
    }

    fn estimate(&self) -> Option<StateEstimate> {
        Msceqf::estimate(self)
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConfigError;
    use crate::types::FeatureId;
    use crate::vision::DistortionModel;
    use approx::assert_relative_eq;
    use nalgebra::{Vector2, Vector3};
    use std::collections::BTreeMap;

    fn options() -> MsceqfOptions {
        let mut options = MsceqfOptions::default();
        options.camera.distortion = DistortionModel::default();
        options
    }

    fn static_imu(t: f64) -> ImuMeasurement {
        ImuMeasurement::new(t, Vector3::zeros(), Vector3::new(0.0, 0.0, 9.81))
    }

    fn feed_static(filter: &Msceqf, from: usize, to: usize) {
        for k in from..to {
            filter.feed_imu(static_imu(k as f64 * 0.005));
        }
    }

    #[test]
    fn test_invalid_options_are_rejected() {
        let mut options = options();
        options.updater.pixel_std = 0.0;
        let err = Msceqf::new(options).unwrap_err();
        assert!(matches!(
            err,
            FilterError::Config(ConfigError::NotPositive { name: "pixel_std", .. })
        ));
    }

    #[test]
    fn test_initializes_once_window_is_static() {
        let mut filter = Msceqf::new(options()).unwrap();
        feed_static(&filter, 0, 100);
        assert!(filter.process_pending().unwrap().is_empty());
        assert!(!filter.is_initialized());
        assert!(filter.estimate().is_none());

        feed_static(&filter, 100, 240);
        filter.process_pending().unwrap();
        let estimate = filter.estimate().expect("initialized");
        assert_relative_eq!(estimate.timestamp, 1.0, epsilon = 1e-9);
        assert_relative_eq!(estimate.velocity, Vector3::zeros());
        assert_relative_eq!(estimate.pose.translation.vector, Vector3::zeros());
        // Samples after the initialization time stay queued for propagation.
        assert!(!filter.imu_queue().is_empty());
    }

    #[test]
    fn test_frame_waits_for_inertial_coverage() {
        let mut filter = Msceqf::new(options()).unwrap();
        feed_static(&filter, 0, 241);
        filter.process_pending().unwrap();
        assert!(filter.is_initialized());

        filter.feed_camera(CameraMeasurement::new(1.5, BTreeMap::new()));
        assert!(filter.process_pending().unwrap().is_empty());
        assert_eq!(filter.frame_queue().len(), 1);

        feed_static(&filter, 241, 320);
        let reports = filter.process_pending().unwrap();
        assert_eq!(reports.len(), 1);
        assert_relative_eq!(reports[0].timestamp, 1.5);
        let state = filter.state().unwrap();
        assert_relative_eq!(state.timestamp(), 1.5, epsilon = 1e-12);
        assert_eq!(state.num_clones(), 1);
        assert_relative_eq!(state.d().velocity, Vector3::zeros(), epsilon = 1e-9);
    }

    #[test]
    fn test_frame_just_after_initialization_is_not_stuck() {
        let mut filter = Msceqf::new(options()).unwrap();
        feed_static(&filter, 0, 241);
        filter.process_pending().unwrap();
        let t0 = filter.state().unwrap().timestamp();
        // Initialization consumed every sample up to t0.
        assert!(filter.imu_queue().oldest_timestamp().unwrap() > t0);

        filter.feed_camera(CameraMeasurement::new(t0 + 0.002, BTreeMap::new()));
        let reports = filter.process_pending().unwrap();
        assert_eq!(reports.len(), 1);
        assert_relative_eq!(filter.state().unwrap().timestamp(), t0 + 0.002, epsilon = 1e-12);

        feed_static(&filter, 241, 341);
        for k in 1..=10 {
            filter.feed_camera(CameraMeasurement::new(t0 + 0.05 * k as f64, BTreeMap::new()));
        }
        let reports = filter.process_pending().unwrap();
        assert_eq!(reports.len(), 10);
        assert!(filter.frame_queue().is_empty());
        assert_eq!(filter.frame_queue().evicted_count(), 0);
        assert_relative_eq!(filter.state().unwrap().d().velocity, Vector3::zeros(), epsilon = 1e-9);
    }

    #[test]
    fn test_wait_for_input_is_bounded() {
        let mut filter = Msceqf::new(options()).unwrap();
        assert!(!filter.wait_for_input(Duration::from_millis(2)));

        feed_static(&filter, 0, 241);
        filter.process_pending().unwrap();
        let frames = filter.frame_queue();
        let producer = std::thread::spawn(move || {
            for k in 0..50 {
                std::thread::sleep(Duration::from_millis(2));
                frames.push(CameraMeasurement::new(1.1 + 0.01 * k as f64, BTreeMap::new()));
            }
        });
        // Running with an empty frame queue: a frame push ends the wait.
        assert!(filter.wait_for_input(Duration::from_secs(5)));
        producer.join().unwrap();
    }

    #[test]
    fn test_stale_frame_is_dropped() {
        let mut filter = Msceqf::new(options()).unwrap();
        feed_static(&filter, 0, 241);
        filter.process_pending().unwrap();

        filter.feed_camera(CameraMeasurement::new(0.5, BTreeMap::new()));
        assert!(filter.process_pending().unwrap().is_empty());
        assert!(filter.frame_queue().is_empty());
        assert_eq!(filter.state().unwrap().num_clones(), 0);
    }

    #[test]
    fn test_process_through_trait_object() {
        let mut estimator: Box<dyn StateEstimator> = Box::new(Msceqf::new(options()).unwrap());
        for k in 0..260 {
            estimator
                .process(&SensorInput::Imu(static_imu(k as f64 * 0.005)))
                .unwrap();
        }
        let features = BTreeMap::from([(FeatureId(3), Vector2::new(300.0, 200.0))]);
        let reports = estimator
            .process(&SensorInput::Camera(CameraMeasurement::new(1.2, features)))
            .unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].clone.map(|c| c.0), Some(0));

        let estimate = estimator.estimate().unwrap();
        let sym = estimate.attitude_covariance - estimate.attitude_covariance.transpose();
        assert_relative_eq!(sym.amax(), 0.0, epsilon = 1e-12);
        let filter = estimator.as_any_mut().downcast_mut::<Msceqf>().unwrap();
        assert_eq!(filter.updater.track_length(FeatureId(3)), Some(1));
    }
}
