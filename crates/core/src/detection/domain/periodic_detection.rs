use std::sync::Arc;

use crate::detection::domain::face_descriptor::FaceDescriptor;
use crate::detection::domain::face_detector::FaceDetector;
use crate::pipeline::pipeline_config::ConfigError;
use crate::shared::frame::Frame;

/// Factor applied to frames before detection.
pub const DEFAULT_DETECTION_SCALE: f64 = 0.5;

/// Consecutive failed detection cycles tolerated before the cache is dropped.
pub const DEFAULT_MAX_FAILED_DETECTIONS: usize = 3;

/// Runs detection every `interval` frames and reuses the last result in
/// between.
///
/// Detection runs on a copy of the frame downscaled by `scale`; every box
/// and landmark is mapped back by `1 / scale` so consumers always see
/// original-resolution geometry.
///
/// Single-writer: the frame counter and the cache are only mutated through
/// `&mut self` from the control thread. Transform tasks receive the cache as
/// an immutable `Arc<[FaceDescriptor]>` snapshot, so a cached set always
/// comes from exactly one detection cycle.
pub struct PeriodicDetectionState {
    detector: Box<dyn FaceDetector>,
    interval: usize,
    scale: f64,
    max_failed_detections: usize,
    frame_count: u64,
    cache: Arc<[FaceDescriptor]>,
    failed_streak: usize,
}

impl PeriodicDetectionState {
    pub fn new(
        detector: Box<dyn FaceDetector>,
        interval: usize,
        scale: f64,
    ) -> Result<Self, ConfigError> {
        if interval < 1 {
            return Err(ConfigError::DetectionInterval(interval));
        }
        if !(scale > 0.0 && scale <= 1.0) {
            return Err(ConfigError::DetectionScale(scale));
        }
        Ok(Self {
            detector,
            interval,
            scale,
            max_failed_detections: DEFAULT_MAX_FAILED_DETECTIONS,
            frame_count: 0,
            cache: Arc::from(Vec::new()),
            failed_streak: 0,
        })
    }

    pub fn with_max_failed_detections(mut self, max_failed_detections: usize) -> Self {
        self.max_failed_detections = max_failed_detections;
        self
    }

    /// Returns the face set to use for `frame`, detecting first if this
    /// frame starts a new detection cycle.
    pub fn on_frame(&mut self, frame: &Frame) -> Arc<[FaceDescriptor]> {
        if self.frame_count % self.interval as u64 == 0 {
            match self.detect_downscaled(frame) {
                Ok(faces) => {
                    self.cache = Arc::from(faces);
                    self.failed_streak = 0;
                }
                Err(e) => self.on_detection_failure(frame, e.as_ref()),
            }
        }
        self.frame_count += 1;
        Arc::clone(&self.cache)
    }

    /// Number of frames seen so far; the next frame gets this counter value.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn cached(&self) -> &Arc<[FaceDescriptor]> {
        &self.cache
    }

    /// Direct access for one-off full-resolution detection (reference stills).
    /// Does not touch the counter or the cache.
    pub fn detector_mut(&mut self) -> &mut dyn FaceDetector {
        self.detector.as_mut()
    }

    fn detect_downscaled(
        &mut self,
        frame: &Frame,
    ) -> Result<Vec<FaceDescriptor>, Box<dyn std::error::Error>> {
        if self.scale >= 1.0 {
            return self.detector.detect(frame);
        }
        let small = frame
            .scaled(self.scale)
            .ok_or("cannot downscale a non-RGB frame for detection")?;
        let inverse = 1.0 / self.scale;
        Ok(self
            .detector
            .detect(&small)?
            .iter()
            .map(|face| face.rescaled(inverse))
            .collect())
    }

    fn on_detection_failure(&mut self, frame: &Frame, error: &dyn std::error::Error) {
        self.failed_streak += 1;
        if self.failed_streak > self.max_failed_detections && !self.cache.is_empty() {
            log::warn!(
                "Detection failed {} cycles in a row (frame {}): {error}; dropping stale faces",
                self.failed_streak,
                frame.index()
            );
            self.cache = Arc::from(Vec::new());
        } else {
            log::warn!(
                "Detection failed on frame {}: {error}; reusing previous faces",
                frame.index()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::domain::face_descriptor::BoundingBox;
    use crate::detection::domain::face_landmarks::FaceLandmarks;
    use approx::assert_abs_diff_eq;
    use rstest::rstest;
    use std::sync::Mutex;

    /// Records the size of every frame it is given and replays scripted results.
    struct ScriptedDetector {
        results: Vec<Result<Vec<FaceDescriptor>, &'static str>>,
        calls: Arc<Mutex<Vec<(usize, u32, u32)>>>,
    }

    impl ScriptedDetector {
        fn new(results: Vec<Result<Vec<FaceDescriptor>, &'static str>>) -> Self {
            Self {
                results,
                calls: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    impl FaceDetector for ScriptedDetector {
        fn detect(
            &mut self,
            frame: &Frame,
        ) -> Result<Vec<FaceDescriptor>, Box<dyn std::error::Error>> {
            let mut calls = self.calls.lock().unwrap();
            let n = calls.len();
            calls.push((frame.index(), frame.width(), frame.height()));
            self.results[n % self.results.len()].clone().map_err(Into::into)
        }
    }

    /// Finds a single face covering the central half of whatever frame it sees.
    struct CentredDetector;

    impl FaceDetector for CentredDetector {
        fn detect(
            &mut self,
            frame: &Frame,
        ) -> Result<Vec<FaceDescriptor>, Box<dyn std::error::Error>> {
            Ok(vec![centred_face(frame.width() as f64, frame.height() as f64)])
        }
    }

    fn centred_face(w: f64, h: f64) -> FaceDescriptor {
        FaceDescriptor::new(
            BoundingBox::new(w * 0.25, h * 0.25, w * 0.75, h * 0.75),
            Some(FaceLandmarks::new([(w * 0.5, h * 0.5); 5])),
            0.9,
        )
    }

    fn face_at(x: f64) -> FaceDescriptor {
        FaceDescriptor::new(BoundingBox::new(x, 10.0, x + 20.0, 30.0), None, 0.9)
    }

    fn frame(index: usize) -> Frame {
        Frame::new(vec![0u8; 64 * 48 * 3], 64, 48, 3, index)
    }

    #[test]
    fn test_detects_on_interval_boundaries_only() {
        let inner = ScriptedDetector::new(vec![Ok(vec![face_at(10.0)])]);
        let calls = inner.calls.clone();
        let mut state = PeriodicDetectionState::new(Box::new(inner), 5, 0.5).unwrap();

        for i in 0..10 {
            state.on_frame(&frame(i));
        }

        let detected: Vec<usize> = calls.lock().unwrap().iter().map(|c| c.0).collect();
        assert_eq!(detected, vec![0, 5]);
        assert_eq!(state.frame_count(), 10);
    }

    #[test]
    fn test_detector_sees_downscaled_frame() {
        let inner = ScriptedDetector::new(vec![Ok(vec![])]);
        let calls = inner.calls.clone();
        let mut state = PeriodicDetectionState::new(Box::new(inner), 1, 0.5).unwrap();

        state.on_frame(&frame(0));

        assert_eq!(calls.lock().unwrap()[0], (0, 32, 24));
    }

    #[test]
    fn test_full_scale_skips_resize() {
        let inner = ScriptedDetector::new(vec![Ok(vec![])]);
        let calls = inner.calls.clone();
        let mut state = PeriodicDetectionState::new(Box::new(inner), 1, 1.0).unwrap();

        state.on_frame(&frame(0));

        assert_eq!(calls.lock().unwrap()[0], (0, 64, 48));
    }

    #[test]
    fn test_results_are_rescaled_to_original_resolution() {
        let mut state = PeriodicDetectionState::new(Box::new(CentredDetector), 1, 0.5).unwrap();
        // Odd dimensions so the downscale has to round.
        let source = Frame::new(vec![0u8; 101 * 51 * 3], 101, 51, 3, 0);

        let faces = state.on_frame(&source);
        let truth = centred_face(101.0, 51.0);

        assert_eq!(faces.len(), 1);
        for (got, want) in faces[0].bbox.as_array().iter().zip(truth.bbox.as_array()) {
            assert_abs_diff_eq!(*got, want, epsilon = 1.0 / DEFAULT_DETECTION_SCALE);
        }
        let nose = faces[0].landmarks.as_ref().unwrap().points()[2];
        assert_abs_diff_eq!(nose.0, 50.5, epsilon = 2.0);
        assert_abs_diff_eq!(nose.1, 25.5, epsilon = 2.0);
    }

    #[test]
    fn test_cache_reused_between_detections() {
        let inner = ScriptedDetector::new(vec![Ok(vec![face_at(10.0)]), Ok(vec![face_at(50.0)])]);
        let mut state = PeriodicDetectionState::new(Box::new(inner), 3, 1.0).unwrap();

        let first = state.on_frame(&frame(0));
        let second = state.on_frame(&frame(1));
        let third = state.on_frame(&frame(2));
        let fourth = state.on_frame(&frame(3));

        assert!(Arc::ptr_eq(&first, &second));
        assert!(Arc::ptr_eq(&first, &third));
        assert_eq!(fourth[0].bbox.x1, 50.0);
    }

    #[test]
    fn test_empty_cache_before_any_face() {
        let inner = ScriptedDetector::new(vec![Ok(vec![])]);
        let mut state = PeriodicDetectionState::new(Box::new(inner), 2, 0.5).unwrap();

        assert!(state.on_frame(&frame(0)).is_empty());
        assert!(state.on_frame(&frame(1)).is_empty());
    }

    #[test]
    fn test_failure_keeps_previous_cache() {
        let inner = ScriptedDetector::new(vec![Ok(vec![face_at(10.0)]), Err("gpu hiccup")]);
        let mut state = PeriodicDetectionState::new(Box::new(inner), 2, 1.0).unwrap();

        state.on_frame(&frame(0));
        state.on_frame(&frame(1));
        let after_failure = state.on_frame(&frame(2));

        assert_eq!(after_failure.len(), 1);
        assert_eq!(after_failure[0].bbox.x1, 10.0);
        assert_eq!(state.frame_count(), 3);
    }

    #[test]
    fn test_persistent_failure_eventually_clears_cache() {
        let mut results = vec![Ok(vec![face_at(10.0)])];
        results.extend(std::iter::repeat(Err("model gone")).take(10));
        let inner = ScriptedDetector::new(results);
        let mut state = PeriodicDetectionState::new(Box::new(inner), 1, 1.0)
            .unwrap()
            .with_max_failed_detections(2);

        assert_eq!(state.on_frame(&frame(0)).len(), 1);
        assert_eq!(state.on_frame(&frame(1)).len(), 1); // failure 1
        assert_eq!(state.on_frame(&frame(2)).len(), 1); // failure 2
        assert!(state.on_frame(&frame(3)).is_empty()); // failure 3 > limit
    }

    #[test]
    fn test_success_resets_failure_streak() {
        let inner = ScriptedDetector::new(vec![
            Ok(vec![face_at(10.0)]),
            Err("blip"),
            Ok(vec![face_at(20.0)]),
            Err("blip"),
        ]);
        let mut state = PeriodicDetectionState::new(Box::new(inner), 1, 1.0)
            .unwrap()
            .with_max_failed_detections(1);

        for i in 0..4 {
            state.on_frame(&frame(i));
        }

        assert_eq!(state.cached()[0].bbox.x1, 20.0);
    }

    #[test]
    fn test_detector_mut_does_not_advance_counter() {
        let inner = ScriptedDetector::new(vec![Ok(vec![face_at(10.0)])]);
        let mut state = PeriodicDetectionState::new(Box::new(inner), 5, 0.5).unwrap();

        state.detector_mut().detect(&frame(0)).unwrap();

        assert_eq!(state.frame_count(), 0);
        assert!(state.cached().is_empty());
    }

    #[rstest]
    #[case(0, 0.5, ConfigError::DetectionInterval(0))]
    #[case(1, 0.0, ConfigError::DetectionScale(0.0))]
    #[case(1, 1.5, ConfigError::DetectionScale(1.5))]
    #[case(0, 2.0, ConfigError::DetectionInterval(0))]
    fn test_invalid_parameters_rejected(
        #[case] interval: usize,
        #[case] scale: f64,
        #[case] expected: ConfigError,
    ) {
        let err = PeriodicDetectionState::new(Box::new(CentredDetector), interval, scale)
            .err()
            .unwrap();
        assert_eq!(err, expected);
    }
}
