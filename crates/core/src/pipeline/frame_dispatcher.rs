use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::detection::domain::face_detector::FaceDetector;
use crate::detection::domain::face_embedder::FaceEmbedder;
use crate::detection::domain::periodic_detection::PeriodicDetectionState;
use crate::detection::domain::reference_face::{ReferenceFace, ReferenceFaceError};
use crate::pipeline::infrastructure::worker_pool::{PendingTask, WorkerPool};
use crate::pipeline::pipeline_config::{ConfigError, PipelineConfig};
use crate::pipeline::transform_stage::TransformStage;
use crate::shared::frame::Frame;
use crate::swapping::domain::face_enhancer::FaceEnhancer;
use crate::swapping::domain::face_transformer::FaceTransformer;

#[derive(Error, Debug)]
pub enum DispatcherError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to start transform workers: {0}")]
    Workers(#[from] std::io::Error),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatchPhase {
    /// The next tick only enqueues; nothing is emitted.
    Filling,
    /// The next tick emits the oldest outstanding frame.
    Steady,
}

/// Where the last tick spent its time.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TickTimings {
    /// Periodic detection (zero on cache hits and pass-through frames).
    pub detect: Duration,
    /// Blocking on the oldest task.
    pub retrieve: Duration,
}

struct InFlight {
    raw: Arc<Frame>,
    task: PendingTask,
}

/// Bounded-latency reorder buffer between capture and display.
///
/// Every tick enqueues one task for the captured frame. Once the queue holds
/// `worker_count + 1` tasks, each tick also blocks on the oldest task and
/// emits its result, so output order always equals capture order and the
/// delay from capture to display is fixed at `worker_count` ticks. A task
/// that fails is replaced by the raw frame it was submitted with.
///
/// All state is owned by the control thread; workers only see immutable
/// snapshots (`Arc<Frame>`, `Arc<[FaceDescriptor]>`, `Arc<ReferenceFace>`).
pub struct FrameDispatcher {
    detection: PeriodicDetectionState,
    stage: TransformStage,
    reference: Option<Arc<ReferenceFace>>,
    transform_enabled: bool,
    in_flight: VecDeque<InFlight>,
    capacity: usize,
    failed_tasks: usize,
    last_timings: TickTimings,
}

impl FrameDispatcher {
    pub fn new(
        config: &PipelineConfig,
        detector: Box<dyn FaceDetector>,
        transformer: Arc<dyn FaceTransformer>,
        enhancer: Option<Arc<dyn FaceEnhancer>>,
    ) -> Result<Self, DispatcherError> {
        config.validate()?;
        let detection = PeriodicDetectionState::new(
            detector,
            config.detection_interval,
            config.detection_scale,
        )?
        .with_max_failed_detections(config.max_failed_detections);
        let enhancer = if config.enhance { enhancer } else { None };
        let stage = TransformStage::new(
            WorkerPool::new(config.worker_count)?,
            transformer,
            enhancer,
        );

        Ok(Self {
            detection,
            stage,
            reference: None,
            transform_enabled: config.transform_enabled,
            in_flight: VecDeque::with_capacity(config.queue_capacity()),
            capacity: config.queue_capacity(),
            failed_tasks: 0,
            last_timings: TickTimings::default(),
        })
    }

    /// Processes one captured frame. Returns the frame to display this tick,
    /// or `None` while the queue is still filling.
    pub fn tick(&mut self, frame: Frame) -> Option<Frame> {
        self.last_timings = TickTimings::default();
        let raw = Arc::new(frame);
        let task = if self.is_transforming() {
            let started = Instant::now();
            let faces = self.detection.on_frame(&raw);
            self.last_timings.detect = started.elapsed();
            self.stage.submit(&raw, &faces, self.reference.as_ref())
        } else {
            PendingTask::completed(raw.as_ref().clone())
        };
        self.in_flight.push_back(InFlight { raw, task });

        if self.in_flight.len() < self.capacity {
            return None;
        }
        let started = Instant::now();
        let out = self.retrieve_oldest();
        self.last_timings.retrieve = started.elapsed();
        out
    }

    /// Resolves every outstanding task in submission order. Used at end of
    /// stream so the last `worker_count` frames are not lost.
    pub fn drain(&mut self) -> Vec<Frame> {
        let mut out = Vec::with_capacity(self.in_flight.len());
        while let Some(frame) = self.retrieve_oldest() {
            out.push(frame);
        }
        out
    }

    /// Replaces the reference identity. Outstanding tasks built for the old
    /// identity are discarded without being waited on.
    pub fn set_reference(&mut self, reference: ReferenceFace) {
        self.reference = Some(Arc::new(reference));
        self.discard_in_flight("reference face changed");
    }

    /// Builds a reference from a still image and installs it. On error the
    /// dispatcher is left untouched.
    pub fn load_reference(
        &mut self,
        image: &Frame,
        embedder: &dyn FaceEmbedder,
    ) -> Result<(), ReferenceFaceError> {
        let reference = ReferenceFace::from_image(image, self.detection.detector_mut(), embedder)?;
        self.set_reference(reference);
        Ok(())
    }

    /// Switching off discards outstanding tasks so no transformed frame is
    /// shown after the switch. Setting the current value is a no-op.
    pub fn set_transform_enabled(&mut self, enabled: bool) {
        if enabled == self.transform_enabled {
            return;
        }
        self.transform_enabled = enabled;
        if !enabled {
            self.discard_in_flight("transform disabled");
        }
    }

    pub fn transform_enabled(&self) -> bool {
        self.transform_enabled
    }

    pub fn reference(&self) -> Option<&ReferenceFace> {
        self.reference.as_deref()
    }

    pub fn phase(&self) -> DispatchPhase {
        if self.in_flight.len() + 1 < self.capacity {
            DispatchPhase::Filling
        } else {
            DispatchPhase::Steady
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn detection(&self) -> &PeriodicDetectionState {
        &self.detection
    }

    pub fn last_timings(&self) -> TickTimings {
        self.last_timings
    }

    /// Tasks that failed and were replaced by their raw frame.
    pub fn failed_tasks(&self) -> usize {
        self.failed_tasks
    }

    fn is_transforming(&self) -> bool {
        self.transform_enabled && self.reference.is_some()
    }

    fn retrieve_oldest(&mut self) -> Option<Frame> {
        let InFlight { raw, task } = self.in_flight.pop_front()?;
        match task.wait() {
            Ok(frame) => Some(frame),
            Err(e) => {
                self.failed_tasks += 1;
                log::warn!("Frame {} shown untransformed: {e}", raw.index());
                Some(Arc::try_unwrap(raw).unwrap_or_else(|shared| shared.as_ref().clone()))
            }
        }
    }

    fn discard_in_flight(&mut self, reason: &str) {
        let dropped = self.in_flight.len();
        for entry in self.in_flight.drain(..) {
            entry.task.abandon();
        }
        if dropped > 0 {
            log::info!("Discarded {dropped} pending frames: {reason}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::domain::face_descriptor::{BoundingBox, FaceDescriptor};
    use crate::swapping::domain::face_transformer::ServiceError;
    use rstest::rstest;
    use std::sync::Mutex;
    use std::time::Duration;

    const W: u32 = 8;
    const H: u32 = 8;

    /// Frame whose pixels all equal its index, so frames are distinguishable.
    fn frame(index: usize) -> Frame {
        Frame::new(vec![index as u8; (W * H * 3) as usize], W, H, 3, index)
    }

    fn face() -> FaceDescriptor {
        FaceDescriptor::new(BoundingBox::new(1.0, 1.0, 5.0, 5.0), None, 0.9)
    }

    /// Always finds one face and records the index of every frame it sees.
    struct RecordingDetector {
        seen: Arc<Mutex<Vec<usize>>>,
        faces: Vec<FaceDescriptor>,
    }

    impl FaceDetector for RecordingDetector {
        fn detect(
            &mut self,
            frame: &Frame,
        ) -> Result<Vec<FaceDescriptor>, Box<dyn std::error::Error>> {
            self.seen.lock().unwrap().push(frame.index());
            Ok(self.faces.clone())
        }
    }

    /// Writes the reference's first embedding value into byte 0 and 255 into
    /// byte 1. Later frames finish first to force out-of-order completion.
    /// Panics on the frame index given in `panic_on`.
    struct StampingTransformer {
        panic_on: Option<usize>,
    }

    impl FaceTransformer for StampingTransformer {
        fn transform(
            &self,
            frame: &Frame,
            _face: &FaceDescriptor,
            reference: &ReferenceFace,
        ) -> Result<Frame, ServiceError> {
            if Some(frame.index()) == self.panic_on {
                panic!("transform exploded");
            }
            std::thread::sleep(Duration::from_millis(2 + (8 - (frame.index() % 8)) as u64));
            let mut out = frame.clone();
            out.data_mut()[0] = reference.embedding()[0] as u8;
            out.data_mut()[1] = 255;
            Ok(out)
        }
    }

    struct ConstantEmbedder(f32);

    impl FaceEmbedder for ConstantEmbedder {
        fn embed(
            &self,
            _frame: &Frame,
            _face: &FaceDescriptor,
        ) -> Result<Vec<f32>, Box<dyn std::error::Error>> {
            Ok(vec![self.0])
        }
    }

    fn config(workers: usize, interval: usize) -> PipelineConfig {
        PipelineConfig {
            worker_count: workers,
            detection_interval: interval,
            detection_scale: 1.0,
            ..PipelineConfig::default()
        }
    }

    fn dispatcher_with(
        config: &PipelineConfig,
        faces: Vec<FaceDescriptor>,
        panic_on: Option<usize>,
    ) -> (FrameDispatcher, Arc<Mutex<Vec<usize>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let detector = RecordingDetector {
            seen: Arc::clone(&seen),
            faces,
        };
        let dispatcher = FrameDispatcher::new(
            config,
            Box::new(detector),
            Arc::new(StampingTransformer { panic_on }),
            None,
        )
        .unwrap();
        (dispatcher, seen)
    }

    fn dispatcher(workers: usize, interval: usize) -> (FrameDispatcher, Arc<Mutex<Vec<usize>>>) {
        dispatcher_with(&config(workers, interval), vec![face()], None)
    }

    fn reference(marker: f32) -> ReferenceFace {
        ReferenceFace::new(face(), vec![marker])
    }

    #[test]
    fn test_ten_frames_three_workers() {
        let (mut d, seen) = dispatcher(3, 5);
        d.set_reference(reference(7.0));

        let mut emitted = Vec::new();
        for i in 0..10 {
            let out = d.tick(frame(i));
            assert!(d.in_flight() <= 4);
            if i < 3 {
                assert!(out.is_none(), "frame {i} should still be filling");
            }
            emitted.extend(out);
        }

        let indices: Vec<usize> = emitted.iter().map(Frame::index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4, 5, 6]);
        for f in &emitted {
            assert_eq!(f.data()[0], 7);
            assert_eq!(f.data()[1], 255);
        }
        assert_eq!(*seen.lock().unwrap(), vec![0, 5]);
        assert_eq!(d.in_flight(), 3);
    }

    #[test]
    fn test_pass_through_tick_records_no_detection_time() {
        let (mut d, _) = dispatcher(1, 1);
        d.tick(frame(0));
        assert_eq!(d.last_timings().detect, Duration::ZERO);
        d.tick(frame(1));
        assert_eq!(d.last_timings().detect, Duration::ZERO);
    }

    #[test]
    fn test_single_worker_delays_one_tick() {
        let (mut d, _) = dispatcher(1, 1);
        d.set_reference(reference(1.0));
        assert!(d.tick(frame(0)).is_none());
        assert_eq!(d.tick(frame(1)).unwrap().index(), 0);
        assert_eq!(d.tick(frame(2)).unwrap().index(), 1);
    }

    #[rstest]
    #[case(1, 6)]
    #[case(2, 6)]
    #[case(3, 10)]
    #[case(4, 9)]
    fn test_first_worker_count_ticks_are_silent(#[case] workers: usize, #[case] frames: usize) {
        let (mut d, _) = dispatcher(workers, 2);
        d.set_reference(reference(3.0));

        let mut emitted = Vec::new();
        for i in 0..frames {
            let filling = d.phase() == DispatchPhase::Filling;
            let out = d.tick(frame(i));
            assert_eq!(out.is_none(), filling, "tick {i}");
            assert_eq!(out.is_none(), i < workers, "tick {i}");
            emitted.extend(out.map(|f| f.index()));
        }
        assert_eq!(emitted, (0..frames - workers).collect::<Vec<_>>());
    }

    #[test]
    fn test_phase_transitions() {
        let (mut d, _) = dispatcher(2, 5);
        assert_eq!(d.capacity(), 3);
        assert_eq!(d.phase(), DispatchPhase::Filling);
        d.tick(frame(0));
        assert_eq!(d.phase(), DispatchPhase::Filling);
        d.tick(frame(1));
        assert_eq!(d.phase(), DispatchPhase::Steady);
        assert!(d.tick(frame(2)).is_some());
        assert_eq!(d.phase(), DispatchPhase::Steady);
    }

    #[test]
    fn test_no_reference_passes_frames_through_without_detection() {
        let (mut d, seen) = dispatcher(2, 1);
        let mut emitted = Vec::new();
        for i in 0..5 {
            emitted.extend(d.tick(frame(i)));
        }
        emitted.extend(d.drain());
        assert_eq!(emitted, (0..5).map(frame).collect::<Vec<_>>());
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(d.detection().frame_count(), 0);
    }

    #[test]
    fn test_reference_change_discards_old_identity() {
        let (mut d, _) = dispatcher(3, 5);
        d.set_reference(reference(10.0));
        for i in 0..6 {
            d.tick(frame(i));
        }
        d.set_reference(reference(20.0));
        assert_eq!(d.in_flight(), 0);
        assert_eq!(d.phase(), DispatchPhase::Filling);

        let mut emitted = Vec::new();
        for i in 6..14 {
            emitted.extend(d.tick(frame(i)));
        }
        emitted.extend(d.drain());
        assert_eq!(emitted.len(), 8);
        assert_eq!(emitted[0].index(), 6);
        assert!(emitted.iter().all(|f| f.data()[0] == 20));
    }

    #[test]
    fn test_failed_task_falls_back_to_its_raw_frame() {
        let (mut d, _) = dispatcher_with(&config(2, 1), vec![face()], Some(2));
        d.set_reference(reference(3.0));
        let mut emitted = Vec::new();
        for i in 0..6 {
            emitted.extend(d.tick(frame(i)));
        }
        emitted.extend(d.drain());

        assert_eq!(emitted.len(), 6);
        assert_eq!(emitted[2], frame(2));
        assert_eq!(emitted[3].data()[1], 255);
        assert_eq!(d.failed_tasks(), 1);
    }

    #[test]
    fn test_disable_discards_and_passes_through() {
        let (mut d, _) = dispatcher(2, 5);
        d.set_reference(reference(9.0));
        d.tick(frame(0));
        d.tick(frame(1));
        d.set_transform_enabled(false);
        assert_eq!(d.in_flight(), 0);

        let mut emitted = Vec::new();
        for i in 2..6 {
            emitted.extend(d.tick(frame(i)));
        }
        assert_eq!(emitted, vec![frame(2), frame(3)]);
    }

    #[test]
    fn test_setting_same_transform_state_is_noop() {
        let (mut d, _) = dispatcher(2, 5);
        d.set_reference(reference(9.0));
        d.tick(frame(0));
        d.set_transform_enabled(true);
        assert_eq!(d.in_flight(), 1);
    }

    #[test]
    fn test_toggle_preserves_detection_cadence() {
        // Uninterrupted: 10 transformed frames.
        let (mut a, seen_a) = dispatcher(2, 4);
        a.set_reference(reference(1.0));
        for i in 0..10 {
            a.tick(frame(i));
        }

        // Same 10 transformed frames with 3 pass-through frames in the middle.
        let (mut b, seen_b) = dispatcher(2, 4);
        b.set_reference(reference(1.0));
        for i in 0..5 {
            b.tick(frame(i));
        }
        b.set_transform_enabled(false);
        for i in 5..8 {
            b.tick(frame(i));
        }
        b.set_transform_enabled(true);
        for i in 8..13 {
            b.tick(frame(i));
        }

        assert_eq!(a.detection().frame_count(), 10);
        assert_eq!(b.detection().frame_count(), 10);
        assert_eq!(*seen_a.lock().unwrap(), vec![0, 4, 8]);
        // Counter offsets 0, 4, 8 land on frames 0, 4 and 11.
        assert_eq!(*seen_b.lock().unwrap(), vec![0, 4, 11]);
    }

    #[test]
    fn test_load_reference_without_face_leaves_state_untouched() {
        let (mut d, _) = dispatcher_with(&config(2, 5), vec![], None);
        d.tick(frame(0));
        let err = d.load_reference(&frame(99), &ConstantEmbedder(5.0)).unwrap_err();
        assert!(matches!(err, ReferenceFaceError::NoFace));
        assert!(d.reference().is_none());
        assert_eq!(d.in_flight(), 1);
        assert_eq!(d.detection().frame_count(), 0);
    }

    #[test]
    fn test_load_reference_installs_embedding() {
        let (mut d, seen) = dispatcher(2, 5);
        d.load_reference(&frame(99), &ConstantEmbedder(5.0)).unwrap();
        assert_eq!(d.reference().unwrap().embedding(), &[5.0]);
        assert_eq!(*seen.lock().unwrap(), vec![99]);
        assert_eq!(d.detection().frame_count(), 0);
    }

    #[test]
    fn test_drain_empties_queue_in_order() {
        let (mut d, _) = dispatcher(3, 5);
        d.set_reference(reference(1.0));
        for i in 0..3 {
            assert!(d.tick(frame(i)).is_none());
        }
        let rest: Vec<usize> = d.drain().iter().map(Frame::index).collect();
        assert_eq!(rest, vec![0, 1, 2]);
        assert_eq!(d.in_flight(), 0);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let result = FrameDispatcher::new(
            &config(0, 5),
            Box::new(RecordingDetector { seen, faces: vec![] }),
            Arc::new(StampingTransformer { panic_on: None }),
            None,
        );
        assert!(matches!(
            result,
            Err(DispatcherError::Config(ConfigError::WorkerCount(0)))
        ));
    }
}
