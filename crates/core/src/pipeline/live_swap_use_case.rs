use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;

use crate::detection::domain::face_embedder::FaceEmbedder;
use crate::detection::domain::reference_face::{read_reference_image, ReferenceFaceError};
use crate::pipeline::frame_dispatcher::FrameDispatcher;
use crate::pipeline::pipeline_logger::{NullPipelineLogger, PipelineLogger};
use crate::shared::frame::Frame;
use crate::video::domain::frame_sink::FrameSink;
use crate::video::domain::frame_source::{FrameSource, ReadOutcome};
use crate::video::domain::image_reader::ImageReader;

const DEFAULT_IDLE_POLL: Duration = Duration::from_millis(2);

/// About one second of output at the default capture rate.
pub const MAX_CONSECUTIVE_WRITE_FAILURES: usize = 30;

/// Runtime commands for a running session.
#[derive(Clone, Debug, PartialEq)]
pub enum ControlEvent {
    /// Load a new reference identity from a still image.
    SetReference(PathBuf),
    SetTransformEnabled(bool),
    ToggleTransform,
    Stop,
}

/// Counters for one finished session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LiveSwapReport {
    pub captured: usize,
    pub emitted: usize,
    /// Frames the sink failed to write; the session carried on without them.
    pub dropped_writes: usize,
    pub failed_tasks: usize,
}

/// The control loop: capture, dispatch, emit.
///
/// Each iteration applies pending control events, polls the source once and
/// feeds a captured frame to the dispatcher; whatever the dispatcher emits
/// goes to the sink. The loop ends on `Stop`, on cancellation, after
/// `max_frames` captures, or when a finite source is exhausted. Every exit
/// drains the dispatcher so recordings are not cut short.
///
/// A failed sink write drops that frame and the loop continues. The session
/// only ends on a sink error when the consumer is gone (broken pipe) or after
/// [`MAX_CONSECUTIVE_WRITE_FAILURES`] failures in a row.
pub struct LiveSwapUseCase {
    source: Box<dyn FrameSource>,
    sink: Box<dyn FrameSink>,
    dispatcher: FrameDispatcher,
    image_reader: Box<dyn ImageReader>,
    embedder: Box<dyn FaceEmbedder>,
    controls: Receiver<ControlEvent>,
    logger: Box<dyn PipelineLogger>,
    cancelled: Arc<AtomicBool>,
    idle_poll: Duration,
    max_frames: Option<usize>,
    write_failure_streak: usize,
}

impl LiveSwapUseCase {
    pub fn new(
        source: Box<dyn FrameSource>,
        sink: Box<dyn FrameSink>,
        dispatcher: FrameDispatcher,
        image_reader: Box<dyn ImageReader>,
        embedder: Box<dyn FaceEmbedder>,
        controls: Receiver<ControlEvent>,
    ) -> Self {
        Self {
            source,
            sink,
            dispatcher,
            image_reader,
            embedder,
            controls,
            logger: Box::new(NullPipelineLogger),
            cancelled: Arc::new(AtomicBool::new(false)),
            idle_poll: DEFAULT_IDLE_POLL,
            max_frames: None,
            write_failure_streak: 0,
        }
    }

    pub fn with_logger(mut self, logger: Box<dyn PipelineLogger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn with_cancel_flag(mut self, cancelled: Arc<AtomicBool>) -> Self {
        self.cancelled = cancelled;
        self
    }

    /// Sleep between polls when the source has nothing new.
    pub fn with_idle_poll(mut self, idle_poll: Duration) -> Self {
        self.idle_poll = idle_poll;
        self
    }

    pub fn with_max_frames(mut self, max_frames: Option<usize>) -> Self {
        self.max_frames = max_frames;
        self
    }

    pub fn dispatcher(&self) -> &FrameDispatcher {
        &self.dispatcher
    }

    /// Loads a reference before the session starts. Unlike a runtime
    /// `SetReference`, failure is returned to the caller.
    pub fn load_reference(&mut self, path: &Path) -> Result<(), ReferenceFaceError> {
        let image = read_reference_image(self.image_reader.as_ref(), path)?;
        self.dispatcher.load_reference(&image, self.embedder.as_ref())
    }

    pub fn execute(&mut self) -> Result<LiveSwapReport, Box<dyn std::error::Error>> {
        let metadata = self.source.start()?;
        if let Err(e) = self.sink.open(&metadata) {
            self.source.stop();
            return Err(e);
        }
        let total = match self.max_frames {
            Some(max) if metadata.is_live() || max < metadata.total_frames => max,
            _ => metadata.total_frames,
        };

        let mut report = LiveSwapReport::default();
        let result = self.run_loop(total, &mut report);
        self.source.stop();
        let drained = if result.is_ok() {
            self.flush(total, &mut report)
        } else {
            Ok(())
        };
        let closed = self.sink.close();

        report.failed_tasks = self.dispatcher.failed_tasks();
        self.logger.summary();
        result?;
        drained?;
        closed?;
        Ok(report)
    }

    fn run_loop(
        &mut self,
        total: usize,
        report: &mut LiveSwapReport,
    ) -> Result<(), Box<dyn std::error::Error>> {
        loop {
            if self.cancelled.load(Ordering::Relaxed) {
                log::info!("Session cancelled");
                return Ok(());
            }
            if !self.apply_controls() {
                return Ok(());
            }
            if self.max_frames.is_some_and(|max| report.captured >= max) {
                return Ok(());
            }

            let frame = match self.source.read() {
                ReadOutcome::Frame(frame) => frame,
                ReadOutcome::Pending => {
                    std::thread::sleep(self.idle_poll);
                    continue;
                }
                ReadOutcome::Exhausted => {
                    log::info!("Source exhausted after {} frames", report.captured);
                    return Ok(());
                }
            };
            report.captured += 1;

            let emitted = self.dispatcher.tick(frame);
            let timings = self.dispatcher.last_timings();
            self.logger.timing("detect", timings.detect.as_secs_f64() * 1000.0);
            self.logger
                .timing("retrieve", timings.retrieve.as_secs_f64() * 1000.0);
            self.logger
                .metric("queue_depth", self.dispatcher.in_flight() as f64);
            self.logger
                .metric("faces", self.dispatcher.detection().cached().len() as f64);

            if let Some(frame) = emitted {
                self.emit(&frame, total, report)?;
            }
        }
    }

    fn flush(
        &mut self,
        total: usize,
        report: &mut LiveSwapReport,
    ) -> Result<(), Box<dyn std::error::Error>> {
        for frame in self.dispatcher.drain() {
            self.emit(&frame, total, report)?;
        }
        Ok(())
    }

    fn emit(
        &mut self,
        frame: &Frame,
        total: usize,
        report: &mut LiveSwapReport,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let started = Instant::now();
        let written = self.sink.write(frame);
        self.logger
            .timing("write", started.elapsed().as_secs_f64() * 1000.0);
        match written {
            Ok(()) => {
                self.write_failure_streak = 0;
                report.emitted += 1;
                self.logger.progress(report.emitted, total);
                Ok(())
            }
            Err(e) if is_broken_pipe(&*e) => Err(e),
            Err(e) => {
                self.write_failure_streak += 1;
                report.dropped_writes += 1;
                if self.write_failure_streak >= MAX_CONSECUTIVE_WRITE_FAILURES {
                    return Err(format!(
                        "giving up after {} consecutive failed writes: {e}",
                        self.write_failure_streak
                    )
                    .into());
                }
                log::warn!("Dropped frame {}: {e}", frame.index());
                Ok(())
            }
        }
    }

    /// Applies every queued event. Returns `false` once `Stop` is seen.
    fn apply_controls(&mut self) -> bool {
        loop {
            let Ok(event) = self.controls.try_recv() else {
                return true;
            };
            match event {
                ControlEvent::SetReference(path) => match self.load_reference(&path) {
                    Ok(()) => self
                        .logger
                        .info(&format!("Reference face set from {}", path.display())),
                    Err(e) => log::warn!("Keeping current reference, {}: {e}", path.display()),
                },
                ControlEvent::SetTransformEnabled(enabled) => self.set_transform(enabled),
                ControlEvent::ToggleTransform => {
                    self.set_transform(!self.dispatcher.transform_enabled())
                }
                ControlEvent::Stop => {
                    log::info!("Stop requested");
                    return false;
                }
            }
        }
    }

    fn set_transform(&mut self, enabled: bool) {
        self.dispatcher.set_transform_enabled(enabled);
        let state = if enabled { "on" } else { "off" };
        self.logger.info(&format!("Face swap {state}"));
    }
}

fn is_broken_pipe(error: &(dyn std::error::Error + 'static)) -> bool {
    error
        .downcast_ref::<std::io::Error>()
        .is_some_and(|e| e.kind() == std::io::ErrorKind::BrokenPipe)
}
