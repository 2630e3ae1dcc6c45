use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, TryRecvError, TrySendError};

use crate::shared::frame::Frame;
use crate::shared::video_metadata::VideoMetadata;
use crate::video::domain::frame_source::{FrameSource, ReadOutcome};
use crate::video::domain::video_reader::{CaptureSource, VideoReader};

/// Decodes on a background thread and keeps only the newest frame.
///
/// The decoder publishes into a one-slot channel; if the slot is still full
/// the stale frame is pulled back out and replaced, so `read` always sees
/// the latest capture and never blocks. File sources are paced at
/// `pace_fps` to behave like a camera; devices run at their own rate.
pub struct CaptureStream {
    source: CaptureSource,
    reader: Option<Box<dyn VideoReader>>,
    pace_fps: Option<f64>,
    slot: Option<Receiver<Frame>>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl CaptureStream {
    pub fn new(reader: Box<dyn VideoReader>, source: CaptureSource) -> Self {
        Self {
            source,
            reader: Some(reader),
            pace_fps: None,
            slot: None,
            stop: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    /// Plays file sources back at `fps` instead of the file's own rate.
    pub fn with_pace(mut self, fps: f64) -> Self {
        self.pace_fps = Some(fps);
        self
    }
}

impl FrameSource for CaptureStream {
    fn start(&mut self) -> Result<VideoMetadata, Box<dyn std::error::Error>> {
        let mut reader = self.reader.take().ok_or("capture stream already started")?;
        let metadata = reader.open(&self.source)?;

        let interval = if self.source.is_device() {
            None
        } else {
            let fps = self.pace_fps.unwrap_or(metadata.fps);
            (fps > 0.0).then(|| Duration::from_secs_f64(1.0 / fps))
        };

        let (tx, rx) = crossbeam_channel::bounded::<Frame>(1);
        let stale = rx.clone();
        let stop = Arc::clone(&self.stop);
        let handle = std::thread::Builder::new()
            .name("capture".into())
            .spawn(move || {
                decode_loop(reader.as_mut(), &tx, &stale, &stop, interval);
                reader.close();
            })?;

        self.slot = Some(rx);
        self.handle = Some(handle);
        Ok(metadata)
    }

    fn read(&mut self) -> ReadOutcome {
        let Some(slot) = &self.slot else {
            return ReadOutcome::Exhausted;
        };
        match slot.try_recv() {
            Ok(frame) => ReadOutcome::Frame(frame),
            Err(TryRecvError::Empty) => ReadOutcome::Pending,
            Err(TryRecvError::Disconnected) => ReadOutcome::Exhausted,
        }
    }

    fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        self.slot = None;
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::warn!("Capture thread for {} panicked", self.source);
            }
        }
    }
}

impl Drop for CaptureStream {
    fn drop(&mut self) {
        self.stop();
    }
}

fn decode_loop(
    reader: &mut dyn VideoReader,
    tx: &Sender<Frame>,
    stale: &Receiver<Frame>,
    stop: &AtomicBool,
    interval: Option<Duration>,
) {
    let mut next_due = Instant::now();
    let mut dropped = 0usize;

    for result in reader.frames() {
        if stop.load(Ordering::Relaxed) {
            break;
        }
        let frame = match result {
            Ok(frame) => frame,
            Err(e) => {
                log::warn!("Skipping undecodable frame: {e}");
                continue;
            }
        };

        if let Some(interval) = interval {
            let now = Instant::now();
            if next_due > now {
                std::thread::sleep(next_due - now);
            }
            next_due = next_due.max(now) + interval;
        }

        if publish_latest(tx, stale, frame) {
            dropped += 1;
        }
    }
    if dropped > 0 {
        log::debug!("Capture replaced {dropped} unread frames");
    }
}

/// Puts `frame` in the slot, evicting an unread one. Returns whether a
/// frame was evicted.
fn publish_latest(tx: &Sender<Frame>, stale: &Receiver<Frame>, frame: Frame) -> bool {
    let mut frame = frame;
    let mut evicted = false;
    loop {
        match tx.try_send(frame) {
            Ok(()) => return evicted,
            Err(TrySendError::Full(back)) => {
                evicted |= stale.try_recv().is_ok();
                frame = back;
            }
            Err(TrySendError::Disconnected(_)) => return evicted,
        }
    }
}
