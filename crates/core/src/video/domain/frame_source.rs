use crate::shared::frame::Frame;
use crate::shared::video_metadata::VideoMetadata;

/// Result of polling a [`FrameSource`].
#[derive(Debug)]
pub enum ReadOutcome {
    /// A frame not returned by any earlier read.
    Frame(Frame),
    /// Nothing new since the last read; try again next tick.
    Pending,
    /// The source has ended and will produce no more frames.
    Exhausted,
}

/// Live frame provider for the control loop.
///
/// `read` never blocks: a source that captures faster than it is read
/// keeps only the newest frame and drops the rest.
pub trait FrameSource: Send {
    fn start(&mut self) -> Result<VideoMetadata, Box<dyn std::error::Error>>;

    fn read(&mut self) -> ReadOutcome;

    fn stop(&mut self);
}
