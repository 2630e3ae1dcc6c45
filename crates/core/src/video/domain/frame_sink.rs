use crate::shared::frame::Frame;
use crate::shared::video_metadata::VideoMetadata;

/// Destination for pipeline output: a recording, a virtual camera feed, or
/// a display.
///
/// Sinks are told their destination at construction; `open` only passes
/// stream properties.
pub trait FrameSink: Send {
    fn open(&mut self, metadata: &VideoMetadata) -> Result<(), Box<dyn std::error::Error>>;

    fn write(&mut self, frame: &Frame) -> Result<(), Box<dyn std::error::Error>>;

    fn close(&mut self) -> Result<(), Box<dyn std::error::Error>>;
}
