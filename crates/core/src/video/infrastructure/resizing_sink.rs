use crate::shared::frame::Frame;
use crate::shared::video_metadata::VideoMetadata;
use crate::video::domain::frame_sink::FrameSink;

/// Rescales every frame to a fixed size before handing it to `inner`.
///
/// Virtual camera devices are created with one resolution and reject
/// anything else.
pub struct ResizingSink {
    inner: Box<dyn FrameSink>,
    width: u32,
    height: u32,
}

impl ResizingSink {
    pub fn new(inner: Box<dyn FrameSink>, width: u32, height: u32) -> Self {
        Self {
            inner,
            width,
            height,
        }
    }
}

impl FrameSink for ResizingSink {
    fn open(&mut self, metadata: &VideoMetadata) -> Result<(), Box<dyn std::error::Error>> {
        self.inner.open(&metadata.with_size(self.width, self.height))
    }

    fn write(&mut self, frame: &Frame) -> Result<(), Box<dyn std::error::Error>> {
        if frame.width() == self.width && frame.height() == self.height {
            return self.inner.write(frame);
        }
        let resized = frame
            .resized(self.width, self.height)
            .ok_or("only RGB frames can be resized")?;
        self.inner.write(&resized)
    }

    fn close(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.inner.close()
    }
}
