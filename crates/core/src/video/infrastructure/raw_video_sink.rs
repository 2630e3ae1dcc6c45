use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::shared::frame::Frame;
use crate::shared::video_metadata::VideoMetadata;
use crate::video::domain::frame_sink::FrameSink;

/// Streams packed RGB24 frames to a file, FIFO or device node, or to stdout
/// when the path is `-`.
///
/// Feeds virtual cameras (a v4l2loopback node, or an ffmpeg/OBS process
/// reading `rawvideo` from a pipe). Every frame must match the size given
/// to `open`; wrap in a `ResizingSink` when the consumer needs a fixed size.
pub struct RawVideoSink {
    target: PathBuf,
    out: Option<Box<dyn Write + Send>>,
    frame_bytes: usize,
    frames_written: usize,
}

impl RawVideoSink {
    pub fn new(target: impl AsRef<Path>) -> Self {
        Self {
            target: target.as_ref().to_path_buf(),
            out: None,
            frame_bytes: 0,
            frames_written: 0,
        }
    }

    pub fn frames_written(&self) -> usize {
        self.frames_written
    }
}

impl FrameSink for RawVideoSink {
    fn open(&mut self, metadata: &VideoMetadata) -> Result<(), Box<dyn std::error::Error>> {
        let out: Box<dyn Write + Send> = if self.target == Path::new("-") {
            Box::new(BufWriter::new(std::io::stdout()))
        } else {
            let file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&self.target)?;
            Box::new(BufWriter::new(file))
        };
        self.out = Some(out);
        self.frame_bytes = metadata.width as usize * metadata.height as usize * 3;
        self.frames_written = 0;
        log::info!(
            "Streaming rawvideo rgb24 {}x{} @ {:.1} fps to {}",
            metadata.width,
            metadata.height,
            metadata.fps,
            self.target.display()
        );
        Ok(())
    }

    fn write(&mut self, frame: &Frame) -> Result<(), Box<dyn std::error::Error>> {
        let out = self.out.as_mut().ok_or("RawVideoSink: not opened")?;
        if frame.channels() != 3 || frame.data().len() != self.frame_bytes {
            return Err(format!(
                "frame {}x{}x{} does not match the opened stream size",
                frame.width(),
                frame.height(),
                frame.channels()
            )
            .into());
        }
        out.write_all(frame.data())?;
        // Consumers expect whole frames as soon as they are produced.
        out.flush()?;
        self.frames_written += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        if let Some(mut out) = self.out.take() {
            out.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(w: u32, h: u32) -> VideoMetadata {
        VideoMetadata {
            width: w,
            height: h,
            fps: 30.0,
            total_frames: 0,
            source_path: None,
        }
    }

    #[test]
    fn test_writes_packed_frames_back_to_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feed.rgb");
        let mut sink = RawVideoSink::new(&path);
        sink.open(&metadata(2, 2)).unwrap();
        sink.write(&Frame::new(vec![1; 12], 2, 2, 3, 0)).unwrap();
        sink.write(&Frame::new(vec![2; 12], 2, 2, 3, 1)).unwrap();
        sink.close().unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes.len(), 24);
        assert!(bytes[..12].iter().all(|&b| b == 1));
        assert!(bytes[12..].iter().all(|&b| b == 2));
        assert_eq!(sink.frames_written(), 2);
    }

    #[test]
    fn test_wrong_size_frame_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = RawVideoSink::new(dir.path().join("feed.rgb"));
        sink.open(&metadata(4, 4)).unwrap();
        assert!(sink.write(&Frame::new(vec![0; 12], 2, 2, 3, 0)).is_err());
    }

    #[test]
    fn test_write_before_open_fails() {
        let mut sink = RawVideoSink::new("unused.rgb");
        assert!(sink.write(&Frame::new(vec![0; 3], 1, 1, 3, 0)).is_err());
    }

    #[test]
    fn test_unwritable_target_fails_to_open() {
        let mut sink = RawVideoSink::new("/nonexistent/dir/feed.rgb");
        assert!(sink.open(&metadata(2, 2)).is_err());
    }
}
