use std::path::{Path, PathBuf};

use crate::shared::frame::Frame;
use crate::shared::video_metadata::VideoMetadata;
use crate::video::domain::frame_sink::FrameSink;

const FALLBACK_FPS: i32 = 30;

/// Records pipeline output to a video file via ffmpeg-next.
///
/// Frames are timestamped by arrival order at the stream's nominal rate, so
/// a recording plays back at the rate the pipeline was configured for even
/// if individual ticks were late.
pub struct FfmpegRecorder {
    path: PathBuf,
    state: Option<EncodeState>,
}

struct EncodeState {
    octx: ffmpeg_next::format::context::Output,
    encoder: ffmpeg_next::codec::encoder::video::Encoder,
    scaler: ffmpeg_next::software::scaling::Context,
    width: u32,
    height: u32,
    time_base: ffmpeg_next::Rational,
    frame_count: i64,
}

// Safety: FfmpegRecorder is only used from a single thread at a time.
// The raw pointers inside ffmpeg types are not shared across threads.
unsafe impl Send for FfmpegRecorder {}

impl FfmpegRecorder {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            state: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FrameSink for FfmpegRecorder {
    fn open(&mut self, metadata: &VideoMetadata) -> Result<(), Box<dyn std::error::Error>> {
        ffmpeg_next::init()?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let mut octx = ffmpeg_next::format::output(&self.path)?;
        let global_header = octx
            .format()
            .flags()
            .contains(ffmpeg_next::format::Flags::GLOBAL_HEADER);

        // MPEG4 ships with every ffmpeg build
        let codec = ffmpeg_next::encoder::find(ffmpeg_next::codec::Id::MPEG4)
            .ok_or("MPEG4 encoder not found")?;
        let mut ost = octx.add_stream(Some(codec))?;
        let mut encoder_ctx = ffmpeg_next::codec::context::Context::new_with_codec(codec)
            .encoder()
            .video()?;

        let fps = match metadata.fps.round() as i32 {
            f if f > 0 => f,
            _ => FALLBACK_FPS,
        };
        let time_base = ffmpeg_next::Rational(1, fps);
        encoder_ctx.set_width(metadata.width);
        encoder_ctx.set_height(metadata.height);
        encoder_ctx.set_format(ffmpeg_next::format::Pixel::YUV420P);
        encoder_ctx.set_time_base(time_base);
        encoder_ctx.set_frame_rate(Some(ffmpeg_next::Rational(fps, 1)));
        if global_header {
            encoder_ctx.set_flags(ffmpeg_next::codec::Flags::GLOBAL_HEADER);
        }

        let encoder = encoder_ctx.open_with(ffmpeg_next::Dictionary::new())?;
        ost.set_parameters(&encoder);
        octx.write_header()?;

        let scaler = ffmpeg_next::software::scaling::Context::get(
            ffmpeg_next::format::Pixel::RGB24,
            metadata.width,
            metadata.height,
            ffmpeg_next::format::Pixel::YUV420P,
            metadata.width,
            metadata.height,
            ffmpeg_next::software::scaling::Flags::BILINEAR,
        )?;

        log::info!(
            "Recording {}x{} @ {fps} fps to {}",
            metadata.width,
            metadata.height,
            self.path.display()
        );
        self.state = Some(EncodeState {
            octx,
            encoder,
            scaler,
            width: metadata.width,
            height: metadata.height,
            time_base,
            frame_count: 0,
        });
        Ok(())
    }

    fn write(&mut self, frame: &Frame) -> Result<(), Box<dyn std::error::Error>> {
        let state = self.state.as_mut().ok_or("FfmpegRecorder: not opened")?;
        if frame.width() != state.width || frame.height() != state.height || frame.channels() != 3 {
            return Err(format!(
                "frame is {}x{}x{}, recorder expects {}x{}x3",
                frame.width(),
                frame.height(),
                frame.channels(),
                state.width,
                state.height
            )
            .into());
        }

        let mut rgb_frame = ffmpeg_next::util::frame::video::Video::new(
            ffmpeg_next::format::Pixel::RGB24,
            state.width,
            state.height,
        );
        let stride = rgb_frame.stride(0);
        let row_bytes = state.width as usize * 3;
        let dst = rgb_frame.data_mut(0);
        for (row, src) in frame.data().chunks_exact(row_bytes).enumerate() {
            dst[row * stride..row * stride + row_bytes].copy_from_slice(src);
        }

        let mut yuv_frame = ffmpeg_next::util::frame::video::Video::empty();
        state.scaler.run(&rgb_frame, &mut yuv_frame)?;
        yuv_frame.set_pts(Some(state.frame_count));
        state.encoder.send_frame(&yuv_frame)?;
        state.drain_packets()?;
        state.frame_count += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        let Some(mut state) = self.state.take() else {
            return Ok(());
        };
        state.encoder.send_eof()?;
        state.drain_packets()?;
        state.octx.write_trailer()?;
        log::info!(
            "Recorded {} frames to {}",
            state.frame_count,
            self.path.display()
        );
        Ok(())
    }
}

impl EncodeState {
    fn drain_packets(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        let ost_time_base = self
            .octx
            .stream(0)
            .ok_or("output stream missing")?
            .time_base();
        let mut encoded = ffmpeg_next::Packet::empty();
        while self.encoder.receive_packet(&mut encoded).is_ok() {
            encoded.set_stream(0);
            encoded.rescale_ts(self.time_base, ost_time_base);
            encoded.write_interleaved(&mut self.octx)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::domain::video_reader::{CaptureSource, VideoReader};
    use crate::video::infrastructure::ffmpeg_reader::FfmpegReader;

    fn metadata(w: u32, h: u32) -> VideoMetadata {
        VideoMetadata {
            width: w,
            height: h,
            fps: 30.0,
            total_frames: 0,
            source_path: None,
        }
    }

    fn solid_frame(index: usize, w: u32, h: u32, value: u8) -> Frame {
        Frame::new(vec![value; (w * h * 3) as usize], w, h, 3, index)
    }

    #[test]
    fn test_write_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("out.mp4");

        let mut recorder = FfmpegRecorder::new(&path);
        recorder.open(&metadata(160, 120)).unwrap();
        for i in 0..3 {
            recorder.write(&solid_frame(i, 160, 120, 128)).unwrap();
        }
        recorder.close().unwrap();

        assert!(path.exists());
        assert!(std::fs::metadata(&path).unwrap().len() > 0);
    }

    #[test]
    fn test_write_without_open_returns_error() {
        let mut recorder = FfmpegRecorder::new("unused.mp4");
        assert!(recorder.write(&solid_frame(0, 160, 120, 128)).is_err());
    }

    #[test]
    fn test_mismatched_frame_size_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut recorder = FfmpegRecorder::new(dir.path().join("out.mp4"));
        recorder.open(&metadata(160, 120)).unwrap();
        let err = recorder.write(&solid_frame(0, 80, 60, 0)).unwrap_err();
        assert!(err.to_string().contains("80x60"));
        recorder.close().unwrap();
    }

    #[test]
    fn test_close_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut recorder = FfmpegRecorder::new(dir.path().join("out.mp4"));
        recorder.open(&metadata(160, 120)).unwrap();
        recorder.write(&solid_frame(0, 160, 120, 128)).unwrap();
        recorder.close().unwrap();
        assert!(recorder.close().is_ok());
    }

    #[test]
    fn test_recording_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roundtrip.mp4");

        let mut recorder = FfmpegRecorder::new(&path);
        recorder.open(&metadata(160, 120)).unwrap();
        for i in 0..3 {
            recorder.write(&solid_frame(i, 160, 120, 128)).unwrap();
        }
        recorder.close().unwrap();

        let mut reader = FfmpegReader::new();
        let meta = reader.open(&CaptureSource::File(path)).unwrap();
        assert_eq!((meta.width, meta.height), (160, 120));

        let frames: Vec<_> = reader.frames().map(|f| f.unwrap()).collect();
        assert_eq!(frames.len(), 3);
        // Lossy codec: brightness only needs to be close
        let avg = frames[0].data().iter().map(|&b| b as f64).sum::<f64>()
            / frames[0].data().len() as f64;
        assert!((avg - 128.0).abs() < 40.0, "average {avg} should be near 128");
    }
}
