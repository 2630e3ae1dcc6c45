use std::path::Path;

use crate::shared::frame::Frame;
use crate::shared::video_metadata::VideoMetadata;
use crate::video::domain::video_reader::{CaptureSource, VideoReader};

/// Decodes video frames from files and capture devices via ffmpeg-next
/// (libavformat + libavdevice + libavcodec).
///
/// Converts each decoded frame to RGB24 and wraps it in a [`Frame`].
pub struct FfmpegReader {
    state: Option<DecodeState>,
    requested_fps: Option<f64>,
}

struct DecodeState {
    input: ffmpeg_next::format::context::Input,
    decoder: ffmpeg_next::decoder::Video,
    scaler: ffmpeg_next::software::scaling::Context,
    stream_index: usize,
    width: u32,
    height: u32,
}

// Safety: FfmpegReader is only used from a single thread at a time.
// The raw pointers inside ffmpeg types are not shared across threads.
unsafe impl Send for FfmpegReader {}

impl FfmpegReader {
    pub fn new() -> Self {
        Self {
            state: None,
            requested_fps: None,
        }
    }

    /// Frame rate asked of capture devices. Ignored for files.
    pub fn with_device_fps(mut self, fps: f64) -> Self {
        self.requested_fps = Some(fps);
        self
    }
}

impl Default for FfmpegReader {
    fn default() -> Self {
        Self::new()
    }
}

impl VideoReader for FfmpegReader {
    fn open(
        &mut self,
        source: &CaptureSource,
    ) -> Result<VideoMetadata, Box<dyn std::error::Error>> {
        ffmpeg_next::init()?;

        let (input, source_path) = match source {
            CaptureSource::File(path) => (ffmpeg_next::format::input(path)?, path.clone()),
            CaptureSource::Device { name, format } => (
                open_device(name, format, self.requested_fps)?,
                Path::new(name).to_path_buf(),
            ),
        };

        let stream = input
            .streams()
            .best(ffmpeg_next::media::Type::Video)
            .ok_or("No video stream found")?;
        let stream_index = stream.index();
        let codec_ctx = ffmpeg_next::codec::context::Context::from_parameters(stream.parameters())?;
        let decoder = codec_ctx.decoder().video()?;
        let width = decoder.width();
        let height = decoder.height();

        let rate = stream.avg_frame_rate();
        let fps = if rate.denominator() != 0 {
            rate.numerator() as f64 / rate.denominator() as f64
        } else {
            0.0
        };
        // Containers without a recorded frame count still report a finite source.
        let total_frames = match source {
            CaptureSource::File(_) => (stream.frames().max(0) as usize).max(1),
            CaptureSource::Device { .. } => 0,
        };

        let scaler = ffmpeg_next::software::scaling::Context::get(
            decoder.format(),
            width,
            height,
            ffmpeg_next::format::Pixel::RGB24,
            width,
            height,
            ffmpeg_next::software::scaling::Flags::BILINEAR,
        )?;

        log::info!("Opened {source}: {width}x{height} @ {fps:.1} fps");
        self.state = Some(DecodeState {
            input,
            decoder,
            scaler,
            stream_index,
            width,
            height,
        });

        Ok(VideoMetadata {
            width,
            height,
            fps,
            total_frames,
            source_path: Some(source_path),
        })
    }

    fn frames(
        &mut self,
    ) -> Box<dyn Iterator<Item = Result<Frame, Box<dyn std::error::Error>>> + '_> {
        let Some(state) = self.state.as_mut() else {
            return Box::new(std::iter::once(Err("FfmpegReader: not opened".into())));
        };
        Box::new(FfmpegFrameIter {
            state,
            frame_index: 0,
            flushing: false,
            done: false,
        })
    }

    fn close(&mut self) {
        self.state = None;
    }
}

fn open_device(
    name: &str,
    format_name: &str,
    fps: Option<f64>,
) -> Result<ffmpeg_next::format::context::Input, Box<dyn std::error::Error>> {
    ffmpeg_next::device::register_all();

    let format = ffmpeg_next::device::input::video()
        .find(|f| f.name() == format_name)
        .ok_or_else(|| {
            format!("capture backend '{format_name}' is not available in this ffmpeg build")
        })?;

    let mut options = ffmpeg_next::Dictionary::new();
    if let Some(fps) = fps {
        options.set("framerate", &format!("{fps}"));
    }

    match ffmpeg_next::format::open_with(&name, &format, options)? {
        ffmpeg_next::format::context::Context::Input(input) => Ok(input),
        ffmpeg_next::format::context::Context::Output(_) => {
            Err(format!("'{format_name}' opened {name} as an output").into())
        }
    }
}

/// Lazy iterator that decodes one frame at a time.
struct FfmpegFrameIter<'a> {
    state: &'a mut DecodeState,
    frame_index: usize,
    flushing: bool,
    done: bool,
}

impl FfmpegFrameIter<'_> {
    fn try_receive(&mut self) -> Option<Result<Frame, Box<dyn std::error::Error>>> {
        let mut decoded = ffmpeg_next::util::frame::video::Video::empty();
        self.state.decoder.receive_frame(&mut decoded).ok()?;

        let mut rgb_frame = ffmpeg_next::util::frame::video::Video::empty();
        if let Err(e) = self.state.scaler.run(&decoded, &mut rgb_frame) {
            return Some(Err(Box::new(e)));
        }
        let pixels = extract_rgb_pixels(&rgb_frame, self.state.width, self.state.height);
        let frame = Frame::new(
            pixels,
            self.state.width,
            self.state.height,
            3,
            self.frame_index,
        );
        self.frame_index += 1;
        Some(Ok(frame))
    }
}

impl Iterator for FfmpegFrameIter<'_> {
    type Item = Result<Frame, Box<dyn std::error::Error>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if let Some(result) = self.try_receive() {
            return Some(result);
        }
        if self.flushing {
            self.done = true;
            return None;
        }

        loop {
            let Some((stream, packet)) = self.state.input.packets().next() else {
                let _ = self.state.decoder.send_eof();
                self.flushing = true;
                let result = self.try_receive();
                self.done = result.is_none();
                return result;
            };
            if stream.index() != self.state.stream_index {
                continue;
            }
            if self.state.decoder.send_packet(&packet).is_err() {
                continue;
            }
            if let Some(result) = self.try_receive() {
                return Some(result);
            }
        }
    }
}

/// Copies pixel data from an ffmpeg frame into a tightly packed RGB buffer,
/// dropping per-row stride padding.
fn extract_rgb_pixels(
    rgb_frame: &ffmpeg_next::util::frame::video::Video,
    width: u32,
    height: u32,
) -> Vec<u8> {
    let stride = rgb_frame.stride(0);
    let data = rgb_frame.data(0);
    let row_bytes = width as usize * 3;

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        pixels.extend_from_slice(&data[start..start + row_bytes]);
    }
    pixels
}
