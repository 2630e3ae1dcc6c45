use std::fmt;
use std::path::PathBuf;

use crate::shared::frame::Frame;
use crate::shared::video_metadata::VideoMetadata;

/// What to decode: a media file or a capture device.
#[derive(Clone, Debug, PartialEq)]
pub enum CaptureSource {
    File(PathBuf),
    /// A device opened through an ffmpeg input format (`v4l2`,
    /// `avfoundation`, `dshow`).
    Device { name: String, format: String },
}

impl CaptureSource {
    /// Interprets a user-supplied source string.
    ///
    /// A bare number selects that camera on the platform's default capture
    /// backend. An explicit `format` always means a device. Anything else
    /// is a file path, except `/dev/video*` which is a V4L2 device.
    pub fn parse(source: &str, format: Option<&str>) -> Self {
        if let Some(format) = format {
            return Self::Device {
                name: source.to_string(),
                format: format.to_string(),
            };
        }
        if let Ok(index) = source.parse::<u32>() {
            return default_camera(index);
        }
        if source.starts_with("/dev/video") {
            return Self::Device {
                name: source.to_string(),
                format: "v4l2".to_string(),
            };
        }
        Self::File(PathBuf::from(source))
    }

    pub fn is_device(&self) -> bool {
        matches!(self, Self::Device { .. })
    }
}

impl fmt::Display for CaptureSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => write!(f, "{}", path.display()),
            Self::Device { name, format } => write!(f, "{name} ({format})"),
        }
    }
}

#[cfg(target_os = "macos")]
fn default_camera(index: u32) -> CaptureSource {
    CaptureSource::Device {
        name: index.to_string(),
        format: "avfoundation".to_string(),
    }
}

#[cfg(target_os = "windows")]
fn default_camera(index: u32) -> CaptureSource {
    CaptureSource::Device {
        name: format!("video={index}"),
        format: "dshow".to_string(),
    }
}

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
fn default_camera(index: u32) -> CaptureSource {
    CaptureSource::Device {
        name: format!("/dev/video{index}"),
        format: "v4l2".to_string(),
    }
}

/// Decodes frames from a file or capture device.
///
/// Implementations handle I/O details (codec, container, device API) while
/// the pipeline works with the abstract `Frame` and `VideoMetadata` types.
pub trait VideoReader: Send {
    fn open(&mut self, source: &CaptureSource) -> Result<VideoMetadata, Box<dyn std::error::Error>>;

    /// Returns an iterator over frames in decode order. For devices the
    /// iterator only ends when the device does.
    fn frames(
        &mut self,
    ) -> Box<dyn Iterator<Item = Result<Frame, Box<dyn std::error::Error>>> + '_>;

    fn close(&mut self);
}
