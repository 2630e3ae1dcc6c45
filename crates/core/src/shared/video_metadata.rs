use std::path::PathBuf;

/// Stream properties reported by a source when it starts.
///
/// Live devices report `total_frames = 0`; a still image is a single frame
/// with `fps = 0`.
#[derive(Clone, Debug, PartialEq)]
pub struct VideoMetadata {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub total_frames: usize,
    pub source_path: Option<PathBuf>,
}

impl VideoMetadata {
    pub fn is_live(&self) -> bool {
        self.total_frames == 0
    }

    /// Same stream with a different frame size, for sinks that rescale.
    pub fn with_size(&self, width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            ..self.clone()
        }
    }
}
