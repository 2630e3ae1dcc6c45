use std::path::Path;

use crate::shared::frame::Frame;
use crate::video::domain::image_reader::ImageReader;

/// Decodes still images with the `image` crate, converting any pixel
/// layout (grey, RGBA, 16-bit) to 8-bit RGB.
pub struct ImageFileReader;

impl ImageFileReader {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ImageFileReader {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageReader for ImageFileReader {
    fn read(&self, path: &Path) -> Result<Frame, Box<dyn std::error::Error>> {
        let img = image::open(path)
            .map_err(|e| format!("cannot read image {}: {e}", path.display()))?
            .to_rgb8();
        Ok(Frame::from_rgb_image(img, 0))
    }
}
