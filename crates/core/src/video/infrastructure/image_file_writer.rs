use std::path::Path;

use crate::shared::frame::Frame;
use crate::video::domain::image_writer::ImageWriter;

/// Writes a frame to an image file using the `image` crate; the format
/// follows the file extension.
pub struct ImageFileWriter;

impl ImageFileWriter {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ImageFileWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageWriter for ImageFileWriter {
    fn write(&self, path: &Path, frame: &Frame) -> Result<(), Box<dyn std::error::Error>> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let img = frame
            .to_rgb_image()
            .ok_or("Failed to create image from frame data")?;
        img.save(path)?;
        Ok(())
    }
}
