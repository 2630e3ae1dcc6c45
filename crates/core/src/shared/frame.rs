use ndarray::{ArrayView3, ArrayViewMut3};

/// A captured video/image frame: contiguous RGB bytes in row-major order.
///
/// `index` is the capture-order sequence number assigned by the source.
/// Format conversion happens at I/O boundaries only; the pipeline treats
/// pixel data as opaque.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    data: Vec<u8>,
    width: u32,
    height: u32,
    channels: u8,
    index: usize,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, channels: u8, index: usize) -> Self {
        debug_assert_eq!(
            data.len(),
            (width as usize) * (height as usize) * (channels as usize),
            "data length must equal width * height * channels"
        );
        Self {
            data,
            width,
            height,
            channels,
            index,
        }
    }

    /// Wraps an RGB image, taking ownership of its buffer.
    pub fn from_rgb_image(image: image::RgbImage, index: usize) -> Self {
        let (width, height) = image.dimensions();
        Self::new(image.into_raw(), width, height, 3, index)
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn as_ndarray(&self) -> ArrayView3<'_, u8> {
        ArrayView3::from_shape(self.shape(), &self.data)
            .expect("Frame data length must match dimensions")
    }

    pub fn as_ndarray_mut(&mut self) -> ArrayViewMut3<'_, u8> {
        ArrayViewMut3::from_shape(self.shape(), &mut self.data)
            .expect("Frame data length must match dimensions")
    }

    /// Copies the pixels into an `image` buffer. `None` for non-RGB frames.
    pub fn to_rgb_image(&self) -> Option<image::RgbImage> {
        if self.channels != 3 {
            return None;
        }
        image::RgbImage::from_raw(self.width, self.height, self.data.clone())
    }

    /// Returns a resampled copy at exactly `width` x `height`, keeping the index.
    pub fn resized(&self, width: u32, height: u32) -> Option<Frame> {
        if width == self.width && height == self.height {
            return Some(self.clone());
        }
        let img = self.to_rgb_image()?;
        let resized =
            image::imageops::resize(&img, width, height, image::imageops::FilterType::Triangle);
        Some(Frame::from_rgb_image(resized, self.index))
    }

    /// Returns a copy scaled by `factor` on both axes (at least 1x1).
    pub fn scaled(&self, factor: f64) -> Option<Frame> {
        let w = ((self.width as f64 * factor).round() as u32).max(1);
        let h = ((self.height as f64 * factor).round() as u32).max(1);
        self.resized(w, h)
    }

    fn shape(&self) -> (usize, usize, usize) {
        (
            self.height as usize,
            self.width as usize,
            self.channels as usize,
        )
    }
}
