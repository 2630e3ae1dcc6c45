use super::face_landmarks::FaceLandmarks;

/// Axis-aligned box as `[x1, y1, x2, y2]` corners in frame pixels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl BoundingBox {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f64 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f64 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f64 {
        self.width() * self.height()
    }

    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            x1: self.x1 * factor,
            y1: self.y1 * factor,
            x2: self.x2 * factor,
            y2: self.y2 * factor,
        }
    }

    pub fn as_array(&self) -> [f64; 4] {
        [self.x1, self.y1, self.x2, self.y2]
    }

    /// Grows the box by `fraction` of its size on every side, then clips it
    /// to a `frame_w` x `frame_h` frame. Returns `(x, y, w, h)` in whole
    /// pixels, or `None` if nothing of the box lies inside the frame.
    pub fn padded_roi(
        &self,
        fraction: f64,
        frame_w: u32,
        frame_h: u32,
    ) -> Option<(u32, u32, u32, u32)> {
        let pad_x = self.width() * fraction;
        let pad_y = self.height() * fraction;
        let x1 = (self.x1 - pad_x).floor().max(0.0);
        let y1 = (self.y1 - pad_y).floor().max(0.0);
        let x2 = (self.x2 + pad_x).ceil().min(frame_w as f64);
        let y2 = (self.y2 + pad_y).ceil().min(frame_h as f64);
        if x2 <= x1 || y2 <= y1 {
            return None;
        }
        Some((x1 as u32, y1 as u32, (x2 - x1) as u32, (y2 - y1) as u32))
    }
}

/// A detected face in the coordinate space of the original frame.
///
/// Immutable once produced; one detection cycle's descriptors are shared
/// read-only by every transform task that reuses them.
#[derive(Clone, Debug, PartialEq)]
pub struct FaceDescriptor {
    pub bbox: BoundingBox,
    pub landmarks: Option<FaceLandmarks>,
    pub score: f64,
}

impl FaceDescriptor {
    pub fn new(bbox: BoundingBox, landmarks: Option<FaceLandmarks>, score: f64) -> Self {
        Self {
            bbox,
            landmarks,
            score,
        }
    }

    pub fn area(&self) -> f64 {
        self.bbox.area()
    }

    /// Maps a descriptor detected on a resized frame back to the source
    /// frame: boxes and landmarks are multiplied by `factor`.
    pub fn rescaled(&self, factor: f64) -> Self {
        Self {
            bbox: self.bbox.scaled(factor),
            landmarks: self.landmarks.as_ref().map(|lm| lm.scaled(factor)),
            score: self.score,
        }
    }
}
