//! Landmark-based face alignment: similarity transforms onto the ArcFace
//! 5-point template, affine warps and feathered paste-back.

use crate::detection::domain::face_landmarks::FaceLandmarks;
use crate::shared::frame::Frame;

/// ArcFace reference landmarks for a 112x112 crop.
pub const ARCFACE_TEMPLATE: [(f64, f64); 5] = [
    (38.2946, 51.6963),
    (73.5318, 51.5014),
    (56.0252, 71.7366),
    (41.5493, 92.3655),
    (70.7299, 92.2041),
];

const TEMPLATE_SIZE: f64 = 112.0;

/// `x' = a·x − b·y + tx`, `y' = b·x + a·y + ty` (rotation, uniform scale,
/// translation).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SimilarityTransform {
    pub a: f64,
    pub b: f64,
    pub tx: f64,
    pub ty: f64,
}

impl SimilarityTransform {
    /// Least-squares fit mapping `src` points onto `dst`. `None` when the
    /// source points are all identical.
    pub fn estimate(src: &[(f64, f64)], dst: &[(f64, f64)]) -> Option<Self> {
        let n = src.len().min(dst.len());
        if n == 0 {
            return None;
        }
        let mean = |pts: &[(f64, f64)]| {
            let (sx, sy) = pts[..n]
                .iter()
                .fold((0.0, 0.0), |(ax, ay), (x, y)| (ax + x, ay + y));
            (sx / n as f64, sy / n as f64)
        };
        let (msx, msy) = mean(src);
        let (mdx, mdy) = mean(dst);

        let (mut num_a, mut num_b, mut den) = (0.0, 0.0, 0.0);
        for i in 0..n {
            let (sx, sy) = (src[i].0 - msx, src[i].1 - msy);
            let (dx, dy) = (dst[i].0 - mdx, dst[i].1 - mdy);
            num_a += sx * dx + sy * dy;
            num_b += sx * dy - sy * dx;
            den += sx * sx + sy * sy;
        }
        if den <= f64::EPSILON {
            return None;
        }
        let a = num_a / den;
        let b = num_b / den;
        Some(Self {
            a,
            b,
            tx: mdx - (a * msx - b * msy),
            ty: mdy - (b * msx + a * msy),
        })
    }

    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        (
            self.a * x - self.b * y + self.tx,
            self.b * x + self.a * y + self.ty,
        )
    }

    pub fn scale(&self) -> f64 {
        (self.a * self.a + self.b * self.b).sqrt()
    }

    pub fn inverse(&self) -> Option<Self> {
        let det = self.a * self.a + self.b * self.b;
        if det <= f64::EPSILON {
            return None;
        }
        let a = self.a / det;
        let b = -self.b / det;
        Some(Self {
            a,
            b,
            tx: -(a * self.tx - b * self.ty),
            ty: -(b * self.tx + a * self.ty),
        })
    }
}

/// Transform taking frame coordinates to a `size`x`size` aligned crop.
pub fn alignment_transform(landmarks: &FaceLandmarks, size: u32) -> Option<SimilarityTransform> {
    if !landmarks.all_visible() {
        return None;
    }
    let ratio = size as f64 / TEMPLATE_SIZE;
    let template = ARCFACE_TEMPLATE.map(|(x, y)| (x * ratio, y * ratio));
    SimilarityTransform::estimate(landmarks.points(), &template)
}

/// Samples `frame` through `to_crop` into a new `size`x`size` crop.
/// Pixels mapping outside the frame are black.
pub fn warp_crop(frame: &Frame, to_crop: &SimilarityTransform, size: u32) -> Option<Frame> {
    let to_frame = to_crop.inverse()?;
    let channels = frame.channels() as usize;
    let mut data = vec![0u8; size as usize * size as usize * channels];
    let mut px = [0f64; 4];
    for y in 0..size {
        for x in 0..size {
            let (sx, sy) = to_frame.apply(x as f64, y as f64);
            if sample_bilinear(frame, sx, sy, &mut px[..channels]) {
                let offset = (y as usize * size as usize + x as usize) * channels;
                for c in 0..channels {
                    data[offset + c] = px[c].round().clamp(0.0, 255.0) as u8;
                }
            }
        }
    }
    Some(Frame::new(data, size, size, frame.channels(), frame.index()))
}

/// Blends an aligned `crop` back into `frame`.
///
/// The crop's weight falls linearly to zero over `feather` crop pixels at
/// each edge so the seam is not visible.
pub fn paste_back(frame: &mut Frame, crop: &Frame, to_crop: &SimilarityTransform, feather: f64) {
    let Some(to_frame) = to_crop.inverse() else {
        return;
    };
    let size_w = crop.width() as f64;
    let size_h = crop.height() as f64;
    let corners = [(0.0, 0.0), (size_w, 0.0), (0.0, size_h), (size_w, size_h)]
        .map(|(x, y)| to_frame.apply(x, y));
    let min_x = corners.iter().map(|p| p.0).fold(f64::INFINITY, f64::min).floor().max(0.0);
    let min_y = corners.iter().map(|p| p.1).fold(f64::INFINITY, f64::min).floor().max(0.0);
    let max_x = corners
        .iter()
        .map(|p| p.0)
        .fold(f64::NEG_INFINITY, f64::max)
        .ceil()
        .min(frame.width() as f64);
    let max_y = corners
        .iter()
        .map(|p| p.1)
        .fold(f64::NEG_INFINITY, f64::max)
        .ceil()
        .min(frame.height() as f64);
    if max_x <= min_x || max_y <= min_y {
        return;
    }

    let channels = frame.channels() as usize;
    let width = frame.width() as usize;
    let feather = feather.max(1.0);
    let mut px = [0f64; 4];
    let data = frame.data_mut();
    for y in min_y as usize..max_y as usize {
        for x in min_x as usize..max_x as usize {
            let (cx, cy) = to_crop.apply(x as f64 + 0.5, y as f64 + 0.5);
            let edge = cx.min(cy).min(size_w - cx).min(size_h - cy);
            if edge <= 0.0 {
                continue;
            }
            let weight = (edge / feather).min(1.0);
            if !sample_bilinear(crop, cx - 0.5, cy - 0.5, &mut px[..channels]) {
                continue;
            }
            let offset = (y * width + x) * channels;
            for c in 0..channels {
                let base = data[offset + c] as f64;
                data[offset + c] = (base + (px[c] - base) * weight).round().clamp(0.0, 255.0) as u8;
            }
        }
    }
}

/// Bilinear sample at `(x, y)` with clamped neighbours. Returns `false`
/// when the point lies outside the frame.
fn sample_bilinear(frame: &Frame, x: f64, y: f64, out: &mut [f64]) -> bool {
    let w = frame.width() as usize;
    let h = frame.height() as usize;
    if w == 0 || h == 0 || x < -0.5 || y < -0.5 || x > w as f64 - 0.5 || y > h as f64 - 0.5 {
        return false;
    }
    let x = x.clamp(0.0, (w - 1) as f64);
    let y = y.clamp(0.0, (h - 1) as f64);
    let x0 = x.floor() as usize;
    let y0 = y.floor() as usize;
    let x1 = (x0 + 1).min(w - 1);
    let y1 = (y0 + 1).min(h - 1);
    let fx = x - x0 as f64;
    let fy = y - y0 as f64;

    let channels = frame.channels() as usize;
    let data = frame.data();
    let at = |px: usize, py: usize, c: usize| data[(py * w + px) * channels + c] as f64;
    for (c, value) in out.iter_mut().enumerate().take(channels) {
        let top = at(x0, y0, c) * (1.0 - fx) + at(x1, y0, c) * fx;
        let bottom = at(x0, y1, c) * (1.0 - fx) + at(x1, y1, c) * fx;
        *value = top * (1.0 - fy) + bottom * fy;
    }
    true
}
