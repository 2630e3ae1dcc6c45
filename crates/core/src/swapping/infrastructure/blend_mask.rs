use crate::shared::frame::Frame;

/// Circle radius as a fraction of the shorter crop side.
const MASK_RADIUS: f64 = 0.45;
/// Edge softness (Gaussian sigma) as a fraction of the shorter crop side.
const MASK_SIGMA: f64 = 0.05;

/// Normalized 1D Gaussian kernel covering ±3 sigma.
pub fn gaussian_kernel_1d(sigma: f64) -> Vec<f32> {
    if sigma <= 0.0 {
        return vec![1.0];
    }
    let half = (sigma * 3.0).ceil() as usize;
    let mut kernel: Vec<f64> = (0..=2 * half)
        .map(|i| {
            let x = i as f64 - half as f64;
            (-x * x / (2.0 * sigma * sigma)).exp()
        })
        .collect();
    let sum: f64 = kernel.iter().sum();
    for v in &mut kernel {
        *v /= sum;
    }
    kernel.iter().map(|&v| v as f32).collect()
}

/// Separable blur of a single-channel `width` x `height` plane, edges
/// clamped.
fn blur_plane(plane: &mut [f32], width: usize, height: usize, kernel: &[f32]) {
    if kernel.len() <= 1 || width == 0 || height == 0 {
        return;
    }
    let half = kernel.len() / 2;
    let mut temp = vec![0.0f32; plane.len()];

    for y in 0..height {
        for x in 0..width {
            let mut sum = 0.0;
            for (k, &w) in kernel.iter().enumerate() {
                let sx = (x + k).saturating_sub(half).min(width - 1);
                sum += plane[y * width + sx] * w;
            }
            temp[y * width + x] = sum;
        }
    }
    for y in 0..height {
        for x in 0..width {
            let mut sum = 0.0;
            for (k, &w) in kernel.iter().enumerate() {
                let sy = (y + k).saturating_sub(half).min(height - 1);
                sum += temp[sy * width + x] * w;
            }
            plane[y * width + x] = sum;
        }
    }
}

/// Soft circular mask for a `width` x `height` crop: a filled circle at the
/// centre, blurred so the restored face fades into its surroundings.
/// Values are in `0.0..=1.0`, row-major.
pub fn circular_mask(width: u32, height: u32) -> Vec<f32> {
    let (w, h) = (width as usize, height as usize);
    let short = width.min(height) as f64;
    let radius = MASK_RADIUS * short;
    let (cx, cy) = (width as f64 / 2.0, height as f64 / 2.0);

    let mut mask = vec![0.0f32; w * h];
    for y in 0..h {
        for x in 0..w {
            let dx = x as f64 + 0.5 - cx;
            let dy = y as f64 + 0.5 - cy;
            if dx * dx + dy * dy <= radius * radius {
                mask[y * w + x] = 1.0;
            }
        }
    }
    blur_plane(&mut mask, w, h, &gaussian_kernel_1d(MASK_SIGMA * short));
    mask
}

/// Copies the `w` x `h` rectangle at `(x, y)` out of `frame`.
pub fn crop_region(frame: &Frame, x: u32, y: u32, w: u32, h: u32) -> Frame {
    let channels = frame.channels() as usize;
    let row_bytes = w as usize * channels;
    let frame_w = frame.width() as usize;
    let mut data = vec![0u8; row_bytes * h as usize];
    for row in 0..h as usize {
        let src = ((y as usize + row) * frame_w + x as usize) * channels;
        data[row * row_bytes..(row + 1) * row_bytes]
            .copy_from_slice(&frame.data()[src..src + row_bytes]);
    }
    Frame::new(data, w, h, frame.channels(), frame.index())
}

/// Blends `patch` into `frame` at `(x, y)`: `frame = frame·(1−m) + patch·m`
/// with `mask` sized like the patch.
pub fn blend_region(frame: &mut Frame, x: u32, y: u32, patch: &Frame, mask: &[f32]) {
    let channels = frame.channels() as usize;
    let frame_w = frame.width() as usize;
    let pw = patch.width() as usize;
    let ph = patch.height() as usize;
    let data = frame.data_mut();
    for row in 0..ph {
        for col in 0..pw {
            let m = mask[row * pw + col];
            if m <= 0.0 {
                continue;
            }
            let dst = ((y as usize + row) * frame_w + x as usize + col) * channels;
            let src = (row * pw + col) * channels;
            for c in 0..channels {
                let base = data[dst + c] as f32;
                let top = patch.data()[src + c] as f32;
                data[dst + c] = (base + (top - base) * m).round().clamp(0.0, 255.0) as u8;
            }
        }
    }
}
