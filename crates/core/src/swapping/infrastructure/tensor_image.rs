//! Conversions between RGB frames and NCHW float tensors.

use ndarray::{Array4, ArrayViewD};

use crate::shared::frame::Frame;
use crate::swapping::domain::face_transformer::ServiceError;

/// Packs an RGB frame into a `[1, 3, H, W]` tensor, mapping each byte
/// through `normalize`.
pub fn frame_to_nchw(frame: &Frame, normalize: impl Fn(u8) -> f32) -> Array4<f32> {
    let (h, w) = (frame.height() as usize, frame.width() as usize);
    let src = frame.as_ndarray();
    Array4::from_shape_fn((1, 3, h, w), |(_, c, y, x)| normalize(src[[y, x, c]]))
}

/// Unpacks a `[1, 3, H, W]` model output into an RGB frame. `denormalize`
/// maps each value to the 0..=255 range; results are rounded and clamped.
pub fn nchw_to_frame(
    tensor: &ArrayViewD<'_, f32>,
    denormalize: impl Fn(f32) -> f32,
    index: usize,
) -> Result<Frame, ServiceError> {
    let &[1, 3, h, w] = tensor.shape() else {
        return Err(format!(
            "expected a [1, 3, H, W] image tensor, got {:?}",
            tensor.shape()
        )
        .into());
    };
    let mut data = Vec::with_capacity(h * w * 3);
    for y in 0..h {
        for x in 0..w {
            for c in 0..3 {
                let v = denormalize(tensor[[0, c, y, x]]);
                data.push(v.round().clamp(0.0, 255.0) as u8);
            }
        }
    }
    Ok(Frame::new(data, w as u32, h as u32, 3, index))
}
