/// Face restoration backed by a GFPGAN ONNX model.
///
/// Each face's box is padded, restored at the model resolution and blended
/// back through a soft circular mask.
use std::path::Path;

use crate::detection::domain::face_descriptor::FaceDescriptor;
use crate::shared::frame::Frame;
use crate::shared::session_pool::SessionPool;
use crate::swapping::domain::face_enhancer::FaceEnhancer;
use crate::swapping::domain::face_transformer::ServiceError;

use super::blend_mask::{blend_region, circular_mask, crop_region};
use super::tensor_image::{frame_to_nchw, nchw_to_frame};

const DEFAULT_INPUT_SIZE: u32 = 512;

/// Box padding on every side, as a fraction of the box size.
const CROP_PADDING: f64 = 0.5;

pub struct OnnxGfpganEnhancer {
    sessions: SessionPool,
    input_size: u32,
}

impl OnnxGfpganEnhancer {
    pub fn new(model_path: &Path, pool_size: usize) -> Result<Self, Box<dyn std::error::Error>> {
        let sessions = SessionPool::load(model_path, pool_size)?;
        let input_size = sessions.input_size().unwrap_or(DEFAULT_INPUT_SIZE);
        Ok(Self {
            sessions,
            input_size,
        })
    }

    /// Restores one crop and returns it at the crop's own size.
    fn restore(&self, crop: &Frame) -> Result<Frame, ServiceError> {
        let model_input = crop
            .resized(self.input_size, self.input_size)
            .ok_or("face crop is not RGB")?;
        let tensor = frame_to_nchw(&model_input, normalize);

        let restored = {
            let mut session = self.sessions.acquire()?;
            let outputs = session.run(ort::inputs![ort::value::Tensor::from_array(tensor)?])?;
            let output = outputs[0].try_extract_array::<f32>()?;
            nchw_to_frame(&output, denormalize, crop.index())?
        };
        restored
            .resized(crop.width(), crop.height())
            .ok_or_else(|| "restored face is not RGB".into())
    }
}

impl FaceEnhancer for OnnxGfpganEnhancer {
    fn enhance(&self, frame: &Frame, faces: &[FaceDescriptor]) -> Result<Frame, ServiceError> {
        let mut out = frame.clone();
        for face in faces {
            let Some((x, y, w, h)) = face
                .bbox
                .padded_roi(CROP_PADDING, frame.width(), frame.height())
            else {
                continue;
            };
            let crop = crop_region(&out, x, y, w, h);
            let restored = self.restore(&crop)?;
            blend_region(&mut out, x, y, &restored, &circular_mask(w, h));
        }
        Ok(out)
    }
}

/// `[0, 255]` → `[-1, 1]`.
fn normalize(v: u8) -> f32 {
    (v as f32 / 255.0 - 0.5) / 0.5
}

/// `[-1, 1]` → `[0, 255]`.
fn denormalize(v: f32) -> f32 {
    (v.clamp(-1.0, 1.0) * 0.5 + 0.5) * 255.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rstest::rstest;

    #[rstest]
    #[case(0, -1.0)]
    #[case(255, 1.0)]
    #[case(51, -0.6)]
    fn test_normalize(#[case] input: u8, #[case] expected: f32) {
        assert_relative_eq!(normalize(input), expected, epsilon = 1e-6);
    }

    #[rstest]
    #[case(-1.0, 0.0)]
    #[case(1.0, 255.0)]
    #[case(0.0, 127.5)]
    #[case(3.0, 255.0)]
    fn test_denormalize_clamps(#[case] input: f32, #[case] expected: f32) {
        assert_relative_eq!(denormalize(input), expected, epsilon = 1e-4);
    }
}
