/// ArcFace identity embedder using ONNX Runtime.
///
/// Faces with a full set of landmarks are aligned onto the ArcFace template;
/// others fall back to a plain resize of the bounding box.
use std::path::Path;

use crate::detection::domain::face_descriptor::FaceDescriptor;
use crate::detection::domain::face_embedder::FaceEmbedder;
use crate::shared::frame::Frame;
use crate::shared::session_pool::SessionPool;

use super::face_alignment::{alignment_transform, warp_crop};

const INPUT_SIZE: u32 = 112;
const NORM_MEAN: f32 = 127.5;
const NORM_STD: f32 = 127.5;

pub struct ArcFaceEmbedder {
    sessions: SessionPool,
}

impl ArcFaceEmbedder {
    pub fn new(model_path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        Ok(Self {
            sessions: SessionPool::load(model_path, 1)?,
        })
    }
}

impl FaceEmbedder for ArcFaceEmbedder {
    fn embed(
        &self,
        frame: &Frame,
        face: &FaceDescriptor,
    ) -> Result<Vec<f32>, Box<dyn std::error::Error>> {
        let crop = face_crop(frame, face).ok_or("face lies outside the image")?;
        let tensor = preprocess(&crop);
        let input_value = ort::value::Tensor::from_array(tensor)?;

        let mut session = self
            .sessions
            .acquire()
            .map_err(|e| e as Box<dyn std::error::Error>)?;
        let outputs = session.run(ort::inputs![input_value])?;
        let embedding_array = outputs[0].try_extract_array::<f32>()?;
        let mut embedding = embedding_array
            .as_slice()
            .ok_or("Cannot get embedding slice")?
            .to_vec();
        l2_normalize(&mut embedding);
        Ok(embedding)
    }
}

/// 112x112 crop of the face, aligned when landmarks allow it.
fn face_crop(frame: &Frame, face: &FaceDescriptor) -> Option<Frame> {
    if let Some(transform) = face
        .landmarks
        .as_ref()
        .and_then(|lm| alignment_transform(lm, INPUT_SIZE))
    {
        return warp_crop(frame, &transform, INPUT_SIZE);
    }
    let (x, y, w, h) = face.bbox.padded_roi(0.0, frame.width(), frame.height())?;
    let image = frame.to_rgb_image()?;
    let cropped = image::imageops::crop_imm(&image, x, y, w, h).to_image();
    let resized = image::imageops::resize(
        &cropped,
        INPUT_SIZE,
        INPUT_SIZE,
        image::imageops::FilterType::Triangle,
    );
    Some(Frame::from_rgb_image(resized, frame.index()))
}

/// RGB crop → normalized NCHW tensor.
fn preprocess(crop: &Frame) -> ndarray::Array4<f32> {
    let (h, w) = (crop.height() as usize, crop.width() as usize);
    let src = crop.as_ndarray();
    ndarray::Array4::from_shape_fn((1, 3, h, w), |(_, c, y, x)| {
        (src[[y, x, c]] as f32 - NORM_MEAN) / NORM_STD
    })
}

pub fn l2_normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Dot product of L2-normalized vectors equals cosine similarity.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (*x as f64) * (*y as f64))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::domain::face_descriptor::BoundingBox;
    use crate::detection::domain::face_landmarks::FaceLandmarks;
    use crate::detection::infrastructure::face_alignment::ARCFACE_TEMPLATE;
    use approx::assert_relative_eq;

    #[test]
    fn test_l2_normalize_unit_vector() {
        let mut v = vec![3.0, 4.0];
        l2_normalize(&mut v);
        assert_relative_eq!(v[0], 0.6, epsilon = 1e-6);
        assert_relative_eq!(v[1], 0.8, epsilon = 1e-6);
    }

    #[test]
    fn test_l2_normalize_zero_vector() {
        let mut v = vec![0.0, 0.0, 0.0];
        l2_normalize(&mut v);
        assert_eq!(v, vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_cosine_similarity() {
        assert_relative_eq!(cosine_similarity(&[0.6, 0.8], &[0.6, 0.8]), 1.0, epsilon = 1e-6);
        assert_relative_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
    }

    #[test]
    fn test_preprocess_normalization_range() {
        let dark = preprocess(&Frame::new(vec![0u8; 112 * 112 * 3], 112, 112, 3, 0));
        let bright = preprocess(&Frame::new(vec![255u8; 112 * 112 * 3], 112, 112, 3, 0));
        assert_eq!(dark.shape(), &[1, 3, 112, 112]);
        assert_relative_eq!(dark[[0, 0, 0, 0]], -1.0, epsilon = 0.01);
        assert_relative_eq!(bright[[0, 2, 111, 111]], 1.0, epsilon = 0.01);
    }

    #[test]
    fn test_face_crop_without_landmarks_resizes_box() {
        let frame = Frame::new(vec![90u8; 200 * 100 * 3], 200, 100, 3, 4);
        let face = FaceDescriptor::new(BoundingBox::new(20.0, 10.0, 80.0, 90.0), None, 0.9);
        let crop = face_crop(&frame, &face).unwrap();
        assert_eq!((crop.width(), crop.height()), (112, 112));
        assert_eq!(crop.index(), 4);
        assert!(crop.data().iter().all(|&v| v == 90));
    }

    #[test]
    fn test_face_crop_with_template_landmarks_is_identity_warp() {
        let mut data = vec![0u8; 112 * 112 * 3];
        data[(60 * 112 + 50) * 3] = 255;
        let frame = Frame::new(data, 112, 112, 3, 0);
        let face = FaceDescriptor::new(
            BoundingBox::new(0.0, 0.0, 112.0, 112.0),
            Some(FaceLandmarks::new(ARCFACE_TEMPLATE)),
            0.9,
        );
        let crop = face_crop(&frame, &face).unwrap();
        assert_eq!(crop.data()[(60 * 112 + 50) * 3], 255);
    }

    #[test]
    fn test_face_crop_outside_image() {
        let frame = Frame::new(vec![0u8; 10 * 10 * 3], 10, 10, 3, 0);
        let face = FaceDescriptor::new(BoundingBox::new(50.0, 50.0, 60.0, 60.0), None, 0.9);
        assert!(face_crop(&frame, &face).is_none());
    }
}
