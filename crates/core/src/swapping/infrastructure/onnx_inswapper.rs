/// Identity swapper backed by an inswapper ONNX model.
///
/// The target face is aligned onto the ArcFace template at the model's input
/// resolution, swapped against the reference latent and pasted back with a
/// feathered edge.
use std::path::Path;

use ndarray::{Array2, ArrayView1};

use crate::detection::domain::face_descriptor::FaceDescriptor;
use crate::detection::domain::reference_face::ReferenceFace;
use crate::detection::infrastructure::arcface_embedder::l2_normalize;
use crate::detection::infrastructure::face_alignment::{
    alignment_transform, paste_back, warp_crop,
};
use crate::shared::frame::Frame;
use crate::shared::session_pool::SessionPool;
use crate::swapping::domain::face_transformer::{FaceTransformer, ServiceError};

use super::tensor_image::{frame_to_nchw, nchw_to_frame};

const DEFAULT_INPUT_SIZE: u32 = 128;

/// Seam width as a fraction of the aligned crop size.
const FEATHER: f64 = 0.1;

pub struct OnnxInswapper {
    sessions: SessionPool,
    input_size: u32,
    emap: Option<Array2<f32>>,
}

impl OnnxInswapper {
    /// Loads `pool_size` sessions so that many workers can swap at once.
    pub fn new(model_path: &Path, pool_size: usize) -> Result<Self, Box<dyn std::error::Error>> {
        let sessions = SessionPool::load(model_path, pool_size)?;
        let input_size = sessions.input_size().unwrap_or(DEFAULT_INPUT_SIZE);
        Ok(Self {
            sessions,
            input_size,
            emap: None,
        })
    }

    /// Projects reference embeddings through an `N`x`N` matrix before
    /// swapping. The file holds `N*N` little-endian `f32` values, row-major.
    pub fn with_emap_file(mut self, path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let bytes = std::fs::read(path)
            .map_err(|e| format!("cannot read emap {}: {e}", path.display()))?;
        self.emap = Some(parse_emap(&bytes)?);
        Ok(self)
    }
}

impl FaceTransformer for OnnxInswapper {
    fn transform(
        &self,
        frame: &Frame,
        face: &FaceDescriptor,
        reference: &ReferenceFace,
    ) -> Result<Frame, ServiceError> {
        let to_crop = face
            .landmarks
            .as_ref()
            .and_then(|lm| alignment_transform(lm, self.input_size))
            .ok_or("face has no usable landmarks")?;
        let crop = warp_crop(frame, &to_crop, self.input_size).ok_or("degenerate face alignment")?;

        let target = frame_to_nchw(&crop, |v| v as f32 / 255.0);
        let latent = project_latent(reference.embedding(), self.emap.as_ref())?;
        let source = Array2::from_shape_vec((1, latent.len()), latent)?;

        let swapped = {
            let mut session = self.sessions.acquire()?;
            let outputs = session.run(ort::inputs![
                ort::value::Tensor::from_array(target)?,
                ort::value::Tensor::from_array(source)?
            ])?;
            let tensor = outputs[0].try_extract_array::<f32>()?;
            nchw_to_frame(&tensor, |v| v * 255.0, frame.index())?
        };

        let mut out = frame.clone();
        paste_back(&mut out, &swapped, &to_crop, self.input_size as f64 * FEATHER);
        Ok(out)
    }
}

/// Reference latent fed to the swapper: the embedding, optionally projected
/// through `emap`, L2-normalized.
fn project_latent(embedding: &[f32], emap: Option<&Array2<f32>>) -> Result<Vec<f32>, ServiceError> {
    let mut latent = match emap {
        Some(emap) => {
            if emap.nrows() != embedding.len() {
                return Err(format!(
                    "embedding has {} values, emap expects {}",
                    embedding.len(),
                    emap.nrows()
                )
                .into());
            }
            ArrayView1::from(embedding).dot(emap).to_vec()
        }
        None => embedding.to_vec(),
    };
    l2_normalize(&mut latent);
    Ok(latent)
}

fn parse_emap(bytes: &[u8]) -> Result<Array2<f32>, Box<dyn std::error::Error>> {
    let values: Vec<f32> = bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();
    let n = (values.len() as f64).sqrt() as usize;
    if bytes.len() % 4 != 0 || n == 0 || n * n != values.len() {
        return Err(format!("emap of {} bytes is not a square f32 matrix", bytes.len()).into());
    }
    Ok(Array2::from_shape_vec((n, n), values)?)
}
