use std::path::Path;

use thiserror::Error;

use crate::detection::domain::face_descriptor::FaceDescriptor;
use crate::detection::domain::face_detector::FaceDetector;
use crate::detection::domain::face_embedder::FaceEmbedder;
use crate::shared::frame::Frame;
use crate::video::domain::image_reader::ImageReader;

#[derive(Error, Debug)]
pub enum ReferenceFaceError {
    #[error("failed to read reference image: {0}")]
    Unreadable(String),
    #[error("face detection failed on the reference image: {0}")]
    Detection(String),
    #[error("no face detected in the reference image")]
    NoFace,
    #[error("failed to compute identity embedding: {0}")]
    Embedding(String),
}

/// The identity imposed on every face in the stream.
///
/// Built once per reference image; shared read-only with every transform
/// task submitted while it is active.
#[derive(Clone, Debug, PartialEq)]
pub struct ReferenceFace {
    face: FaceDescriptor,
    embedding: Vec<f32>,
}

impl ReferenceFace {
    pub fn new(face: FaceDescriptor, embedding: Vec<f32>) -> Self {
        Self { face, embedding }
    }

    /// Detects faces in a still image at full resolution, keeps the largest
    /// and computes its identity embedding.
    pub fn from_image(
        image: &Frame,
        detector: &mut dyn FaceDetector,
        embedder: &dyn FaceEmbedder,
    ) -> Result<Self, ReferenceFaceError> {
        let faces = detector
            .detect(image)
            .map_err(|e| ReferenceFaceError::Detection(e.to_string()))?;
        let face = select_largest(&faces).ok_or(ReferenceFaceError::NoFace)?;
        let embedding = embedder
            .embed(image, face)
            .map_err(|e| ReferenceFaceError::Embedding(e.to_string()))?;
        log::info!(
            "Reference face selected ({} candidates, {:.0}x{:.0} px)",
            faces.len(),
            face.bbox.width(),
            face.bbox.height()
        );
        Ok(Self::new(face.clone(), embedding))
    }

    pub fn face(&self) -> &FaceDescriptor {
        &self.face
    }

    pub fn embedding(&self) -> &[f32] {
        &self.embedding
    }
}

pub fn read_reference_image(
    reader: &dyn ImageReader,
    path: &Path,
) -> Result<Frame, ReferenceFaceError> {
    reader
        .read(path)
        .map_err(|e| ReferenceFaceError::Unreadable(format!("{}: {e}", path.display())))
}

/// Largest face by bounding-box area; among equal areas the last one in
/// detection order wins.
pub fn select_largest(faces: &[FaceDescriptor]) -> Option<&FaceDescriptor> {
    faces.iter().max_by(|a, b| {
        a.area()
            .partial_cmp(&b.area())
            .unwrap_or(std::cmp::Ordering::Equal)
    })
}
