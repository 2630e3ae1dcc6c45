use crate::detection::domain::face_descriptor::FaceDescriptor;
use crate::shared::frame::Frame;

/// Domain interface for computing an identity embedding of one face.
pub trait FaceEmbedder: Send {
    fn embed(
        &self,
        frame: &Frame,
        face: &FaceDescriptor,
    ) -> Result<Vec<f32>, Box<dyn std::error::Error>>;
}
