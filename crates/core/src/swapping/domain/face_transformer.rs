use crate::detection::domain::face_descriptor::FaceDescriptor;
use crate::detection::domain::reference_face::ReferenceFace;
use crate::shared::frame::Frame;

/// Error type for services invoked from worker threads.
pub type ServiceError = Box<dyn std::error::Error + Send + Sync>;

/// Domain interface for imposing the reference identity on one face.
///
/// Shared by every worker thread, hence `&self` and `Sync`. Returns a new
/// frame; the input is never modified.
pub trait FaceTransformer: Send + Sync {
    fn transform(
        &self,
        frame: &Frame,
        face: &FaceDescriptor,
        reference: &ReferenceFace,
    ) -> Result<Frame, ServiceError>;
}
