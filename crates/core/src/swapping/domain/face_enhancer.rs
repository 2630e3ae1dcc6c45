use crate::detection::domain::face_descriptor::FaceDescriptor;
use crate::shared::frame::Frame;

use super::face_transformer::ServiceError;

/// Domain interface for a whole-frame restoration pass over swapped faces.
///
/// Callers treat a failure as "keep the input frame".
pub trait FaceEnhancer: Send + Sync {
    fn enhance(&self, frame: &Frame, faces: &[FaceDescriptor]) -> Result<Frame, ServiceError>;
}
