use crate::detection::domain::face_descriptor::FaceDescriptor;
use crate::shared::frame::Frame;

/// Domain interface for face detection.
///
/// Descriptors are returned in the coordinate space of `frame`.
/// Implementations may keep per-session state, hence `&mut self`.
pub trait FaceDetector: Send {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<FaceDescriptor>, Box<dyn std::error::Error>>;
}
