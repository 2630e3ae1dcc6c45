pub mod arcface_embedder;
pub mod face_alignment;
pub mod math;
pub mod onnx_yolo_detector;
