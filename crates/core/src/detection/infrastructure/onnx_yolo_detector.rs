/// YOLO face detector using ONNX Runtime via `ort`.
///
/// Handles letterbox preprocessing, inference, keypoint decoding and NMS.
use std::path::Path;

use ort::session::Session;

use crate::detection::domain::face_descriptor::{BoundingBox, FaceDescriptor};
use crate::detection::domain::face_detector::FaceDetector;
use crate::detection::domain::face_landmarks::FaceLandmarks;
use crate::shared::frame::Frame;
use crate::shared::session_pool::preferred_execution_providers;

use super::math::nms;

/// Fallback model input resolution when the model doesn't specify dimensions.
const DEFAULT_INPUT_SIZE: u32 = 640;

/// Default confidence threshold for face detection.
pub const DEFAULT_CONFIDENCE: f64 = 0.25;

const NMS_IOU_THRESH: f64 = 0.45;

/// 5 landmarks × (x, y, conf).
const NUM_KEYPOINT_VALUES: usize = 15;

/// Minimum keypoint confidence to treat a landmark as visible.
const KEYPOINT_CONF_THRESH: f64 = 0.5;

/// Letterbox gray, YOLO convention.
const PAD_VALUE: f32 = 114.0 / 255.0;

/// How a frame was fitted into the square model input.
#[derive(Clone, Copy, Debug, PartialEq)]
struct Letterbox {
    scale: f64,
    pad_x: u32,
    pad_y: u32,
}

impl Letterbox {
    fn to_frame(self, x: f64, y: f64) -> (f64, f64) {
        (
            (x - self.pad_x as f64) / self.scale,
            (y - self.pad_y as f64) / self.scale,
        )
    }
}

pub struct OnnxYoloDetector {
    session: Session,
    confidence: f64,
    input_size: u32,
}

impl OnnxYoloDetector {
    /// Loads a YOLO-face ONNX model. The input resolution is read from the
    /// model's NCHW input shape, falling back to 640 when it is dynamic.
    pub fn new(model_path: &Path, confidence: f64) -> Result<Self, Box<dyn std::error::Error>> {
        let session = Session::builder()?
            .with_execution_providers(preferred_execution_providers())?
            .commit_from_file(model_path)?;

        let input_size = session
            .inputs()
            .first()
            .and_then(|input| {
                if let ort::value::ValueType::Tensor { ref shape, .. } = input.dtype() {
                    (shape.len() >= 4 && shape[2] > 0).then(|| shape[2] as u32)
                } else {
                    None
                }
            })
            .unwrap_or(DEFAULT_INPUT_SIZE);

        Ok(Self {
            session,
            confidence,
            input_size,
        })
    }
}

impl FaceDetector for OnnxYoloDetector {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<FaceDescriptor>, Box<dyn std::error::Error>> {
        if frame.width() == 0 || frame.height() == 0 {
            return Ok(Vec::new());
        }
        let (input_tensor, fit) = letterbox(frame, self.input_size);

        let input_value = ort::value::Tensor::from_array(input_tensor)?;
        let outputs = self.session.run(ort::inputs![input_value])?;
        if outputs.len() == 0 {
            return Err("YOLO model produced no outputs".into());
        }
        let tensor = outputs[0].try_extract_array::<f32>()?;
        let shape = tensor.shape().to_vec();
        let data = tensor.as_slice().ok_or("Cannot get tensor slice")?;

        let faces = decode(data, &shape, self.confidence, fit, frame.width(), frame.height())?;
        Ok(nms(faces, NMS_IOU_THRESH))
    }
}

/// Letterbox-resize a frame into a `target_size` square NCHW tensor.
fn letterbox(frame: &Frame, target_size: u32) -> (ndarray::Array4<f32>, Letterbox) {
    let fw = frame.width() as f64;
    let fh = frame.height() as f64;
    let target = target_size as f64;

    let scale = (target / fw).min(target / fh);
    let new_w = ((fw * scale).round() as u32).min(target_size);
    let new_h = ((fh * scale).round() as u32).min(target_size);
    let pad_x = (target_size - new_w) / 2;
    let pad_y = (target_size - new_h) / 2;

    let size = target_size as usize;
    let mut tensor = ndarray::Array4::<f32>::from_elem((1, 3, size, size), PAD_VALUE);

    let src = frame.as_ndarray();
    let src_h = frame.height() as usize;
    let src_w = frame.width() as usize;

    // Nearest-neighbour resize into the padded area
    for y in 0..new_h as usize {
        let src_y = ((y as f64 / scale) as usize).min(src_h - 1);
        for x in 0..new_w as usize {
            let src_x = ((x as f64 / scale) as usize).min(src_w - 1);
            let ty = pad_y as usize + y;
            let tx = pad_x as usize + x;
            for c in 0..3 {
                tensor[[0, c, ty, tx]] = src[[src_y, src_x, c]] as f32 / 255.0;
            }
        }
    }

    (tensor, Letterbox { scale, pad_x, pad_y })
}

/// Decodes raw YOLO rows `[cx, cy, w, h, conf, kp0_x, kp0_y, kp0_conf, ...]`
/// into frame-space descriptors. Accepts `[1, features, detections]` and
/// `[1, detections, features]` layouts.
fn decode(
    data: &[f32],
    shape: &[usize],
    confidence: f64,
    fit: Letterbox,
    frame_w: u32,
    frame_h: u32,
) -> Result<Vec<FaceDescriptor>, Box<dyn std::error::Error>> {
    let [_, d1, d2] = shape else {
        return Err(format!("Unexpected YOLO output shape: {shape:?}").into());
    };
    let transposed = d1 < d2;
    let (num_dets, num_feats) = if transposed { (*d2, *d1) } else { (*d1, *d2) };
    if num_feats < 5 || data.len() < num_dets * num_feats {
        return Err(format!("YOLO output {shape:?} is too small").into());
    }
    let value = |det: usize, feat: usize| -> f64 {
        if transposed {
            data[feat * num_dets + det] as f64
        } else {
            data[det * num_feats + feat] as f64
        }
    };

    let mut faces = Vec::new();
    for i in 0..num_dets {
        let score = value(i, 4);
        if score < confidence {
            continue;
        }
        let (cx, cy, w, h) = (value(i, 0), value(i, 1), value(i, 2), value(i, 3));
        let (x1, y1) = fit.to_frame(cx - w / 2.0, cy - h / 2.0);
        let (x2, y2) = fit.to_frame(cx + w / 2.0, cy + h / 2.0);
        let bbox = BoundingBox::new(
            x1.clamp(0.0, frame_w as f64),
            y1.clamp(0.0, frame_h as f64),
            x2.clamp(0.0, frame_w as f64),
            y2.clamp(0.0, frame_h as f64),
        );
        if bbox.area() <= 0.0 {
            continue;
        }

        let landmarks = (num_feats >= 5 + NUM_KEYPOINT_VALUES).then(|| {
            let mut points = [(0.0f64, 0.0f64); 5];
            for (k, point) in points.iter_mut().enumerate() {
                let base = 5 + k * 3;
                // Low-confidence points stay at the origin, i.e. invisible
                if value(i, base + 2) >= KEYPOINT_CONF_THRESH {
                    *point = fit.to_frame(value(i, base), value(i, base + 1));
                }
            }
            FaceLandmarks::new(points)
        });

        faces.push(FaceDescriptor::new(bbox, landmarks, score));
    }
    Ok(faces)
}
