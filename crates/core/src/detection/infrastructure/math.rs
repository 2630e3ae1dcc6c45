//! Box geometry shared by the detection backends.

use crate::detection::domain::face_descriptor::{BoundingBox, FaceDescriptor};

/// Intersection over union of two boxes.
pub fn iou(a: &BoundingBox, b: &BoundingBox) -> f64 {
    let x1 = a.x1.max(b.x1);
    let y1 = a.y1.max(b.y1);
    let x2 = a.x2.min(b.x2);
    let y2 = a.y2.min(b.y2);

    let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    if inter == 0.0 {
        return 0.0;
    }
    inter / (a.area() + b.area() - inter)
}

/// Greedy non-maximum suppression: highest score first, dropping any later
/// face overlapping a kept one by more than `iou_thresh`.
pub fn nms(mut faces: Vec<FaceDescriptor>, iou_thresh: f64) -> Vec<FaceDescriptor> {
    faces.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<FaceDescriptor> = Vec::with_capacity(faces.len());
    for face in faces {
        if keep.iter().all(|k| iou(&k.bbox, &face.bbox) <= iou_thresh) {
            keep.push(face);
        }
    }
    keep
}
