use std::sync::Arc;

use crate::detection::domain::face_descriptor::FaceDescriptor;
use crate::detection::domain::reference_face::ReferenceFace;
use crate::pipeline::infrastructure::worker_pool::{PendingTask, WorkerPool};
use crate::shared::frame::Frame;
use crate::swapping::domain::face_enhancer::FaceEnhancer;
use crate::swapping::domain::face_transformer::FaceTransformer;

/// Turns (frame, faces, reference) triples into pending transform tasks on
/// the worker pool.
pub struct TransformStage {
    pool: WorkerPool,
    transformer: Arc<dyn FaceTransformer>,
    enhancer: Option<Arc<dyn FaceEnhancer>>,
}

impl TransformStage {
    pub fn new(
        pool: WorkerPool,
        transformer: Arc<dyn FaceTransformer>,
        enhancer: Option<Arc<dyn FaceEnhancer>>,
    ) -> Self {
        Self {
            pool,
            transformer,
            enhancer,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.pool.size()
    }

    /// Submits one transform. With no reference the result is the input
    /// frame, already resolved, and no worker is used.
    pub fn submit(
        &self,
        frame: &Arc<Frame>,
        faces: &Arc<[FaceDescriptor]>,
        reference: Option<&Arc<ReferenceFace>>,
    ) -> PendingTask {
        let Some(reference) = reference else {
            return PendingTask::completed(frame.as_ref().clone());
        };

        let frame = Arc::clone(frame);
        let faces = Arc::clone(faces);
        let reference = Arc::clone(reference);
        let transformer = Arc::clone(&self.transformer);
        let enhancer = self.enhancer.clone();
        self.pool.submit(move || {
            Ok(swap_faces(
                &frame,
                &faces,
                &reference,
                transformer.as_ref(),
                enhancer.as_deref(),
            ))
        })
    }
}

/// Applies `transformer` to every face in turn, then `enhancer` once if any
/// face was actually swapped.
///
/// Per-face failures skip that face. An enhancer failure keeps the swapped
/// frame. Never fails as a whole.
pub fn swap_faces(
    frame: &Frame,
    faces: &[FaceDescriptor],
    reference: &ReferenceFace,
    transformer: &dyn FaceTransformer,
    enhancer: Option<&dyn FaceEnhancer>,
) -> Frame {
    let mut current = frame.clone();
    let mut swapped: Vec<FaceDescriptor> = Vec::with_capacity(faces.len());

    for face in faces {
        match transformer.transform(&current, face, reference) {
            Ok(out) => {
                current = out;
                swapped.push(face.clone());
            }
            Err(e) => log::debug!("Skipping face on frame {}: {e}", frame.index()),
        }
    }

    if swapped.is_empty() {
        return current;
    }

    if let Some(enhancer) = enhancer {
        match enhancer.enhance(&current, &swapped) {
            Ok(out) => current = out,
            Err(e) => log::debug!("Enhancement failed on frame {}: {e}", frame.index()),
        }
    }
    current
}
