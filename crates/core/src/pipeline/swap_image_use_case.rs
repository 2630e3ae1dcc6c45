use std::path::Path;
use std::sync::Arc;

use crate::detection::domain::face_detector::FaceDetector;
use crate::detection::domain::face_embedder::FaceEmbedder;
use crate::detection::domain::reference_face::{read_reference_image, ReferenceFace};
use crate::pipeline::transform_stage::swap_faces;
use crate::swapping::domain::face_enhancer::FaceEnhancer;
use crate::swapping::domain::face_transformer::FaceTransformer;
use crate::video::domain::image_reader::ImageReader;
use crate::video::domain::image_writer::ImageWriter;

/// Single-image swap: read reference → read target → detect → swap → write.
///
/// Detection runs at full resolution on both images; there is no cadence to
/// amortise.
pub struct SwapImageUseCase {
    reader: Box<dyn ImageReader>,
    writer: Box<dyn ImageWriter>,
    detector: Box<dyn FaceDetector>,
    embedder: Box<dyn FaceEmbedder>,
    transformer: Arc<dyn FaceTransformer>,
    enhancer: Option<Arc<dyn FaceEnhancer>>,
}

impl SwapImageUseCase {
    pub fn new(
        reader: Box<dyn ImageReader>,
        writer: Box<dyn ImageWriter>,
        detector: Box<dyn FaceDetector>,
        embedder: Box<dyn FaceEmbedder>,
        transformer: Arc<dyn FaceTransformer>,
        enhancer: Option<Arc<dyn FaceEnhancer>>,
    ) -> Self {
        Self {
            reader,
            writer,
            detector,
            embedder,
            transformer,
            enhancer,
        }
    }

    /// Returns the number of faces found in the target. The output is
    /// written even when there are none.
    pub fn execute(
        &mut self,
        reference_path: &Path,
        input_path: &Path,
        output_path: &Path,
    ) -> Result<usize, Box<dyn std::error::Error>> {
        let reference_image = read_reference_image(self.reader.as_ref(), reference_path)?;
        let reference = ReferenceFace::from_image(
            &reference_image,
            self.detector.as_mut(),
            self.embedder.as_ref(),
        )?;

        let target = self.reader.read(input_path)?;
        let faces = self.detector.detect(&target)?;
        if faces.is_empty() {
            log::warn!("No faces found in {}", input_path.display());
        }

        let output = swap_faces(
            &target,
            &faces,
            &reference,
            self.transformer.as_ref(),
            self.enhancer.as_deref(),
        );
        self.writer.write(output_path, &output)?;
        log::info!(
            "Swapped {} face(s) into {}",
            faces.len(),
            output_path.display()
        );
        Ok(faces.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::domain::face_descriptor::{BoundingBox, FaceDescriptor};
    use crate::detection::domain::reference_face::ReferenceFaceError;
    use crate::shared::frame::Frame;
    use crate::swapping::domain::face_transformer::ServiceError;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::sync::Mutex;

    // --- Stubs ---

    struct StubReader {
        images: HashMap<PathBuf, Frame>,
    }

    impl ImageReader for StubReader {
        fn read(&self, path: &Path) -> Result<Frame, Box<dyn std::error::Error>> {
            self.images
                .get(path)
                .cloned()
                .ok_or_else(|| format!("cannot open {}", path.display()).into())
        }
    }

    struct StubWriter {
        written: Arc<Mutex<Vec<(PathBuf, Frame)>>>,
    }

    impl ImageWriter for StubWriter {
        fn write(&self, path: &Path, frame: &Frame) -> Result<(), Box<dyn std::error::Error>> {
            self.written
                .lock()
                .unwrap()
                .push((path.to_path_buf(), frame.clone()));
            Ok(())
        }
    }

    /// Returns `count` faces for frames whose first byte is non-zero.
    struct StubDetector {
        count: usize,
    }

    impl FaceDetector for StubDetector {
        fn detect(
            &mut self,
            frame: &Frame,
        ) -> Result<Vec<FaceDescriptor>, Box<dyn std::error::Error>> {
            if frame.data()[0] == 0 {
                return Ok(vec![]);
            }
            Ok((0..self.count)
                .map(|i| {
                    let x = i as f64 * 3.0;
                    FaceDescriptor::new(BoundingBox::new(x, 0.0, x + 2.0, 2.0), None, 0.9)
                })
                .collect())
        }
    }

    struct StubEmbedder;

    impl FaceEmbedder for StubEmbedder {
        fn embed(
            &self,
            _frame: &Frame,
            _face: &FaceDescriptor,
        ) -> Result<Vec<f32>, Box<dyn std::error::Error>> {
            Ok(vec![0.5; 4])
        }
    }

    /// Counts applications in the last byte.
    struct CountingTransformer;

    impl FaceTransformer for CountingTransformer {
        fn transform(
            &self,
            frame: &Frame,
            _face: &FaceDescriptor,
            _reference: &ReferenceFace,
        ) -> Result<Frame, ServiceError> {
            let mut out = frame.clone();
            let last = out.data().len() - 1;
            out.data_mut()[last] += 1;
            Ok(out)
        }
    }

    struct BrighteningEnhancer;

    impl FaceEnhancer for BrighteningEnhancer {
        fn enhance(&self, frame: &Frame, _faces: &[FaceDescriptor]) -> Result<Frame, ServiceError> {
            let mut out = frame.clone();
            out.data_mut()[1] = 255;
            Ok(out)
        }
    }

    fn image(first: u8) -> Frame {
        let mut data = vec![first; 8 * 4 * 3];
        let last = data.len() - 1;
        data[last] = 0;
        Frame::new(data, 8, 4, 3, 0)
    }

    fn use_case(
        target: Frame,
        faces: usize,
        enhancer: Option<Arc<dyn FaceEnhancer>>,
    ) -> (SwapImageUseCase, Arc<Mutex<Vec<(PathBuf, Frame)>>>) {
        let images = HashMap::from([
            (PathBuf::from("ref.png"), image(9)),
            (PathBuf::from("in.png"), target),
        ]);
        let written = Arc::new(Mutex::new(Vec::new()));
        let uc = SwapImageUseCase::new(
            Box::new(StubReader { images }),
            Box::new(StubWriter {
                written: Arc::clone(&written),
            }),
            Box::new(StubDetector { count: faces }),
            Box::new(StubEmbedder),
            Arc::new(CountingTransformer),
            enhancer,
        );
        (uc, written)
    }

    fn run(uc: &mut SwapImageUseCase, input: &str) -> Result<usize, Box<dyn std::error::Error>> {
        uc.execute(Path::new("ref.png"), Path::new(input), Path::new("out.png"))
    }

    // --- Tests ---

    #[test]
    fn test_every_face_is_swapped() {
        let (mut uc, written) = use_case(image(1), 2, None);
        assert_eq!(run(&mut uc, "in.png").unwrap(), 2);

        let written = written.lock().unwrap();
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].0, PathBuf::from("out.png"));
        assert_eq!(*written[0].1.data().last().unwrap(), 2);
    }

    #[test]
    fn test_enhancer_runs_after_swap() {
        let (mut uc, written) = use_case(image(1), 1, Some(Arc::new(BrighteningEnhancer)));
        run(&mut uc, "in.png").unwrap();
        assert_eq!(written.lock().unwrap()[0].1.data()[1], 255);
    }

    #[test]
    fn test_image_without_faces_is_written_unchanged() {
        let (mut uc, written) = use_case(image(0), 2, Some(Arc::new(BrighteningEnhancer)));
        assert_eq!(run(&mut uc, "in.png").unwrap(), 0);
        assert_eq!(written.lock().unwrap()[0].1, image(0));
    }

    #[test]
    fn test_missing_input_fails_before_writing() {
        let (mut uc, written) = use_case(image(1), 1, None);
        let err = run(&mut uc, "nope.png").unwrap_err();
        assert!(err.to_string().contains("nope.png"));
        assert!(written.lock().unwrap().is_empty());
    }

    #[test]
    fn test_reference_without_face_fails() {
        let (mut uc, written) = use_case(image(1), 0, None);
        let err = run(&mut uc, "in.png").unwrap_err();
        assert!(err.to_string().contains("no face"));
        assert!(written.lock().unwrap().is_empty());
    }

    #[test]
    fn test_unreadable_reference_is_reported_as_such() {
        let (mut uc, written) = use_case(image(1), 1, None);
        let err = uc
            .execute(Path::new("absent.png"), Path::new("in.png"), Path::new("out.png"))
            .unwrap_err();
        let err = err.downcast::<ReferenceFaceError>().unwrap();
        assert!(matches!(*err, ReferenceFaceError::Unreadable(ref m) if m.contains("absent.png")));
        assert!(written.lock().unwrap().is_empty());
    }
}
