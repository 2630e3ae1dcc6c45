use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use ort::session::Session;

use crate::swapping::domain::face_transformer::ServiceError;

/// Preferred ONNX execution providers for the current platform.
///
/// ort falls back to CPU if the platform provider is unavailable.
pub fn preferred_execution_providers() -> Vec<ort::execution_providers::ExecutionProviderDispatch> {
    #[cfg(target_os = "macos")]
    {
        vec![ort::execution_providers::CoreMLExecutionProvider::default().build()]
    }
    #[cfg(target_os = "windows")]
    {
        vec![ort::execution_providers::DirectMLExecutionProvider::default().build()]
    }
    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    {
        vec![]
    }
}

/// Several sessions over one model so concurrent workers can run inference
/// in parallel.
///
/// `Session::run` needs `&mut Session`, so each session sits behind its own
/// mutex. `acquire` takes the first free session starting from a rotating
/// offset and only blocks when every session is busy.
pub struct SessionPool {
    sessions: Vec<Mutex<Session>>,
    next: AtomicUsize,
    input_size: Option<u32>,
}

impl SessionPool {
    /// Loads `size` sessions of the model at `model_path`. Intra-op threads
    /// are split between sessions so the pool does not oversubscribe cores.
    pub fn load(model_path: &Path, size: usize) -> Result<Self, Box<dyn std::error::Error>> {
        let size = size.max(1);
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let intra_threads = (cores / size).max(1);

        let mut sessions = Vec::with_capacity(size);
        for _ in 0..size {
            let session = Session::builder()?
                .with_optimization_level(ort::session::builder::GraphOptimizationLevel::Level3)?
                .with_inter_threads(1)?
                .with_intra_threads(intra_threads)?
                .with_execution_providers(preferred_execution_providers())?
                .commit_from_file(model_path)?;
            sessions.push(Mutex::new(session));
        }

        let input_shape = sessions
            .first()
            .and_then(|s| s.lock().ok().and_then(|s| first_input_shape(&s)))
            .unwrap_or_default();

        log::debug!(
            "Loaded {} x {} (input {:?}, {intra_threads} threads each)",
            size,
            model_path.display(),
            input_shape
        );
        Ok(Self {
            sessions,
            next: AtomicUsize::new(0),
            input_size: square_input_size(&input_shape),
        })
    }

    pub fn size(&self) -> usize {
        self.sessions.len()
    }

    /// Square spatial size of an NCHW input, if the model fixes it.
    pub fn input_size(&self) -> Option<u32> {
        self.input_size
    }

    pub fn acquire(&self) -> Result<MutexGuard<'_, Session>, ServiceError> {
        let n = self.sessions.len();
        let start = self.next.fetch_add(1, Ordering::Relaxed) % n;
        for offset in 0..n {
            if let Ok(guard) = self.sessions[(start + offset) % n].try_lock() {
                return Ok(guard);
            }
        }
        self.sessions[start]
            .lock()
            .map_err(|e| format!("inference session poisoned: {e}").into())
    }
}

/// Dynamic dimensions are negative.
fn square_input_size(shape: &[i64]) -> Option<u32> {
    match shape {
        [_, _, h, _] if *h > 0 => Some(*h as u32),
        _ => None,
    }
}

fn first_input_shape(session: &Session) -> Option<Vec<i64>> {
    let input = session.inputs().first()?;
    if let ort::value::ValueType::Tensor { ref shape, .. } = input.dtype() {
        Some(shape.iter().copied().collect())
    } else {
        None
    }
}
