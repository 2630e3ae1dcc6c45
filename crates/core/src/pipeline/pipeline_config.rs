use std::time::Duration;

use thiserror::Error;

use crate::detection::domain::periodic_detection::{
    DEFAULT_DETECTION_SCALE, DEFAULT_MAX_FAILED_DETECTIONS,
};

/// Upper bound for the default worker count. Every extra worker adds one
/// frame of mandatory reorder-buffer depth, so more is not free.
pub const MAX_DEFAULT_WORKERS: usize = 5;
pub const DEFAULT_DETECTION_INTERVAL: usize = 5;
pub const DEFAULT_CAPTURE_FPS: f64 = 30.0;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("worker count must be >= 1, got {0}")]
    WorkerCount(usize),
    #[error("detection interval must be >= 1, got {0}")]
    DetectionInterval(usize),
    #[error("capture rate must be a positive number of frames per second, got {0}")]
    CaptureFps(f64),
    #[error("detection scale must be in (0, 1], got {0}")]
    DetectionScale(f64),
}

/// Per-run pipeline settings, read once at startup.
#[derive(Clone, Debug, PartialEq)]
pub struct PipelineConfig {
    pub worker_count: usize,
    /// Frames between forced re-detections.
    pub detection_interval: usize,
    pub capture_fps: f64,
    pub detection_scale: f64,
    pub max_failed_detections: usize,
    pub enhance: bool,
    pub transform_enabled: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            detection_interval: DEFAULT_DETECTION_INTERVAL,
            capture_fps: DEFAULT_CAPTURE_FPS,
            detection_scale: DEFAULT_DETECTION_SCALE,
            max_failed_detections: DEFAULT_MAX_FAILED_DETECTIONS,
            enhance: false,
            transform_enabled: true,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_count < 1 {
            return Err(ConfigError::WorkerCount(self.worker_count));
        }
        if self.detection_interval < 1 {
            return Err(ConfigError::DetectionInterval(self.detection_interval));
        }
        if !(self.capture_fps.is_finite() && self.capture_fps > 0.0) {
            return Err(ConfigError::CaptureFps(self.capture_fps));
        }
        if !(self.detection_scale > 0.0 && self.detection_scale <= 1.0) {
            return Err(ConfigError::DetectionScale(self.detection_scale));
        }
        Ok(())
    }

    /// Reorder-buffer depth: every worker busy plus one slot.
    pub fn queue_capacity(&self) -> usize {
        self.worker_count + 1
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.capture_fps)
    }
}

/// `min(available parallelism, MAX_DEFAULT_WORKERS)`, assuming 4 cores when
/// the platform cannot tell.
pub fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
        .min(MAX_DEFAULT_WORKERS)
}
