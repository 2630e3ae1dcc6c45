use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use faceswap_core::detection::domain::periodic_detection::{
    DEFAULT_DETECTION_SCALE, DEFAULT_MAX_FAILED_DETECTIONS,
};
use faceswap_core::detection::infrastructure::onnx_yolo_detector::DEFAULT_CONFIDENCE;
use faceswap_core::pipeline::pipeline_config::{
    default_worker_count, PipelineConfig, DEFAULT_CAPTURE_FPS, DEFAULT_DETECTION_INTERVAL,
};
use faceswap_core::shared::constants::APP_DIR_NAME;

/// Persistent defaults. Every field may be omitted from the file; command
/// line flags win over whatever is stored here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// `None` picks a worker count from the number of cores.
    pub workers: Option<usize>,
    pub detection_interval: usize,
    pub detection_scale: f64,
    pub max_failed_detections: usize,
    pub capture_fps: f64,
    pub confidence: f64,
    pub enhance: bool,
    pub reference: Option<PathBuf>,
    pub input_format: Option<String>,
    pub model_dir: Option<PathBuf>,
    pub detector_model: Option<PathBuf>,
    pub embedding_model: Option<PathBuf>,
    pub swap_model: Option<PathBuf>,
    pub enhance_model: Option<PathBuf>,
    pub emap: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            workers: None,
            detection_interval: DEFAULT_DETECTION_INTERVAL,
            detection_scale: DEFAULT_DETECTION_SCALE,
            max_failed_detections: DEFAULT_MAX_FAILED_DETECTIONS,
            capture_fps: DEFAULT_CAPTURE_FPS,
            confidence: DEFAULT_CONFIDENCE,
            enhance: false,
            reference: None,
            input_format: None,
            model_dir: None,
            detector_model: None,
            embedding_model: None,
            swap_model: None,
            enhance_model: None,
            emap: None,
        }
    }
}

impl Settings {
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join(APP_DIR_NAME).join("settings.json"))
    }

    /// Loads settings from `explicit`, which must exist and parse, or from
    /// the default location. A missing or unreadable default file yields
    /// the built-in defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self, Box<dyn std::error::Error>> {
        if let Some(path) = explicit {
            return Self::load_from(path);
        }
        let Some(path) = Self::default_path().filter(|p| p.is_file()) else {
            return Ok(Self::default());
        };
        match Self::load_from(&path) {
            Ok(settings) => Ok(settings),
            Err(e) => {
                log::warn!("Ignoring settings file: {e}");
                Ok(Self::default())
            }
        }
    }

    fn load_from(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let json = fs::read_to_string(path)
            .map_err(|e| format!("cannot read settings {}: {e}", path.display()))?;
        serde_json::from_str(&json)
            .map_err(|e| format!("invalid settings {}: {e}", path.display()).into())
    }

    pub fn save(&self, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn pipeline_config(&self, transform_enabled: bool) -> PipelineConfig {
        PipelineConfig {
            worker_count: self.workers.unwrap_or_else(default_worker_count),
            detection_interval: self.detection_interval,
            capture_fps: self.capture_fps,
            detection_scale: self.detection_scale,
            max_failed_detections: self.max_failed_detections,
            enhance: self.enhance,
            transform_enabled,
        }
    }
}
