mod settings;

use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use clap::Parser;
use crossbeam_channel::Sender;

use faceswap_core::detection::infrastructure::arcface_embedder::ArcFaceEmbedder;
use faceswap_core::detection::infrastructure::onnx_yolo_detector::OnnxYoloDetector;
use faceswap_core::pipeline::frame_dispatcher::FrameDispatcher;
use faceswap_core::pipeline::live_swap_use_case::{ControlEvent, LiveSwapUseCase};
use faceswap_core::pipeline::pipeline_logger::StdoutPipelineLogger;
use faceswap_core::pipeline::swap_image_use_case::SwapImageUseCase;
use faceswap_core::shared::constants::{
    BUNDLED_MODEL_DIR, EMBEDDING_MODEL_NAME, ENHANCE_MODEL_NAME, SWAP_MODEL_NAME,
    YOLO_MODEL_NAME, YOLO_MODEL_URL,
};
use faceswap_core::shared::model_resolver::{self, ModelResolveError, ModelSource};
use faceswap_core::swapping::domain::face_enhancer::FaceEnhancer;
use faceswap_core::swapping::infrastructure::onnx_gfpgan_enhancer::OnnxGfpganEnhancer;
use faceswap_core::swapping::infrastructure::onnx_inswapper::OnnxInswapper;
use faceswap_core::video::domain::frame_sink::FrameSink;
use faceswap_core::video::domain::video_reader::CaptureSource;
use faceswap_core::video::infrastructure::capture_stream::CaptureStream;
use faceswap_core::video::infrastructure::ffmpeg_reader::FfmpegReader;
use faceswap_core::video::infrastructure::ffmpeg_recorder::FfmpegRecorder;
use faceswap_core::video::infrastructure::image_file_reader::ImageFileReader;
use faceswap_core::video::infrastructure::image_file_writer::ImageFileWriter;
use faceswap_core::video::infrastructure::raw_video_sink::RawVideoSink;
use faceswap_core::video::infrastructure::resizing_sink::ResizingSink;

use settings::Settings;

/// Live face swapping for cameras and video files.
///
/// While running, type an image path and press Enter to change the
/// reference face, `t` to toggle swapping, `q` to quit.
#[derive(Parser)]
#[command(name = "faceswap-live")]
struct Cli {
    /// Reference face image. Without one, frames pass through unchanged
    /// until a reference is entered.
    #[arg(short, long)]
    reference: Option<PathBuf>,

    /// Camera index, capture device or video file.
    #[arg(short, long, default_value = "0")]
    source: String,

    /// ffmpeg input format for the capture device (v4l2, avfoundation, dshow).
    #[arg(long)]
    input_format: Option<String>,

    /// Record the output to a video file, or write the swapped image with --image.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Stream raw RGB24 frames to a virtual camera node or FIFO ("-" for stdout).
    #[arg(long)]
    virtual_cam: Option<PathBuf>,

    /// Fixed output size, e.g. 1280x720.
    #[arg(long, value_parser = parse_size)]
    out_size: Option<(u32, u32)>,

    /// Transform worker threads (default: min(cores, 5)).
    #[arg(long)]
    workers: Option<usize>,

    /// Run face detection every Nth transformed frame.
    #[arg(long)]
    detect_interval: Option<usize>,

    /// Downscale factor for detection input (0.0-1.0].
    #[arg(long)]
    detect_scale: Option<f64>,

    /// Target capture rate in frames per second.
    #[arg(long)]
    fps: Option<f64>,

    /// Face detection confidence threshold (0.0-1.0).
    #[arg(long)]
    confidence: Option<f64>,

    /// Restore swapped faces with the enhancement model.
    #[arg(long)]
    enhance: bool,

    /// Start with swapping switched off.
    #[arg(long)]
    no_swap: bool,

    /// Stop after this many captured frames.
    #[arg(long)]
    max_frames: Option<usize>,

    /// Swap a single image instead of running a live session.
    #[arg(long)]
    image: Option<PathBuf>,

    /// Do not read control commands from stdin.
    #[arg(long)]
    no_controls: bool,

    /// Settings file (default: settings.json in the user config directory).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write the effective settings back to the settings file.
    #[arg(long)]
    save_config: bool,

    /// Directory searched for model files before downloading.
    #[arg(long)]
    model_dir: Option<PathBuf>,

    #[arg(long)]
    detector_model: Option<PathBuf>,

    #[arg(long)]
    embedding_model: Option<PathBuf>,

    #[arg(long)]
    swap_model: Option<PathBuf>,

    #[arg(long)]
    enhance_model: Option<PathBuf>,

    /// Embedding projection matrix for the swap model (raw little-endian f32).
    #[arg(long)]
    emap: Option<PathBuf>,
}

impl Cli {
    /// Stored settings with every given flag applied on top.
    fn apply_to(&self, mut settings: Settings) -> Settings {
        fn set<T: Clone>(slot: &mut T, value: &Option<T>) {
            if let Some(v) = value {
                *slot = v.clone();
            }
        }
        if self.workers.is_some() {
            settings.workers = self.workers;
        }
        set(&mut settings.detection_interval, &self.detect_interval);
        set(&mut settings.detection_scale, &self.detect_scale);
        set(&mut settings.capture_fps, &self.fps);
        set(&mut settings.confidence, &self.confidence);
        settings.enhance |= self.enhance;

        let optional = [
            (&mut settings.reference, &self.reference),
            (&mut settings.model_dir, &self.model_dir),
            (&mut settings.detector_model, &self.detector_model),
            (&mut settings.embedding_model, &self.embedding_model),
            (&mut settings.swap_model, &self.swap_model),
            (&mut settings.enhance_model, &self.enhance_model),
            (&mut settings.emap, &self.emap),
        ];
        for (slot, value) in optional {
            if value.is_some() {
                *slot = value.clone();
            }
        }
        if self.input_format.is_some() {
            settings.input_format = self.input_format.clone();
        }
        settings
    }
}

struct ModelPaths {
    detector: PathBuf,
    embedder: PathBuf,
    swapper: PathBuf,
    enhancer: Option<PathBuf>,
}

fn main() {
    env_logger::init();

    if let Err(e) = run() {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let settings = cli.apply_to(Settings::load(cli.config.as_deref())?);
    validate(&cli, &settings)?;

    if cli.save_config {
        if let Some(path) = cli.config.clone().or_else(Settings::default_path) {
            settings.save(&path)?;
            log::info!("Settings saved to {}", path.display());
        }
    }

    match &cli.image {
        Some(input) => run_image_swap(&cli, &settings, input),
        None => run_live(&cli, &settings),
    }
}

fn run_image_swap(
    cli: &Cli,
    settings: &Settings,
    input: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let reference = settings
        .reference
        .as_deref()
        .ok_or("--image requires a reference face (--reference)")?;
    let output = cli.output.as_deref().ok_or("--image requires --output")?;

    let models = resolve_models(settings)?;
    let mut swapper = OnnxInswapper::new(&models.swapper, 1)?;
    if let Some(emap) = &settings.emap {
        swapper = swapper.with_emap_file(emap)?;
    }
    let enhancer = build_enhancer(models.enhancer.as_deref(), 1)?;

    let mut use_case = SwapImageUseCase::new(
        Box::new(ImageFileReader::new()),
        Box::new(ImageFileWriter::new()),
        Box::new(OnnxYoloDetector::new(&models.detector, settings.confidence)?),
        Box::new(ArcFaceEmbedder::new(&models.embedder)?),
        Arc::new(swapper),
        enhancer,
    );
    let faces = use_case.execute(reference, input, output)?;
    log::info!("Swapped {faces} face(s), output written to {}", output.display());
    Ok(())
}

fn run_live(cli: &Cli, settings: &Settings) -> Result<(), Box<dyn std::error::Error>> {
    let config = settings.pipeline_config(!cli.no_swap);
    config.validate()?;
    let sink = build_sink(cli)?;

    let models = resolve_models(settings)?;
    let mut swapper = OnnxInswapper::new(&models.swapper, config.worker_count)?;
    if let Some(emap) = &settings.emap {
        swapper = swapper.with_emap_file(emap)?;
    }
    let enhancer = build_enhancer(models.enhancer.as_deref(), config.worker_count)?;
    let detector = OnnxYoloDetector::new(&models.detector, settings.confidence)?;
    let dispatcher =
        FrameDispatcher::new(&config, Box::new(detector), Arc::new(swapper), enhancer)?;

    let source = CaptureSource::parse(&cli.source, settings.input_format.as_deref());
    log::info!(
        "Capturing from {source} with {} worker(s), detection every {} frame(s)",
        config.worker_count,
        config.detection_interval
    );
    let reader = FfmpegReader::new().with_device_fps(config.capture_fps);
    let stream = CaptureStream::new(Box::new(reader), source).with_pace(config.capture_fps);

    let (control_tx, control_rx) = crossbeam_channel::unbounded();
    let mut use_case = LiveSwapUseCase::new(
        Box::new(stream),
        sink,
        dispatcher,
        Box::new(ImageFileReader::new()),
        Box::new(ArcFaceEmbedder::new(&models.embedder)?),
        control_rx,
    )
    .with_logger(Box::new(StdoutPipelineLogger::default()))
    .with_max_frames(cli.max_frames);

    match &settings.reference {
        Some(path) => {
            use_case.load_reference(path)?;
            log::info!("Reference face loaded from {}", path.display());
        }
        None => log::warn!("No reference face set; frames pass through unchanged"),
    }

    if !cli.no_controls {
        spawn_controls(control_tx)?;
        eprintln!("Controls: <image path> sets the reference face, t toggles swapping, q quits");
    }

    let report = use_case.execute()?;
    log::info!(
        "Captured {} frames, emitted {}, dropped {} on write, {} transform task(s) failed",
        report.captured,
        report.emitted,
        report.dropped_writes,
        report.failed_tasks
    );
    Ok(())
}

fn build_sink(cli: &Cli) -> Result<Box<dyn FrameSink>, Box<dyn std::error::Error>> {
    let sink: Box<dyn FrameSink> = match (&cli.output, &cli.virtual_cam) {
        (Some(path), None) => Box::new(FfmpegRecorder::new(path)),
        (None, Some(target)) => Box::new(RawVideoSink::new(target)),
        _ => return Err("exactly one of --output or --virtual-cam is required".into()),
    };
    Ok(match cli.out_size {
        Some((width, height)) => Box::new(ResizingSink::new(sink, width, height)),
        None => sink,
    })
}

fn build_enhancer(
    model: Option<&Path>,
    pool_size: usize,
) -> Result<Option<Arc<dyn FaceEnhancer>>, Box<dyn std::error::Error>> {
    let Some(model) = model else {
        return Ok(None);
    };
    Ok(Some(Arc::new(OnnxGfpganEnhancer::new(model, pool_size)?)))
}

fn resolve_models(settings: &Settings) -> Result<ModelPaths, ModelResolveError> {
    let bundled = settings.model_dir.clone().or_else(bundled_model_dir);
    let bundled = bundled.as_deref();
    let resolve = |name: &str, url: Option<&str>, explicit: &Option<PathBuf>| {
        log::info!("Resolving model: {name}");
        let source = ModelSource { name, url };
        let progress = url.map(|_| download_progress(name));
        model_resolver::resolve(source, explicit.as_deref(), bundled, progress)
    };

    Ok(ModelPaths {
        detector: resolve(YOLO_MODEL_NAME, Some(YOLO_MODEL_URL), &settings.detector_model)?,
        embedder: resolve(EMBEDDING_MODEL_NAME, None, &settings.embedding_model)?,
        swapper: resolve(SWAP_MODEL_NAME, None, &settings.swap_model)?,
        enhancer: if settings.enhance {
            Some(resolve(ENHANCE_MODEL_NAME, None, &settings.enhance_model)?)
        } else {
            None
        },
    })
}

/// `models/` next to the executable.
fn bundled_model_dir() -> Option<PathBuf> {
    let exe = std::env::current_exe().ok()?;
    Some(exe.parent()?.join(BUNDLED_MODEL_DIR))
}

fn download_progress(name: &str) -> model_resolver::ProgressFn {
    let name = name.to_string();
    Box::new(move |downloaded, total| {
        if total > 0 {
            let pct = (downloaded as f64 / total as f64 * 100.0) as u32;
            eprint!("\rDownloading {name}... {pct}%");
            if downloaded >= total {
                eprintln!();
            }
        } else {
            eprint!("\rDownloading {name}... {downloaded} bytes");
        }
    })
}

/// Reads commands from stdin until `q`, end of input, or the session ends.
fn spawn_controls(tx: Sender<ControlEvent>) -> std::io::Result<()> {
    std::thread::Builder::new()
        .name("controls".into())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                let Some(event) = parse_command(&line) else {
                    continue;
                };
                let stop = event == ControlEvent::Stop;
                if tx.send(event).is_err() || stop {
                    break;
                }
            }
        })?;
    Ok(())
}

fn parse_command(line: &str) -> Option<ControlEvent> {
    match line.trim() {
        "" => None,
        "q" | "quit" => Some(ControlEvent::Stop),
        "t" | "toggle" => Some(ControlEvent::ToggleTransform),
        "on" => Some(ControlEvent::SetTransformEnabled(true)),
        "off" => Some(ControlEvent::SetTransformEnabled(false)),
        path => Some(ControlEvent::SetReference(PathBuf::from(path))),
    }
}

fn parse_size(value: &str) -> Result<(u32, u32), String> {
    let (w, h) = value
        .split_once(|c| c == 'x' || c == 'X')
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{value}'"))?;
    let w: u32 = w.trim().parse().map_err(|_| format!("invalid width '{w}'"))?;
    let h: u32 = h.trim().parse().map_err(|_| format!("invalid height '{h}'"))?;
    if w == 0 || h == 0 || w % 2 != 0 || h % 2 != 0 {
        return Err(format!("size must be positive and even, got {w}x{h}"));
    }
    Ok((w, h))
}

fn validate(cli: &Cli, settings: &Settings) -> Result<(), Box<dyn std::error::Error>> {
    if !(0.0..=1.0).contains(&settings.confidence) {
        return Err(format!(
            "Confidence must be between 0.0 and 1.0, got {}",
            settings.confidence
        )
        .into());
    }
    if let Some(reference) = &settings.reference {
        if !reference.is_file() {
            return Err(format!("Reference image not found: {}", reference.display()).into());
        }
    }
    if let Some(image) = &cli.image {
        if !image.is_file() {
            return Err(format!("Input image not found: {}", image.display()).into());
        }
        if cli.virtual_cam.is_some() {
            return Err("--virtual-cam cannot be used with --image".into());
        }
        return Ok(());
    }
    match (&cli.output, &cli.virtual_cam) {
        (Some(_), Some(_)) => Err("--output and --virtual-cam are mutually exclusive".into()),
        (None, None) => Err("Nothing to write: pass --output or --virtual-cam".into()),
        _ => Ok(()),
    }
}
