//! fallwatchd - edge fall detection daemon
//!
//! This daemon:
//! 1. Captures frames from a camera (or image directory) on a background thread
//! 2. Runs the latest frame through a YOLOv8 / YOLOv8-pose pipeline
//! 3. Feeds the most confident pose into the fall judge and logs confirmed falls
//!
//! With `--image` it runs a single inference and exits.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use fallwatch::detect::Detector;
use fallwatch::{
    object_pipeline, pose_pipeline, BackendSelection, DetectionPipeline, FallJudge,
    FallwatchConfig, FpsCounter, Frame, FrameSource, ObjectDetection, PoseDetection,
};

const STATUS_INTERVAL: Duration = Duration::from_secs(5);
const IDLE_POLL: Duration = Duration::from_millis(5);

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Object detection only.
    Detect,
    /// Pose estimation plus fall judgement.
    Pose,
}

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Config file (.toml or .json). Defaults to $FALLWATCH_CONFIG.
    #[arg(long, env = "FALLWATCH_CONFIG")]
    config: Option<PathBuf>,
    /// Video source: device index, /dev/videoN, stub://name, or image path.
    #[arg(long)]
    source: Option<String>,
    /// Model file (.onnx or .rknn).
    #[arg(long)]
    model: Option<PathBuf>,
    /// Inference runtime: auto, native or portable.
    #[arg(long)]
    backend: Option<BackendSelection>,
    #[arg(long, value_enum, default_value_t = Mode::Pose)]
    mode: Mode,
    /// Run once on a single image instead of the camera.
    #[arg(long)]
    image: Option<PathBuf>,
    /// Confidence threshold.
    #[arg(long)]
    conf: Option<f32>,
    /// NMS IoU threshold.
    #[arg(long)]
    nms: Option<f32>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let cfg = load_config(&args)?;
    log::info!(
        "fallwatchd {} starting: model {}, mode {:?}",
        env!("CARGO_PKG_VERSION"),
        cfg.model.path.display(),
        args.mode
    );

    match (args.mode, &args.image) {
        (Mode::Detect, Some(image)) => {
            let mut pipeline = object_pipeline(&cfg.model, cfg.thresholds)?;
            let frame = Frame::from_image_path(image)?;
            let detections = pipeline.infer(&frame)?;
            log_objects(&detections);
            pipeline.release();
        }
        (Mode::Pose, Some(image)) => {
            let mut pipeline = pose_pipeline(&cfg.model, cfg.thresholds)?;
            let frame = Frame::from_image_path(image)?;
            let poses = pipeline.infer(&frame)?;
            log::info!("{} person(s) detected", poses.len());
            let mut judge = FallJudge::new(cfg.fall)?;
            if let Some(pose) = most_confident(&poses) {
                let keypoints = pose.keypoints_in_pixels(frame.width, frame.height);
                let observation = judge.observe(Some(&keypoints));
                log::info!("body angle {:.1} deg", observation.angle);
            }
            pipeline.release();
        }
        (Mode::Detect, None) => {
            let pipeline = object_pipeline(&cfg.model, cfg.thresholds)?;
            run_camera(&cfg, pipeline, |_, detections| {
                log::debug!("{} object(s)", detections.len());
            })?;
        }
        (Mode::Pose, None) => {
            let pipeline = pose_pipeline(&cfg.model, cfg.thresholds)?;
            let mut judge = FallJudge::new(cfg.fall)?;
            run_camera(&cfg, pipeline, move |frame, poses| {
                let keypoints = most_confident(&poses)
                    .map(|pose| pose.keypoints_in_pixels(frame.width, frame.height));
                let observation = judge.observe(keypoints.as_deref());
                if observation.confirmed {
                    log::warn!("FALL DETECTED (angle {:.1} deg)", observation.angle);
                }
            })?;
        }
    }
    Ok(())
}

fn load_config(args: &Args) -> Result<FallwatchConfig> {
    let mut cfg = FallwatchConfig::load_from(args.config.as_deref())?;
    if let Some(source) = &args.source {
        cfg.capture.source = source.clone();
    }
    if let Some(model) = &args.model {
        cfg.model.path = model.clone();
    }
    if let Some(backend) = args.backend {
        cfg.model.backend = Some(backend);
    }
    if let Some(conf) = args.conf {
        cfg.thresholds.confidence = conf;
    }
    if let Some(nms) = args.nms {
        cfg.thresholds.overlap = nms;
    }
    for (name, value) in [("--conf", cfg.thresholds.confidence), ("--nms", cfg.thresholds.overlap)] {
        if !(0.0..=1.0).contains(&value) {
            return Err(anyhow!("{} must be in [0, 1]", name));
        }
    }
    Ok(cfg)
}

/// Read → infer → handle until Ctrl-C, then tear down the camera before the model.
fn run_camera<D, F>(cfg: &FallwatchConfig, mut pipeline: DetectionPipeline<D>, mut handle: F) -> Result<()>
where
    D: Detector,
    F: FnMut(&Frame, D::Output),
{
    let running = Arc::new(AtomicBool::new(true));
    let signal = running.clone();
    ctrlc::set_handler(move || {
        signal.store(false, Ordering::SeqCst);
    })
    .context("error setting Ctrl-C handler")?;

    let mut source = FrameSource::open_with(&cfg.capture)?;
    let format = source.format();
    log::info!(
        "capturing {} at {}x{} @ {} fps",
        cfg.capture.source,
        format.width,
        format.height,
        format.fps
    );
    source.start()?;

    let mut fps = FpsCounter::default();
    let mut last_sequence = None;
    let mut last_status = Instant::now();
    while running.load(Ordering::SeqCst) {
        let frame = match source.read() {
            Some(frame) if Some(frame.sequence) != last_sequence => frame,
            _ => {
                std::thread::sleep(IDLE_POLL);
                continue;
            }
        };
        last_sequence = Some(frame.sequence);

        match pipeline.infer(&frame) {
            Ok(output) => handle(&frame, output),
            Err(err) => log::warn!("frame {} skipped: {}", frame.sequence, err),
        }
        fps.tick();

        if last_status.elapsed() >= STATUS_INTERVAL {
            let stats = source.stats();
            log::info!(
                "{:.1} fps, {} captured, {} read failures, {} reconnects, healthy={}",
                fps.fps(),
                stats.frames_captured,
                stats.read_failures,
                stats.reconnects,
                source.is_healthy()
            );
            last_status = Instant::now();
        }
    }

    log::info!("shutdown signal received, releasing camera and model");
    source.release();
    pipeline.release();
    Ok(())
}

fn most_confident(poses: &[PoseDetection]) -> Option<&PoseDetection> {
    poses.iter().max_by(|a, b| a.score.total_cmp(&b.score))
}

fn log_objects(detections: &[ObjectDetection]) {
    if detections.is_empty() {
        log::info!("no objects detected");
        return;
    }
    log::info!("{} object(s) detected", detections.len());
    for d in detections {
        log::info!(
            "  {}: {:.2} [{:.0}, {:.0}, {:.0}, {:.0}]",
            d.class_name(),
            d.score,
            d.bbox.x1,
            d.bbox.y1,
            d.bbox.x2,
            d.bbox.y2
        );
    }
}
