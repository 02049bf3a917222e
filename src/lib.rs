//! fallwatch: edge fall detection from a live camera.
//!
//! # Architecture
//!
//! Frames flow through three stages, each owning its resources exclusively:
//!
//! 1. **Capture** (`ingest`): a `FrameSource` runs one acquisition thread per
//!    device and publishes only the latest frame. Readers get copies.
//! 2. **Inference** (`detect`): a `DetectionPipeline` letterboxes the frame,
//!    runs it through a `DetectorHandle` bound to one `InferenceBackend`
//!    (Rockchip NPU or portable ONNX, chosen once at construction) and decodes
//!    YOLOv8 or YOLOv8-pose outputs.
//! 3. **Judgement** (`fall`): a `FallJudge` debounces per-frame body angles
//!    over a sliding window into a confirmed fall.
//!
//! # Module Structure
//!
//! - `frame`: captured pixel buffers
//! - `ingest`: capture devices and `FrameSource`
//! - `detect`: backends, letterbox/NMS kernels, pipelines
//! - `fall`: the temporal classifier
//! - `fps`: rolling frame-rate counter
//! - `config`: file + environment configuration for `fallwatchd`
//! - `error`: the typed failure taxonomy

pub mod config;
pub mod detect;
pub mod error;
pub mod fall;
pub mod fps;
pub mod frame;
pub mod ingest;

pub use config::FallwatchConfig;
pub use detect::{
    object_pipeline, pose_pipeline, BackendKind, BackendSelection, DetectionPipeline,
    DetectionThresholds, DetectorHandle, InferenceBackend, Keypoint, ModelSettings, NpuCoreMask,
    ObjectDetection, PoseDetection,
};
pub use error::{Error, Result, Stage, StageError};
pub use fall::{body_angle, FallEvent, FallJudge, FallJudgeConfig, Observation};
pub use fps::FpsCounter;
pub use frame::{Frame, PixelFormat};
pub use ingest::{CaptureDevice, CaptureSettings, FrameSource};
