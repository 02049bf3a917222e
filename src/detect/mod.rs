//! Inference: backends, the model handle and detection pipelines.

mod backend;
pub mod backends;
mod handle;
mod letterbox;
mod nms;
mod pipeline;
mod pose;
mod result;
mod tensor;
mod yolo;

pub use backend::{BackendKind, InferenceBackend, NpuCoreMask};
pub use backends::StubBackend;
pub use handle::{
    select_backend, select_with, BackendSelection, DetectorHandle, ModelSettings, DEFAULT_INPUT_SIZE,
};
pub use letterbox::{letterbox, Letterbox};
pub use nms::{filter_by_confidence, non_max_suppression};
pub use pipeline::{
    object_pipeline, pose_pipeline, DetectionPipeline, DetectionThresholds, Detector,
    DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_OVERLAP_THRESHOLD,
};
pub use pose::YoloV8PoseDetector;
pub use result::{
    class_name, BoundingBox, Keypoint, ObjectDetection, PoseDetection, COCO_CLASSES, POSE_KEYPOINTS,
};
pub use tensor::{Tensor, TensorData};
pub use yolo::YoloV8Detector;
