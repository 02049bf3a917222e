//! Preprocess → inference → postprocess over a [`DetectorHandle`].

use crate::detect::handle::{DetectorHandle, ModelSettings};
use crate::detect::letterbox::{letterbox, Letterbox};
use crate::detect::pose::YoloV8PoseDetector;
use crate::detect::tensor::Tensor;
use crate::detect::yolo::YoloV8Detector;
use crate::error::{Error, Result, Stage, StageError};
use crate::frame::Frame;

/// Minimum detection score kept after decoding.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.25;
/// IoU above which a lower-scored box is suppressed.
pub const DEFAULT_OVERLAP_THRESHOLD: f32 = 0.45;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DetectionThresholds {
    pub confidence: f32,
    pub overlap: f32,
}

impl Default for DetectionThresholds {
    fn default() -> Self {
        Self {
            confidence: DEFAULT_CONFIDENCE_THRESHOLD,
            overlap: DEFAULT_OVERLAP_THRESHOLD,
        }
    }
}

/// Model-specific halves of a detection pipeline.
pub trait Detector {
    type Output;

    fn name(&self) -> &'static str;

    /// Model input `(width, height)`.
    fn input_size(&self) -> (u32, u32);

    /// Letterbox the frame into a `u8` NHWC `[1, H, W, 3]` tensor.
    fn preprocess(&self, frame: &Frame) -> Result<(Tensor, Letterbox)> {
        let (width, height) = self.input_size();
        let (pixels, geometry) = letterbox(frame, width, height)?;
        let tensor = Tensor::from_u8(vec![1, height as usize, width as usize, 3], pixels)
            .map_err(|e| Error::Preprocess(e.to_string()))?;
        Ok((tensor, geometry))
    }

    /// Decode raw outputs into detections in source-frame coordinates.
    fn postprocess(&self, outputs: &[Tensor], geometry: &Letterbox) -> Result<Self::Output>;
}

/// A detector bound to a loaded model.
pub struct DetectionPipeline<D: Detector> {
    handle: DetectorHandle,
    detector: D,
}

impl<D: Detector> DetectionPipeline<D> {
    pub fn new(handle: DetectorHandle, detector: D) -> Self {
        Self { handle, detector }
    }

    /// Run one frame through every stage in order. The first failing stage ends
    /// the call and is named in the error.
    pub fn infer(&mut self, frame: &Frame) -> Result<D::Output, StageError> {
        let (input, geometry) = self
            .detector
            .preprocess(frame)
            .map_err(|e| StageError::new(Stage::Preprocess, e))?;
        let outputs = self
            .handle
            .run(&input)
            .map_err(|e| StageError::new(Stage::Inference, e))?;
        self.detector
            .postprocess(&outputs, &geometry)
            .map_err(|e| StageError::new(Stage::Postprocess, e))
    }

    pub fn handle(&self) -> &DetectorHandle {
        &self.handle
    }

    pub fn detector(&self) -> &D {
        &self.detector
    }

    /// Release the underlying model. Safe to call more than once.
    pub fn release(&mut self) {
        self.handle.release();
    }
}

/// Object detection pipeline for a YOLOv8 model.
pub fn object_pipeline(
    settings: &ModelSettings,
    thresholds: DetectionThresholds,
) -> Result<DetectionPipeline<YoloV8Detector>> {
    let handle = DetectorHandle::open(settings)?;
    let detector = YoloV8Detector::new(settings.input_width, settings.input_height, thresholds);
    Ok(DetectionPipeline::new(handle, detector))
}

/// Pose pipeline for a YOLOv8-pose model.
pub fn pose_pipeline(
    settings: &ModelSettings,
    thresholds: DetectionThresholds,
) -> Result<DetectionPipeline<YoloV8PoseDetector>> {
    let handle = DetectorHandle::open(settings)?;
    let detector = YoloV8PoseDetector::new(settings.input_width, settings.input_height, thresholds);
    Ok(DetectionPipeline::new(handle, detector))
}
