//! YOLOv8-pose decode.
//!
//! Output is one tensor of 56 channels per anchor: `cx, cy, w, h, conf`, then
//! 17 keypoints as `(x, y, visibility)`. Both `[1, 56, N]` and `[1, N, 56]` are
//! accepted.

use crate::detect::letterbox::Letterbox;
use crate::detect::nms::{filter_by_confidence, non_max_suppression};
use crate::detect::pipeline::{DetectionThresholds, Detector};
use crate::detect::result::{BoundingBox, Keypoint, PoseDetection, POSE_KEYPOINTS};
use crate::detect::tensor::Tensor;
use crate::detect::yolo::f32_data;
use crate::error::{Error, Result};

const POSE_CHANNELS: usize = 5 + POSE_KEYPOINTS * 3;

pub struct YoloV8PoseDetector {
    input_width: u32,
    input_height: u32,
    thresholds: DetectionThresholds,
}

impl YoloV8PoseDetector {
    pub fn new(input_width: u32, input_height: u32, thresholds: DetectionThresholds) -> Self {
        Self {
            input_width,
            input_height,
            thresholds,
        }
    }
}

impl Detector for YoloV8PoseDetector {
    type Output = Vec<PoseDetection>;

    fn name(&self) -> &'static str {
        "yolov8-pose"
    }

    fn input_size(&self) -> (u32, u32) {
        (self.input_width, self.input_height)
    }

    fn postprocess(&self, outputs: &[Tensor], geometry: &Letterbox) -> Result<Self::Output> {
        let [output] = outputs else {
            return Err(Error::Postprocess(format!(
                "expected one pose output tensor, got {}",
                outputs.len()
            )));
        };
        let (anchors, channel_major) = match output.shape() {
            [1, c, n] if *c == POSE_CHANNELS => (*n, true),
            [1, n, c] if *c == POSE_CHANNELS => (*n, false),
            shape => {
                return Err(Error::Postprocess(format!(
                    "unsupported pose output shape {:?}",
                    shape
                )))
            }
        };
        let data = f32_data(output)?;
        let at = |c: usize, i: usize| {
            if channel_major {
                data[c * anchors + i]
            } else {
                data[i * POSE_CHANNELS + c]
            }
        };

        let confidences: Vec<f32> = (0..anchors).map(|i| at(4, i)).collect();
        let kept = filter_by_confidence(&confidences, self.thresholds.confidence);
        let boxes: Vec<BoundingBox> = kept
            .iter()
            .map(|&i| BoundingBox::from_center(at(0, i), at(1, i), at(2, i), at(3, i)))
            .collect();
        let scores: Vec<f32> = kept.iter().map(|&i| confidences[i]).collect();

        let (width, height) = (
            geometry.source_width.max(1) as f32,
            geometry.source_height.max(1) as f32,
        );
        let poses = non_max_suppression(&boxes, &scores, self.thresholds.overlap)
            .into_iter()
            .map(|k| {
                let anchor = kept[k];
                let keypoints = (0..POSE_KEYPOINTS)
                    .map(|p| {
                        let base = 5 + p * 3;
                        let (x, y) = geometry.restore_point(at(base, anchor), at(base + 1, anchor));
                        Keypoint {
                            x: x / width,
                            y: y / height,
                            confidence: at(base + 2, anchor),
                        }
                    })
                    .collect();
                PoseDetection {
                    bbox: geometry.restore_box(boxes[k]),
                    score: scores[k],
                    keypoints,
                }
            })
            .collect();
        Ok(poses)
    }
}
