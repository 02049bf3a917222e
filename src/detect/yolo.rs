//! YOLOv8 object detection decode.
//!
//! Two output layouts are accepted:
//! - split heads (Rockchip model zoo export): three branches of
//!   `{box [1, 4*16, gh, gw], class [1, nc, gh, gw], optional score sum}`,
//!   boxes encoded as DFL distributions
//! - single tensor `[1, 4 + nc, N]` with `cx, cy, w, h` followed by class scores

use std::collections::BTreeMap;

use crate::detect::letterbox::Letterbox;
use crate::detect::nms::{filter_by_confidence, non_max_suppression};
use crate::detect::pipeline::{DetectionThresholds, Detector};
use crate::detect::result::{BoundingBox, ObjectDetection};
use crate::detect::tensor::Tensor;
use crate::error::{Error, Result};

const BRANCHES: usize = 3;

pub struct YoloV8Detector {
    input_width: u32,
    input_height: u32,
    thresholds: DetectionThresholds,
}

struct Candidate {
    bbox: BoundingBox,
    class_id: usize,
    score: f32,
}

impl YoloV8Detector {
    pub fn new(input_width: u32, input_height: u32, thresholds: DetectionThresholds) -> Self {
        Self {
            input_width,
            input_height,
            thresholds,
        }
    }

    pub fn thresholds(&self) -> DetectionThresholds {
        self.thresholds
    }

    fn decode_branches(&self, outputs: &[Tensor]) -> Result<Vec<Candidate>> {
        let per_branch = outputs.len() / BRANCHES;
        let mut candidates = Vec::new();
        for branch in 0..BRANCHES {
            let boxes = &outputs[per_branch * branch];
            let classes = &outputs[per_branch * branch + 1];
            self.decode_branch(boxes, classes, &mut candidates)?;
        }
        Ok(candidates)
    }

    fn decode_branch(&self, boxes: &Tensor, classes: &Tensor, out: &mut Vec<Candidate>) -> Result<()> {
        let (box_channels, grid_h, grid_w) = nchw_dims(boxes)?;
        let (num_classes, class_h, class_w) = nchw_dims(classes)?;
        if (class_h, class_w) != (grid_h, grid_w) {
            return Err(Error::Postprocess(format!(
                "box grid {}x{} does not match class grid {}x{}",
                grid_w, grid_h, class_w, class_h
            )));
        }
        if box_channels == 0 || box_channels % 4 != 0 || num_classes == 0 {
            return Err(Error::Postprocess(format!(
                "unexpected branch channels: box {}, class {}",
                box_channels, num_classes
            )));
        }
        let bins = box_channels / 4;
        let box_data = f32_data(boxes)?;
        let class_data = f32_data(classes)?;
        let plane = grid_h * grid_w;
        let stride_x = (self.input_width as usize / grid_w) as f32;
        let stride_y = (self.input_height as usize / grid_h) as f32;

        let best: Vec<(usize, f32)> = (0..plane)
            .map(|cell| best_class((0..num_classes).map(|c| class_data[c * plane + cell])))
            .collect();
        let scores: Vec<f32> = best.iter().map(|&(_, score)| score).collect();
        for cell in filter_by_confidence(&scores, self.thresholds.confidence) {
            let (class_id, score) = best[cell];
            let mut dist = [0f32; 4];
            for (side, d) in dist.iter_mut().enumerate() {
                *d = dfl_expectation((0..bins).map(|j| box_data[(side * bins + j) * plane + cell]));
            }
            let cx = (cell % grid_w) as f32 + 0.5;
            let cy = (cell / grid_w) as f32 + 0.5;
            out.push(Candidate {
                bbox: BoundingBox::new(
                    (cx - dist[0]) * stride_x,
                    (cy - dist[1]) * stride_y,
                    (cx + dist[2]) * stride_x,
                    (cy + dist[3]) * stride_y,
                ),
                class_id,
                score,
            });
        }
        Ok(())
    }

    fn decode_single(&self, output: &Tensor) -> Result<Vec<Candidate>> {
        let (channels, anchors) = match output.shape() {
            [1, c, n] if *c > 4 => (*c, *n),
            shape => {
                return Err(Error::Postprocess(format!(
                    "unsupported output shape {:?}",
                    shape
                )))
            }
        };
        let data = f32_data(output)?;
        let at = |c: usize, i: usize| data[c * anchors + i];
        let best: Vec<(usize, f32)> = (0..anchors)
            .map(|i| best_class((4..channels).map(|c| at(c, i))))
            .collect();
        let scores: Vec<f32> = best.iter().map(|&(_, score)| score).collect();
        let candidates = filter_by_confidence(&scores, self.thresholds.confidence)
            .into_iter()
            .map(|i| Candidate {
                bbox: BoundingBox::from_center(at(0, i), at(1, i), at(2, i), at(3, i)),
                class_id: best[i].0,
                score: best[i].1,
            })
            .collect();
        Ok(candidates)
    }
}

impl Detector for YoloV8Detector {
    type Output = Vec<ObjectDetection>;

    fn name(&self) -> &'static str {
        "yolov8"
    }

    fn input_size(&self) -> (u32, u32) {
        (self.input_width, self.input_height)
    }

    fn postprocess(&self, outputs: &[Tensor], geometry: &Letterbox) -> Result<Self::Output> {
        let candidates = match outputs.len() {
            6 | 9 => self.decode_branches(outputs)?,
            1 => self.decode_single(&outputs[0])?,
            n => {
                return Err(Error::Postprocess(format!(
                    "expected 1, 6 or 9 output tensors, got {}",
                    n
                )))
            }
        };

        let mut by_class: BTreeMap<usize, Vec<&Candidate>> = BTreeMap::new();
        for candidate in &candidates {
            by_class.entry(candidate.class_id).or_default().push(candidate);
        }

        let mut detections = Vec::new();
        for (class_id, group) in by_class {
            let boxes: Vec<BoundingBox> = group.iter().map(|c| c.bbox).collect();
            let scores: Vec<f32> = group.iter().map(|c| c.score).collect();
            for i in non_max_suppression(&boxes, &scores, self.thresholds.overlap) {
                detections.push(ObjectDetection {
                    bbox: geometry.restore_box(boxes[i]),
                    class_id,
                    score: scores[i],
                });
            }
        }
        Ok(detections)
    }
}

/// Index and score of the highest class probability; first wins on ties.
fn best_class(scores: impl Iterator<Item = f32>) -> (usize, f32) {
    scores
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |best, cur| if cur.1 > best.1 { cur } else { best })
}

/// Softmax over DFL bins, then the expected bin index.
fn dfl_expectation(logits: impl Iterator<Item = f32> + Clone) -> f32 {
    let max = logits.clone().fold(f32::NEG_INFINITY, f32::max);
    let (mut weighted, mut total) = (0.0f32, 0.0f32);
    for (j, v) in logits.enumerate() {
        let e = (v - max).exp();
        weighted += j as f32 * e;
        total += e;
    }
    if total > 0.0 {
        weighted / total
    } else {
        0.0
    }
}

pub(crate) fn f32_data(tensor: &Tensor) -> Result<&[f32]> {
    tensor
        .as_f32()
        .ok_or_else(|| Error::Postprocess("expected f32 output tensor".to_string()))
}

fn nchw_dims(tensor: &Tensor) -> Result<(usize, usize, usize)> {
    match tensor.shape() {
        [1, c, h, w] if *h > 0 && *w > 0 => Ok((*c, *h, *w)),
        shape => Err(Error::Postprocess(format!(
            "expected [1, C, H, W] branch tensor, got {:?}",
            shape
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INPUT: u32 = 32;
    const BINS: usize = 16;
    const CLASSES: usize = 2;

    fn thresholds() -> DetectionThresholds {
        DetectionThresholds::default()
    }

    /// One branch whose DFL logits all peak at bin 1, with `hit` set to
    /// `(y, x, class, score)`.
    fn branch(grid: usize, hit: Option<(usize, usize, usize, f32)>) -> Vec<Tensor> {
        let plane = grid * grid;
        let mut boxes = vec![0f32; 4 * BINS * plane];
        for side in 0..4 {
            for cell in 0..plane {
                boxes[(side * BINS + 1) * plane + cell] = 20.0;
            }
        }
        let mut classes = vec![0f32; CLASSES * plane];
        if let Some((y, x, class, score)) = hit {
            classes[class * plane + y * grid + x] = score;
        }
        vec![
            Tensor::from_f32(vec![1, 4 * BINS, grid, grid], boxes).unwrap(),
            Tensor::from_f32(vec![1, CLASSES, grid, grid], classes).unwrap(),
        ]
    }

    #[test]
    fn decodes_dfl_branch_into_source_pixels() -> Result<()> {
        let mut outputs = branch(4, Some((1, 2, 1, 0.9)));
        outputs.extend(branch(2, None));
        outputs.extend(branch(1, None));
        let detector = YoloV8Detector::new(INPUT, INPUT, thresholds());
        let geometry = Letterbox::new(INPUT, INPUT, INPUT, INPUT);

        let detections = detector.postprocess(&outputs, &geometry)?;
        assert_eq!(detections.len(), 1);
        let d = &detections[0];
        assert_eq!(d.class_id, 1);
        assert_eq!(d.class_name(), "bicycle");
        assert!((d.score - 0.9).abs() < 1e-6);
        // Stride 8, cell (x=2, y=1), distance 1 on every side.
        assert!((d.bbox.x1 - 12.0).abs() < 1e-3);
        assert!((d.bbox.y1 - 4.0).abs() < 1e-3);
        assert!((d.bbox.x2 - 28.0).abs() < 1e-3);
        assert!((d.bbox.y2 - 20.0).abs() < 1e-3);
        Ok(())
    }

    #[test]
    fn single_tensor_layout_runs_nms_per_class() -> Result<()> {
        // Channels: cx, cy, w, h, class0, class1; three anchors.
        let data = vec![
            10.0, 11.0, 10.0, // cx
            10.0, 11.0, 10.0, // cy
            8.0, 8.0, 8.0, // w
            8.0, 8.0, 8.0, // h
            0.9, 0.8, 0.0, // class 0
            0.0, 0.0, 0.7, // class 1
        ];
        let output = Tensor::from_f32(vec![1, 6, 3], data).unwrap();
        let detector = YoloV8Detector::new(INPUT, INPUT, thresholds());
        let geometry = Letterbox::new(INPUT, INPUT, INPUT, INPUT);

        let detections = detector.postprocess(&[output], &geometry)?;
        assert_eq!(detections.len(), 2);
        assert_eq!((detections[0].class_id, detections[0].score), (0, 0.9));
        assert_eq!((detections[1].class_id, detections[1].score), (1, 0.7));
        Ok(())
    }

    #[test]
    fn score_equal_to_the_threshold_is_kept() -> Result<()> {
        // Two far-apart anchors: one exactly at 0.25, one just below it.
        let data = vec![
            4.0, 24.0, // cx
            4.0, 24.0, // cy
            4.0, 4.0, // w
            4.0, 4.0, // h
            0.25, 0.2499, // class 0
        ];
        let output = Tensor::from_f32(vec![1, 5, 2], data).unwrap();
        let detector = YoloV8Detector::new(INPUT, INPUT, thresholds());
        let geometry = Letterbox::new(INPUT, INPUT, INPUT, INPUT);

        let detections = detector.postprocess(&[output], &geometry)?;
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].score, 0.25);
        assert!((detections[0].bbox.x1 - 2.0).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn low_scores_yield_no_detections() -> Result<()> {
        let mut outputs = branch(4, Some((0, 0, 0, 0.1)));
        outputs.extend(branch(2, None));
        outputs.extend(branch(1, None));
        let detector = YoloV8Detector::new(INPUT, INPUT, thresholds());
        let geometry = Letterbox::new(INPUT, INPUT, INPUT, INPUT);
        assert!(detector.postprocess(&outputs, &geometry)?.is_empty());
        Ok(())
    }

    #[test]
    fn unexpected_outputs_are_postprocess_errors() {
        let detector = YoloV8Detector::new(INPUT, INPUT, thresholds());
        let geometry = Letterbox::new(INPUT, INPUT, INPUT, INPUT);
        let flat = Tensor::from_f32(vec![4], vec![0.0; 4]).unwrap();
        assert!(matches!(
            detector.postprocess(&[flat], &geometry),
            Err(Error::Postprocess(_))
        ));
        assert!(matches!(
            detector.postprocess(&[], &geometry),
            Err(Error::Postprocess(_))
        ));
    }

    #[test]
    fn dfl_expectation_of_uniform_bins_is_the_midpoint() {
        let e = dfl_expectation([0.0f32; 16].into_iter());
        assert!((e - 7.5).abs() < 1e-5);
    }
}
