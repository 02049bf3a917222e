//! Per-frame detection outputs.

/// COCO class names, indexed by class id.
pub const COCO_CLASSES: [&str; 80] = [
    "person", "bicycle", "car", "motorbike", "aeroplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat", "dog",
    "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack", "umbrella",
    "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball", "kite",
    "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket", "bottle",
    "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich",
    "orange", "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "sofa",
    "pottedplant", "bed", "diningtable", "toilet", "tvmonitor", "laptop", "mouse", "remote",
    "keyboard", "cell phone", "microwave", "oven", "toaster", "sink", "refrigerator", "book",
    "clock", "vase", "scissors", "teddy bear", "hair drier", "toothbrush",
];

/// Number of COCO body landmarks produced by pose models.
pub const POSE_KEYPOINTS: usize = 17;

/// Display name for a class id; unknown ids render as `class_<id>`.
pub fn class_name(class_id: usize) -> String {
    COCO_CLASSES
        .get(class_id)
        .map(|name| name.to_string())
        .unwrap_or_else(|| format!("class_{}", class_id))
}

/// Axis-aligned box in pixel coordinates, `(x1, y1)` top-left.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Box from center and size.
    pub fn from_center(cx: f32, cy: f32, w: f32, h: f32) -> Self {
        Self::new(cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0)
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f32 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    /// Intersection over union; 0 when the union is empty.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let w = (self.x2.min(other.x2) - self.x1.max(other.x1)).max(0.0);
        let h = (self.y2.min(other.y2) - self.y1.max(other.y1)).max(0.0);
        let inter = w * h;
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            return 0.0;
        }
        inter / union
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ObjectDetection {
    pub bbox: BoundingBox,
    pub class_id: usize,
    pub score: f32,
}

impl ObjectDetection {
    pub fn class_name(&self) -> String {
        class_name(self.class_id)
    }
}

/// One body landmark. `x`/`y` are in whatever space the owner documents.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    pub confidence: f32,
}

/// A detected person with 17 COCO keypoints normalized to `[0, 1]` of the
/// source frame.
#[derive(Clone, Debug, PartialEq)]
pub struct PoseDetection {
    pub bbox: BoundingBox,
    pub score: f32,
    pub keypoints: Vec<Keypoint>,
}

impl PoseDetection {
    /// Keypoints scaled back to pixels of a `width` x `height` frame.
    pub fn keypoints_in_pixels(&self, width: u32, height: u32) -> Vec<Keypoint> {
        self.keypoints
            .iter()
            .map(|kp| Keypoint {
                x: kp.x * width as f32,
                y: kp.y * height as f32,
                confidence: kp.confidence,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_names_fall_back_for_unknown_ids() {
        assert_eq!(class_name(0), "person");
        assert_eq!(class_name(79), "toothbrush");
        assert_eq!(class_name(80), "class_80");
    }

    #[test]
    fn iou_of_nested_and_disjoint_boxes() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(0.0, 0.0, 10.0, 5.0);
        assert!((a.iou(&b) - 0.5).abs() < 1e-6);
        let far = BoundingBox::new(20.0, 20.0, 30.0, 30.0);
        assert_eq!(a.iou(&far), 0.0);
        let empty = BoundingBox::new(5.0, 5.0, 5.0, 5.0);
        assert_eq!(empty.iou(&empty), 0.0);
    }

    #[test]
    fn keypoints_scale_to_frame_pixels() {
        let pose = PoseDetection {
            bbox: BoundingBox::default(),
            score: 0.9,
            keypoints: vec![Keypoint {
                x: 0.5,
                y: 0.25,
                confidence: 0.8,
            }],
        };
        let px = pose.keypoints_in_pixels(640, 480);
        assert_eq!(px[0].x, 320.0);
        assert_eq!(px[0].y, 120.0);
        assert_eq!(px[0].confidence, 0.8);
    }
}
