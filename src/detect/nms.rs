//! Confidence filtering and greedy non-maximum suppression.

use std::cmp::Ordering;

use crate::detect::result::BoundingBox;

/// Indices of candidates whose score is at least `threshold`.
pub fn filter_by_confidence(scores: &[f32], threshold: f32) -> Vec<usize> {
    scores
        .iter()
        .enumerate()
        .filter(|(_, &score)| score >= threshold)
        .map(|(i, _)| i)
        .collect()
}

/// Greedy NMS. Returns kept indices in descending score order.
///
/// Candidates are visited highest score first, ties by lower index. A candidate
/// is discarded when its IoU with an already kept box is strictly greater than
/// `iou_threshold`.
pub fn non_max_suppression(boxes: &[BoundingBox], scores: &[f32], iou_threshold: f32) -> Vec<usize> {
    let n = boxes.len().min(scores.len());
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| match scores[b].total_cmp(&scores[a]) {
        Ordering::Equal => a.cmp(&b),
        other => other,
    });

    let mut keep: Vec<usize> = Vec::new();
    let mut suppressed = vec![false; n];
    for (pos, &i) in order.iter().enumerate() {
        if suppressed[i] {
            continue;
        }
        keep.push(i);
        for &j in &order[pos + 1..] {
            if !suppressed[j] && boxes[i].iou(&boxes[j]) > iou_threshold {
                suppressed[j] = true;
            }
        }
    }
    keep
}
