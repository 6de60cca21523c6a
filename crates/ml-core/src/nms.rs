//! Greedy non-maximum suppression over integer boxes.
//!
//! Matches the behaviour of OpenCV's `dnn::NMSBoxes`: candidates must score
//! strictly above `score_threshold`, the survivors are stably sorted by score
//! (ties keep input order) and a box is kept only while its overlap with every
//! kept box stays at or below `iou_threshold`.

use crate::BoxXywh;

/// Area shared by two boxes. Edges are widened to `i64` so saturated
/// coordinates cannot overflow.
fn intersection_area(a: &BoxXywh, b: &BoxXywh) -> i64 {
    let (ax, ay) = (a.x as i64, a.y as i64);
    let (bx, by) = (b.x as i64, b.y as i64);
    let x1 = ax.max(bx);
    let y1 = ay.max(by);
    let width = (ax + a.width as i64).min(bx + b.width as i64) - x1;
    let height = (ay + a.height as i64).min(by + b.height as i64) - y1;
    if width <= 0 || height <= 0 {
        0
    } else {
        width * height
    }
}

/// Intersection over union. Two degenerate boxes are treated as identical.
pub fn iou(a: &BoxXywh, b: &BoxXywh) -> f32 {
    let area_a = a.area();
    let area_b = b.area();
    if area_a + area_b <= 0 {
        return 1.0;
    }
    let inter = intersection_area(a, b) as f64;
    let distance = 1.0 - inter / ((area_a + area_b) as f64 - inter);
    1.0 - distance as f32
}

/// Returns the indices of the boxes to keep, highest score first.
pub fn nms_boxes(
    boxes: &[BoxXywh],
    scores: &[f32],
    score_threshold: f32,
    iou_threshold: f32,
) -> Vec<usize> {
    debug_assert_eq!(boxes.len(), scores.len());

    let mut order: Vec<usize> = (0..boxes.len().min(scores.len()))
        .filter(|&idx| scores[idx] > score_threshold)
        .collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

    let mut kept: Vec<usize> = Vec::with_capacity(order.len());
    for idx in order {
        let keep = kept
            .iter()
            .all(|&other| iou(&boxes[idx], &boxes[other]) <= iou_threshold);
        if keep {
            kept.push(idx);
        }
    }
    kept
}
