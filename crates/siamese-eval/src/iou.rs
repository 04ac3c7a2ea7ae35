//! Pairwise overlap between ground-truth and predicted instances of one class.
//!
//! Box IoU is computed for every pair. Mask IoU is only computed for pairs
//! whose boxes already pass the detection threshold; every other cell is 0.

use crate::error::{EvalError, Result};
use crate::mask;
use crate::params::DEFAULT_EPSILON;
use crate::types::{BBox, IouMatrix, Mask};

/// Box IoU for every (ground truth, prediction) pair, zeroing entries below `threshold`.
///
/// Returns a `gt.len() x pred.len()` matrix.
pub fn compute_box_ious(gt: &[BBox], pred: &[BBox], threshold: f64) -> IouMatrix {
    compute_box_ious_with_epsilon(gt, pred, threshold, DEFAULT_EPSILON)
}

pub fn compute_box_ious_with_epsilon(
    gt: &[BBox],
    pred: &[BBox],
    threshold: f64,
    epsilon: f64,
) -> IouMatrix {
    let mut result = IouMatrix::zeros(gt.len(), pred.len());
    for (i, g) in gt.iter().enumerate() {
        for (j, p) in pred.iter().enumerate() {
            let iou = g.iou(p, epsilon);
            if iou >= threshold {
                result.set(i, j, iou);
            }
        }
    }
    result
}

/// Mask IoU for every pair whose box IoU reaches `threshold`.
///
/// `gt_masks[i]` covers the extent of `gt_boxes[i]` at any resolution (a
/// mini-mask) and is resized to the box's pixel size before comparison.
/// `pred_masks[j]` is in image coordinates. Mask area outside the two boxes'
/// overlap still counts towards the union.
///
/// Fails with `InvalidInput` when mask and box counts differ, or when a gated
/// ground-truth box spans more than [`mask::MAX_MASK_PIXELS`].
pub fn compute_mask_ious(
    gt_masks: &[Mask],
    pred_masks: &[Mask],
    gt_boxes: &[BBox],
    pred_boxes: &[BBox],
    threshold: f64,
) -> Result<IouMatrix> {
    compute_mask_ious_with_epsilon(
        gt_masks,
        pred_masks,
        gt_boxes,
        pred_boxes,
        threshold,
        DEFAULT_EPSILON,
    )
}

pub fn compute_mask_ious_with_epsilon(
    gt_masks: &[Mask],
    pred_masks: &[Mask],
    gt_boxes: &[BBox],
    pred_boxes: &[BBox],
    threshold: f64,
    epsilon: f64,
) -> Result<IouMatrix> {
    if gt_masks.len() != gt_boxes.len() {
        return Err(EvalError::InvalidInput(format!(
            "{} ground-truth masks for {} ground-truth boxes",
            gt_masks.len(),
            gt_boxes.len()
        )));
    }
    if pred_masks.len() != pred_boxes.len() {
        return Err(EvalError::InvalidInput(format!(
            "{} predicted masks for {} predicted boxes",
            pred_masks.len(),
            pred_boxes.len()
        )));
    }

    let gate = compute_box_ious_with_epsilon(gt_boxes, pred_boxes, threshold, epsilon);
    let mut result = IouMatrix::zeros(gate.rows(), gate.cols());
    let pred_areas: Vec<u64> = pred_masks.iter().map(Mask::area).collect();

    for i in 0..gate.rows() {
        // Resized lazily: most rows gate out every prediction.
        let mut gt_full: Option<(Mask, u64)> = None;
        for j in 0..gate.cols() {
            if gate.get(i, j) < threshold {
                continue;
            }
            if gt_full.is_none() {
                let rect = gt_boxes[i].pixel_rect();
                mask::check_extent(&rect)?;
                let m = mask::resize_binary(&gt_masks[i], rect.height(), rect.width());
                let a = m.area();
                gt_full = Some((m, a));
            }
            let Some((gt_mask, gt_area)) = &gt_full else {
                continue;
            };
            let iou = pair_mask_iou(
                gt_mask,
                *gt_area,
                &gt_boxes[i],
                &pred_masks[j],
                pred_areas[j],
                &pred_boxes[j],
                epsilon,
            );
            result.set(i, j, iou);
        }
    }
    Ok(result)
}

fn pair_mask_iou(
    gt_mask: &Mask,
    gt_area: u64,
    gt_box: &BBox,
    pred_mask: &Mask,
    pred_area: u64,
    pred_box: &BBox,
    epsilon: f64,
) -> f64 {
    let gt_rect = gt_box.pixel_rect();
    let overlap = gt_rect.overlap(&pred_box.pixel_rect());

    let mut intersection = 0u64;
    let mut pred_overlap = 0u64;
    let mut gt_overlap = 0u64;
    let mut either = 0u64;
    if !overlap.is_empty() {
        for y in overlap.y1..overlap.y2 {
            for x in overlap.x1..overlap.x2 {
                let p = pred_mask.get(y, x);
                let g = gt_mask.get(y - gt_rect.y1, x - gt_rect.x1);
                pred_overlap += p as u64;
                gt_overlap += g as u64;
                intersection += (p && g) as u64;
                either += (p || g) as u64;
            }
        }
    }

    let union = (pred_area - pred_overlap) + (gt_area - gt_overlap) + either;
    intersection as f64 / (union as f64 + epsilon)
}
