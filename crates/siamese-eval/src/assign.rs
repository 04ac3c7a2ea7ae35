//! Greedy one-to-one assignment of predictions to ground truth.
//!
//! Ground-truth rows are visited in index order and each claims its best
//! remaining prediction. Earlier rows win ties for a shared prediction; there
//! is no global reassignment.

use crate::error::{EvalError, Result};
use crate::types::{Assignment, IouMatrix};

/// Greedily match each ground-truth row to at most one prediction column.
///
/// A row is matched when some unclaimed column reaches `threshold`; it takes
/// the maximum such column (first occurrence on ties). The claimed column is
/// zeroed for every other row in [`Assignment::resolved`]. `iou` itself is
/// left untouched.
pub fn assign(iou: &IouMatrix, threshold: f64) -> Assignment {
    let mut resolved = iou.clone();
    let mut claimed = vec![false; iou.cols()];
    let mut scores = Vec::with_capacity(iou.rows());
    let mut matches = Vec::with_capacity(iou.rows());

    for i in 0..resolved.rows() {
        let mut best: Option<(usize, f64)> = None;
        let mut any_passes = false;
        for (j, &v) in resolved.row(i).iter().enumerate() {
            if claimed[j] {
                continue;
            }
            any_passes |= v >= threshold;
            if best.map_or(true, |(_, b)| v > b) {
                best = Some((j, v));
            }
        }

        match best {
            Some((j, score)) if any_passes => {
                resolved.clear_column(j);
                resolved.set(i, j, score);
                claimed[j] = true;
                scores.push(score);
                matches.push(Some(j));
            }
            _ => {
                scores.push(0.0);
                matches.push(None);
            }
        }
    }

    Assignment {
        scores,
        matches,
        resolved,
    }
}

/// Mask IoU of each ground-truth row's detection-level match, 0 when unmatched.
///
/// The detection assignment is re-derived from `detection_iou`; mask scores
/// never choose their own matches.
pub fn assign_segmentation_scores(
    mask_iou: &IouMatrix,
    detection_iou: &IouMatrix,
    threshold: f64,
) -> Result<Vec<f64>> {
    if mask_iou.shape() != detection_iou.shape() {
        return Err(EvalError::InvalidInput(format!(
            "mask IoU matrix is {:?} but detection IoU matrix is {:?}",
            mask_iou.shape(),
            detection_iou.shape()
        )));
    }
    segmentation_scores(mask_iou, &assign(detection_iou, threshold))
}

/// Mask IoU per ground-truth row under an existing detection assignment.
pub fn segmentation_scores(mask_iou: &IouMatrix, detections: &Assignment) -> Result<Vec<f64>> {
    if mask_iou.rows() != detections.matches.len() {
        return Err(EvalError::InvalidInput(format!(
            "mask IoU matrix has {} rows but the assignment covers {}",
            mask_iou.rows(),
            detections.matches.len()
        )));
    }
    detections
        .matches
        .iter()
        .enumerate()
        .map(|(i, m)| match *m {
            None => Ok(0.0),
            Some(j) if j < mask_iou.cols() => Ok(mask_iou.get(i, j)),
            Some(j) => Err(EvalError::InvalidInput(format!(
                "match column {} out of range for {} mask IoU columns",
                j,
                mask_iou.cols()
            ))),
        })
        .collect()
}
