use numpy::{PyArray2, PyReadonlyArray2, PyReadonlyArray3};
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;
use siamese_core::{present_boxes, IouMatrix, DEFAULT_EPSILON};

mod convert;

use convert::{boxes_from_py, masks_from_py, matrix_from_py, matrix_to_py, to_py_err};

/// Box IoU between every ground-truth and predicted box, zeroed below `threshold`.
///
/// All-zero (padding) rows score 0 against everything.
#[pyfunction]
#[pyo3(signature = (gt_boxes, pred_boxes, threshold = 0.5, epsilon = DEFAULT_EPSILON))]
fn find_correct_detections<'py>(
    py: Python<'py>,
    gt_boxes: PyReadonlyArray2<'py, f64>,
    pred_boxes: PyReadonlyArray2<'py, f64>,
    threshold: f64,
    epsilon: f64,
) -> PyResult<Bound<'py, PyArray2<f64>>> {
    let gt = boxes_from_py(gt_boxes.as_array())?;
    let pred = boxes_from_py(pred_boxes.as_array())?;
    let (gt_rows, gt_present) = present_boxes(&gt);
    let (pred_cols, pred_present) = present_boxes(&pred);

    let m =
        siamese_core::compute_box_ious_with_epsilon(&gt_present, &pred_present, threshold, epsilon);
    matrix_to_py(py, &m.scatter(&gt_rows, &pred_cols, (gt.len(), pred.len())))
}

/// Mask IoU for pairs whose boxes pass `threshold`; every other cell is 0.
///
/// `gt_masks` is `[N, h, w]` in box-local coordinates (any resolution),
/// `pred_masks` is `[M, H, W]` in image coordinates.
#[pyfunction]
#[pyo3(signature = (gt_masks, pred_masks, gt_boxes, pred_boxes, threshold = 0.5, epsilon = DEFAULT_EPSILON))]
fn find_correct_segmentations<'py>(
    py: Python<'py>,
    gt_masks: PyReadonlyArray3<'py, bool>,
    pred_masks: PyReadonlyArray3<'py, bool>,
    gt_boxes: PyReadonlyArray2<'py, f64>,
    pred_boxes: PyReadonlyArray2<'py, f64>,
    threshold: f64,
    epsilon: f64,
) -> PyResult<Bound<'py, PyArray2<f64>>> {
    let gt = boxes_from_py(gt_boxes.as_array())?;
    let pred = boxes_from_py(pred_boxes.as_array())?;
    let gt_masks = masks_from_py(gt_masks.as_array());
    let pred_masks = masks_from_py(pred_masks.as_array());
    if gt_masks.len() != gt.len() || pred_masks.len() != pred.len() {
        return Err(PyValueError::new_err(format!(
            "mask counts ({}, {}) do not match box counts ({}, {})",
            gt_masks.len(),
            pred_masks.len(),
            gt.len(),
            pred.len()
        )));
    }

    let (gt_rows, gt_present) = present_boxes(&gt);
    let (pred_cols, pred_present) = present_boxes(&pred);
    let gt_masks: Vec<_> = gt_rows.iter().map(|&i| gt_masks[i].clone()).collect();
    let pred_masks: Vec<_> = pred_cols.iter().map(|&j| pred_masks[j].clone()).collect();

    let m = py
        .allow_threads(|| {
            siamese_core::compute_mask_ious_with_epsilon(
                &gt_masks,
                &pred_masks,
                &gt_present,
                &pred_present,
                threshold,
                epsilon,
            )
        })
        .map_err(to_py_err)?;
    matrix_to_py(py, &m.scatter(&gt_rows, &pred_cols, (gt.len(), pred.len())))
}

/// Greedy per-row assignment. The input array is left unchanged.
///
/// Returns the matched scores, or `(scores, indices)` with `-1` for
/// unmatched rows when `return_index` is set.
#[pyfunction]
#[pyo3(signature = (correct_ious, threshold = 0.5, return_index = false))]
fn assign_detections(
    py: Python<'_>,
    correct_ious: PyReadonlyArray2<'_, f64>,
    threshold: f64,
    return_index: bool,
) -> PyResult<PyObject> {
    let iou = matrix_from_py(correct_ious.as_array());
    let a = siamese_core::assign(&iou, threshold);
    if return_index {
        let indices = a.match_indices();
        Ok((a.scores, indices).into_pyobject(py)?.into_any().unbind())
    } else {
        Ok(a.scores.into_pyobject(py)?.into_any().unbind())
    }
}

/// Mask IoU of each ground truth's detection-level match, 0 when unmatched.
#[pyfunction]
#[pyo3(signature = (correct_ious_segmentation, correct_ious_detection, threshold = 0.5))]
fn assign_segmentations(
    correct_ious_segmentation: PyReadonlyArray2<'_, f64>,
    correct_ious_detection: PyReadonlyArray2<'_, f64>,
    threshold: f64,
) -> PyResult<Vec<f64>> {
    let seg: IouMatrix = matrix_from_py(correct_ious_segmentation.as_array());
    let det: IouMatrix = matrix_from_py(correct_ious_detection.as_array());
    siamese_core::assign_segmentation_scores(&seg, &det, threshold).map_err(to_py_err)
}

#[pymodule]
fn siamese_eval_py(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(find_correct_detections, m)?)?;
    m.add_function(wrap_pyfunction!(find_correct_segmentations, m)?)?;
    m.add_function(wrap_pyfunction!(assign_detections, m)?)?;
    m.add_function(wrap_pyfunction!(assign_segmentations, m)?)?;
    m.add("DEFAULT_EPSILON", DEFAULT_EPSILON)?;
    Ok(())
}
