use serde::{Deserialize, Serialize};

/// Additive term in every IoU denominator.
pub const DEFAULT_EPSILON: f64 = 1e-4;

/// Evaluation parameters controlling filtering, thresholds and mask scoring.
///
/// Every field has a default, so a partial JSON object is a valid params file.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Params {
    /// Image IDs to evaluate (empty = all images).
    pub img_ids: Vec<u64>,
    /// Category IDs to evaluate (empty = all categories).
    pub cat_ids: Vec<u64>,
    /// Overlap threshold for detection, assignment and the mask gate.
    pub iou_threshold: f64,
    /// Added to every IoU denominator.
    pub epsilon: f64,
    /// Maximum predictions per image and category, highest score first.
    pub max_dets: usize,
    /// Whether to score masks in addition to boxes.
    pub use_masks: bool,
}

impl Default for Params {
    fn default() -> Self {
        Params {
            img_ids: Vec::new(),
            cat_ids: Vec::new(),
            iou_threshold: 0.5,
            epsilon: DEFAULT_EPSILON,
            max_dets: 100,
            use_masks: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_params_file() {
        let p: Params = serde_json::from_str(r#"{"iou_threshold": 0.7, "cat_ids": [3]}"#).unwrap();
        assert_eq!(p.iou_threshold, 0.7);
        assert_eq!(p.cat_ids, vec![3]);
        assert_eq!(p.epsilon, DEFAULT_EPSILON);
        assert_eq!(p.max_dets, 100);
        assert!(p.use_masks);
    }
}
