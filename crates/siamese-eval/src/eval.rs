//! Evaluation driver: scores every (image, category) unit of a result set
//! against ground truth and aggregates per-instance scores.
//!
//! A unit is one image and one category present among its non-crowd ground
//! truth, mirroring how a one-shot model is queried with a target of that
//! category.

use std::collections::BTreeMap;

use log::{debug, info, warn};
use rayon::prelude::*;

use crate::assign::{assign, segmentation_scores};
use crate::dataset::IndexedDataset;
use crate::error::Result;
use crate::iou::{compute_box_ious_with_epsilon, compute_mask_ious_with_epsilon};
use crate::mask;
use crate::params::Params;
use crate::types::{BBox, Mask};

/// Scores of one (image, category) unit, one entry per ground-truth instance.
#[derive(Debug, Clone)]
pub struct EvalUnit {
    pub image_id: u64,
    pub category_id: u64,
    /// Ground-truth annotation ids, in row order.
    pub gt_ids: Vec<u64>,
    /// Prediction annotation ids, in column order (score descending).
    pub dt_ids: Vec<u64>,
    /// Detection IoU of each ground truth's match, 0 when unmatched.
    pub detection_scores: Vec<f64>,
    /// Matched prediction column per ground truth.
    pub matches: Vec<Option<usize>>,
    /// Mask IoU of each ground truth's detection match, when masks are scored.
    pub segmentation_scores: Option<Vec<f64>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CategorySummary {
    pub category_id: u64,
    pub num_instances: usize,
    pub num_detected: usize,
    pub mean_detection_iou: f64,
    pub mean_segmentation_iou: Option<f64>,
}

/// Aggregated scores. Micro averages run over instances, macro over categories.
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub categories: Vec<CategorySummary>,
    pub num_instances: usize,
    pub num_detected: usize,
    pub mean_detection_iou: f64,
    pub detection_rate: f64,
    pub mean_segmentation_iou: Option<f64>,
    pub macro_detection_iou: f64,
    pub macro_segmentation_iou: Option<f64>,
}

impl Summary {
    /// `[mean det IoU, detection rate, mean segm IoU, macro det IoU, macro segm IoU]`,
    /// with -1 for anything undefined.
    pub fn stats(&self) -> Vec<f64> {
        if self.num_instances == 0 {
            return vec![-1.0; 5];
        }
        vec![
            self.mean_detection_iou,
            self.detection_rate,
            self.mean_segmentation_iou.unwrap_or(-1.0),
            self.macro_detection_iou,
            self.macro_segmentation_iou.unwrap_or(-1.0),
        ]
    }
}

/// The evaluation object.
pub struct SiameseEval {
    pub gt: IndexedDataset,
    pub dt: IndexedDataset,
    pub params: Params,
    pub units: Vec<EvalUnit>,
    pub summary: Option<Summary>,
    pub stats: Option<Vec<f64>>,
}

struct Instances {
    ids: Vec<u64>,
    boxes: Vec<BBox>,
    masks: Vec<Mask>,
}

impl SiameseEval {
    pub fn new(gt: IndexedDataset, dt: IndexedDataset, params: Params) -> Self {
        SiameseEval {
            gt,
            dt,
            params,
            units: Vec::new(),
            summary: None,
            stats: None,
        }
    }

    /// Score every unit in parallel.
    pub fn evaluate(&mut self) -> Result<()> {
        let img_ids = self.gt.get_img_ids(&self.params.img_ids);
        let cat_ids = self.gt.get_cat_ids(&self.params.cat_ids);

        let gt = &self.gt;
        let cats = &cat_ids;
        let pairs: Vec<(u64, u64)> = img_ids
            .iter()
            .flat_map(|&img_id| {
                gt.categories_for_image(img_id)
                    .iter()
                    .filter(move |c| cats.binary_search(*c).is_ok())
                    .map(move |&cat_id| (img_id, cat_id))
            })
            .collect();
        info!(
            "evaluating {} units over {} images and {} categories",
            pairs.len(),
            img_ids.len(),
            cat_ids.len()
        );

        let units: Vec<Option<EvalUnit>> = pairs
            .par_iter()
            .map(|&(img_id, cat_id)| self.evaluate_unit(img_id, cat_id))
            .collect::<Result<_>>()?;

        let mut units: Vec<EvalUnit> = units.into_iter().flatten().collect();
        units.sort_by_key(|u| (u.category_id, u.image_id));
        self.units = units;
        Ok(())
    }

    fn evaluate_unit(&self, img_id: u64, cat_id: u64) -> Result<Option<EvalUnit>> {
        let p = &self.params;
        let gt = self.ground_truth(img_id, cat_id)?;
        if gt.ids.is_empty() {
            return Ok(None);
        }
        let dt = self.predictions(img_id, cat_id);

        let det_ious =
            compute_box_ious_with_epsilon(&gt.boxes, &dt.boxes, p.iou_threshold, p.epsilon);
        let assignment = assign(&det_ious, p.iou_threshold);

        let segmentation = if p.use_masks {
            let mask_ious = compute_mask_ious_with_epsilon(
                &gt.masks,
                &dt.masks,
                &gt.boxes,
                &dt.boxes,
                p.iou_threshold,
                p.epsilon,
            )?;
            Some(segmentation_scores(&mask_ious, &assignment)?)
        } else {
            None
        };

        debug!(
            "image {} category {}: {} gt, {} dt, {} matched",
            img_id,
            cat_id,
            gt.ids.len(),
            dt.ids.len(),
            assignment.matched_count()
        );

        Ok(Some(EvalUnit {
            image_id: img_id,
            category_id: cat_id,
            gt_ids: gt.ids,
            dt_ids: dt.ids,
            detection_scores: assignment.scores,
            matches: assignment.matches,
            segmentation_scores: segmentation,
        }))
    }

    /// Non-crowd ground truth with masks cropped to their boxes.
    ///
    /// An instance whose mask cannot be decoded keeps its box and gets an
    /// empty mask, so it still counts for detection and scores 0 for
    /// segmentation.
    fn ground_truth(&self, img_id: u64, cat_id: u64) -> Result<Instances> {
        let anns = self
            .gt
            .get_ann_ids_for_img_cat(img_id, cat_id)
            .iter()
            .filter_map(|&id| self.gt.get_ann(id))
            .filter(|a| !a.iscrowd);

        let mut out = Instances {
            ids: Vec::new(),
            boxes: Vec::new(),
            masks: Vec::new(),
        };
        for ann in anns {
            let Some(bb) = self.gt.ann_bbox(ann) else {
                warn!("ground truth {} has no box, skipped", ann.id);
                continue;
            };
            if self.params.use_masks {
                let rect = bb.pixel_rect();
                mask::check_extent(&rect)?;
                match self.gt.ann_to_mask(ann) {
                    Some(full) => out.masks.push(mask::crop(&full, &rect)),
                    None => {
                        warn!("ground truth {} has no usable mask, scored as empty", ann.id);
                        out.masks.push(Mask::zeros(0, 0));
                    }
                }
            }
            out.ids.push(ann.id);
            out.boxes.push(bb);
        }
        Ok(out)
    }

    /// Highest-scoring predictions, up to `max_dets`, with image-sized masks.
    /// Undecodable prediction masks are treated as empty.
    fn predictions(&self, img_id: u64, cat_id: u64) -> Instances {
        let mut anns: Vec<_> = self
            .dt
            .get_ann_ids_for_img_cat(img_id, cat_id)
            .iter()
            .filter_map(|&id| self.dt.get_ann(id))
            .collect();
        anns.sort_by(|a, b| {
            b.score
                .unwrap_or(0.0)
                .partial_cmp(&a.score.unwrap_or(0.0))
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut out = Instances {
            ids: Vec::new(),
            boxes: Vec::new(),
            masks: Vec::new(),
        };
        for ann in anns {
            if out.ids.len() >= self.params.max_dets {
                break;
            }
            let Some(bb) = self.dt.ann_bbox(ann) else {
                warn!("prediction {} has no box, skipped", ann.id);
                continue;
            };
            if self.params.use_masks {
                let m = self.dt.ann_to_mask(ann).unwrap_or_else(|| {
                    warn!("prediction {} has no usable mask, scored as empty", ann.id);
                    Mask::zeros(0, 0)
                });
                out.masks.push(m);
            }
            out.ids.push(ann.id);
            out.boxes.push(bb);
        }
        out
    }

    /// Aggregate unit scores into a [`Summary`] and `stats`.
    pub fn accumulate(&mut self) {
        #[derive(Default)]
        struct Acc {
            n: usize,
            detected: usize,
            det_sum: f64,
            seg_sum: Option<f64>,
        }

        let mut per_cat: BTreeMap<u64, Acc> = BTreeMap::new();
        for unit in &self.units {
            let acc = per_cat.entry(unit.category_id).or_insert_with(|| Acc {
                seg_sum: Some(0.0),
                ..Acc::default()
            });
            acc.n += unit.detection_scores.len();
            acc.detected += unit.matches.iter().filter(|m| m.is_some()).count();
            acc.det_sum += unit.detection_scores.iter().sum::<f64>();
            acc.seg_sum = match (acc.seg_sum, &unit.segmentation_scores) {
                (Some(s), Some(scores)) => Some(s + scores.iter().sum::<f64>()),
                _ => None,
            };
        }

        let categories: Vec<CategorySummary> = per_cat
            .iter()
            .map(|(&category_id, acc)| CategorySummary {
                category_id,
                num_instances: acc.n,
                num_detected: acc.detected,
                mean_detection_iou: mean(acc.det_sum, acc.n),
                mean_segmentation_iou: acc.seg_sum.map(|s| mean(s, acc.n)),
            })
            .collect();

        let num_instances: usize = per_cat.values().map(|a| a.n).sum();
        let num_detected: usize = per_cat.values().map(|a| a.detected).sum();
        let det_sum: f64 = per_cat.values().map(|a| a.det_sum).sum();
        let seg_sum: Option<f64> = per_cat.values().map(|a| a.seg_sum).sum();

        let summary = Summary {
            num_instances,
            num_detected,
            mean_detection_iou: mean(det_sum, num_instances),
            detection_rate: mean(num_detected as f64, num_instances),
            mean_segmentation_iou: seg_sum.map(|s| mean(s, num_instances)),
            macro_detection_iou: mean(
                categories.iter().map(|c| c.mean_detection_iou).sum(),
                categories.len(),
            ),
            macro_segmentation_iou: categories
                .iter()
                .map(|c| c.mean_segmentation_iou)
                .sum::<Option<f64>>()
                .map(|s| mean(s, categories.len())),
            categories,
        };

        info!(
            "accumulated {} instances in {} categories",
            summary.num_instances,
            summary.categories.len()
        );
        self.stats = Some(summary.stats());
        self.summary = Some(summary);
    }

    /// Print the overall scores and a per-category table.
    pub fn summarize(&self) {
        let summary = match &self.summary {
            Some(s) => s,
            None => {
                warn!("Please run evaluate() and accumulate() first.");
                return;
            }
        };
        let thr = self.params.iou_threshold;
        let fmt = |v: Option<f64>| match v {
            Some(v) if summary.num_instances > 0 => format!("{:0.3}", v),
            _ => format!("{:0.3}", -1.0),
        };

        let lines = [
            ("Mean detection IoU", "micro", Some(summary.mean_detection_iou)),
            ("Detection rate", "micro", Some(summary.detection_rate)),
            ("Mean segmentation IoU", "micro", summary.mean_segmentation_iou),
            ("Mean detection IoU", "macro", Some(summary.macro_detection_iou)),
            ("Mean segmentation IoU", "macro", summary.macro_segmentation_iou),
        ];
        for (name, avg, val) in lines {
            println!(
                " {:<22} @[ IoU={:<4.2} | avg={:>5} | instances={:>5} ] = {}",
                name,
                thr,
                avg,
                summary.num_instances,
                fmt(val)
            );
        }

        println!(
            " {:>8} {:<16} {:>9} {:>8} {:>8} {:>8}",
            "cat", "name", "instances", "detected", "det IoU", "seg IoU"
        );
        for c in &summary.categories {
            let name = self
                .gt
                .get_cat(c.category_id)
                .map(|cat| cat.name.as_str())
                .unwrap_or("?");
            println!(
                " {:>8} {:<16} {:>9} {:>8} {:>8.3} {:>8}",
                c.category_id,
                name,
                c.num_instances,
                c.num_detected,
                c.mean_detection_iou,
                c.mean_segmentation_iou
                    .map_or_else(|| "-".to_string(), |v| format!("{:.3}", v))
            );
        }
    }
}

fn mean(sum: f64, n: usize) -> f64 {
    if n == 0 {
        0.0
    } else {
        sum / n as f64
    }
}
