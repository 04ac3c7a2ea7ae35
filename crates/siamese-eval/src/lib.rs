pub mod assign;
pub mod dataset;
pub mod error;
pub mod eval;
pub mod iou;
pub mod mask;
pub mod params;
pub mod types;

pub use assign::{assign, assign_segmentation_scores, segmentation_scores};
pub use dataset::IndexedDataset;
pub use error::{EvalError, Result};
pub use eval::{CategorySummary, EvalUnit, SiameseEval, Summary};
pub use iou::{
    compute_box_ious, compute_box_ious_with_epsilon, compute_mask_ious,
    compute_mask_ious_with_epsilon,
};
pub use params::{Params, DEFAULT_EPSILON};
pub use types::{
    present_boxes, Annotation, Assignment, BBox, Category, Dataset, Image, IouMatrix, Mask,
    PixelRect, Rle, Segmentation,
};
