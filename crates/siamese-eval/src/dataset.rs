//! COCO-format dataset loading and indexing.
//!
//! Besides the usual id lookups this keeps the two-way image/category index
//! used to pick which categories to evaluate (or to draw targets from) per image.

use std::collections::HashMap;
use std::path::Path;

use log::warn;

use crate::error::Result;
use crate::mask;
use crate::types::{Annotation, BBox, Category, Dataset, Image, Mask};

/// A dataset plus lookup indices, built once on load.
pub struct IndexedDataset {
    pub dataset: Dataset,
    /// ann_id -> index into dataset.annotations
    anns: HashMap<u64, usize>,
    /// img_id -> index into dataset.images
    imgs: HashMap<u64, usize>,
    /// cat_id -> index into dataset.categories
    cats: HashMap<u64, usize>,
    /// (img_id, cat_id) -> [ann_id, ...] (sorted)
    img_cat_to_anns: HashMap<(u64, u64), Vec<u64>>,
    /// img_id -> [cat_id, ...] of non-crowd annotations (sorted, unique)
    img_to_cats: HashMap<u64, Vec<u64>>,
    /// cat_id -> [img_id, ...] of non-crowd annotations (sorted, unique)
    cat_to_imgs: HashMap<u64, Vec<u64>>,
}

impl IndexedDataset {
    /// Load a COCO annotation JSON file and build indices.
    pub fn new(annotation_file: &Path) -> Result<Self> {
        let file = std::fs::File::open(annotation_file)?;
        let reader = std::io::BufReader::new(file);
        let dataset: Dataset = serde_json::from_reader(reader)?;
        Ok(Self::from_dataset(dataset))
    }

    pub fn from_dataset(dataset: Dataset) -> Self {
        let mut indexed = IndexedDataset {
            dataset,
            anns: HashMap::new(),
            imgs: HashMap::new(),
            cats: HashMap::new(),
            img_cat_to_anns: HashMap::new(),
            img_to_cats: HashMap::new(),
            cat_to_imgs: HashMap::new(),
        };
        indexed.create_index();
        indexed
    }

    fn create_index(&mut self) {
        for (i, ann) in self.dataset.annotations.iter().enumerate() {
            self.anns.insert(ann.id, i);
            self.img_cat_to_anns
                .entry((ann.image_id, ann.category_id))
                .or_default()
                .push(ann.id);
            if !ann.iscrowd {
                self.img_to_cats
                    .entry(ann.image_id)
                    .or_default()
                    .push(ann.category_id);
                self.cat_to_imgs
                    .entry(ann.category_id)
                    .or_default()
                    .push(ann.image_id);
            }
        }

        for (i, img) in self.dataset.images.iter().enumerate() {
            self.imgs.insert(img.id, i);
        }

        for (i, cat) in self.dataset.categories.iter().enumerate() {
            self.cats.insert(cat.id, i);
        }

        for ids in self
            .img_to_cats
            .values_mut()
            .chain(self.cat_to_imgs.values_mut())
        {
            ids.sort_unstable();
            ids.dedup();
        }
        for ids in self.img_cat_to_anns.values_mut() {
            ids.sort_unstable();
        }
    }

    pub fn get_ann(&self, id: u64) -> Option<&Annotation> {
        self.anns.get(&id).map(|&i| &self.dataset.annotations[i])
    }

    pub fn get_img(&self, id: u64) -> Option<&Image> {
        self.imgs.get(&id).map(|&i| &self.dataset.images[i])
    }

    pub fn get_cat(&self, id: u64) -> Option<&Category> {
        self.cats.get(&id).map(|&i| &self.dataset.categories[i])
    }

    /// Annotation IDs for one (image, category) pair, sorted.
    pub fn get_ann_ids_for_img_cat(&self, img_id: u64, cat_id: u64) -> &[u64] {
        self.img_cat_to_anns
            .get(&(img_id, cat_id))
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Categories with at least one non-crowd instance in the image.
    pub fn categories_for_image(&self, img_id: u64) -> &[u64] {
        self.img_to_cats
            .get(&img_id)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Images holding at least one non-crowd instance of the category.
    pub fn images_for_category(&self, cat_id: u64) -> &[u64] {
        self.cat_to_imgs
            .get(&cat_id)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Sorted image IDs, restricted to `img_ids` when non-empty.
    pub fn get_img_ids(&self, img_ids: &[u64]) -> Vec<u64> {
        let mut ids: Vec<u64> = if img_ids.is_empty() {
            self.dataset.images.iter().map(|img| img.id).collect()
        } else {
            img_ids.to_vec()
        };
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// Sorted category IDs, restricted to `cat_ids` when non-empty.
    pub fn get_cat_ids(&self, cat_ids: &[u64]) -> Vec<u64> {
        let mut ids: Vec<u64> = self
            .dataset
            .categories
            .iter()
            .map(|c| c.id)
            .filter(|id| cat_ids.is_empty() || cat_ids.contains(id))
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Load detection results against this dataset's images and categories.
    ///
    /// The file may be a JSON array of annotations or an object with an
    /// `annotations` field.
    pub fn load_res(&self, res_file: &Path) -> Result<IndexedDataset> {
        let text = std::fs::read_to_string(res_file)?;
        let anns: Vec<Annotation> = match serde_json::from_str::<Vec<Annotation>>(&text) {
            Ok(a) => a,
            Err(_) => serde_json::from_str::<Dataset>(&text)?.annotations,
        };
        Ok(self.with_results(anns))
    }

    /// Wrap result annotations, sharing this dataset's images and categories.
    pub fn with_results(&self, mut anns: Vec<Annotation>) -> IndexedDataset {
        for (i, ann) in anns.iter_mut().enumerate() {
            if ann.id == 0 {
                ann.id = (i + 1) as u64;
            }
            if let Some(bb) = ann.bbox {
                ann.area = Some(bb[2] * bb[3]);
            }
            ann.iscrowd = false;
        }

        IndexedDataset::from_dataset(Dataset {
            images: self.dataset.images.clone(),
            annotations: anns,
            categories: self.dataset.categories.clone(),
        })
    }

    /// The annotation's box in `(y1, x1, y2, x2)` form.
    pub fn ann_bbox(&self, ann: &Annotation) -> Option<BBox> {
        ann.bbox.map(BBox::from_xywh)
    }

    /// Full-image mask for an annotation.
    ///
    /// Decodes the segmentation when present, otherwise rasterises the box.
    pub fn ann_to_mask(&self, ann: &Annotation) -> Option<Mask> {
        let img = self.get_img(ann.image_id)?;
        let (h, w) = (img.height as usize, img.width as usize);

        match &ann.segmentation {
            Some(seg) => match mask::from_segmentation(seg, img.height, img.width) {
                Ok(m) if m.h == h && m.w == w => Some(m),
                Ok(m) => {
                    warn!(
                        "annotation {}: mask is {}x{} but image {} is {}x{}",
                        ann.id, m.h, m.w, img.id, h, w
                    );
                    None
                }
                Err(e) => {
                    warn!("annotation {}: {}", ann.id, e);
                    None
                }
            },
            None => self.ann_bbox(ann).map(|bb| mask::fr_bbox(&bb, h, w)),
        }
    }
}
