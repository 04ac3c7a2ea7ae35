use std::ops::Index;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{EvalError, Result};

/// Axis-aligned box in image pixel coordinates, ordered `(y1, x1, y2, x2)`.
///
/// `y1 <= y2` and `x1 <= x2` by convention only; inverted boxes are accepted
/// and simply produce degenerate areas.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct BBox {
    pub y1: f64,
    pub x1: f64,
    pub y2: f64,
    pub x2: f64,
}

impl BBox {
    pub fn new(y1: f64, x1: f64, y2: f64, x2: f64) -> Self {
        BBox { y1, x1, y2, x2 }
    }

    /// Convert a COCO `[x, y, w, h]` box.
    pub fn from_xywh(bb: [f64; 4]) -> Self {
        BBox {
            y1: bb[1],
            x1: bb[0],
            y2: bb[1] + bb[3],
            x2: bb[0] + bb[2],
        }
    }

    /// Read one row of a zero-padded `(y1, x1, y2, x2)` box array.
    ///
    /// A row with no non-zero coordinate is padding and yields `None`.
    pub fn from_padded(row: [f64; 4]) -> Option<Self> {
        if row.iter().all(|&v| v == 0.0) {
            None
        } else {
            Some(BBox::new(row[0], row[1], row[2], row[3]))
        }
    }

    pub fn height(&self) -> f64 {
        self.y2 - self.y1
    }

    pub fn width(&self) -> f64 {
        self.x2 - self.x1
    }

    pub fn area(&self) -> f64 {
        self.height() * self.width()
    }

    /// Area shared with `other`, zero when the boxes do not overlap.
    pub fn intersection(&self, other: &BBox) -> f64 {
        let dy = (self.y2.min(other.y2) - self.y1.max(other.y1)).max(0.0);
        let dx = (self.x2.min(other.x2) - self.x1.max(other.x1)).max(0.0);
        dx * dy
    }

    /// `intersection / (union + epsilon)`.
    pub fn iou(&self, other: &BBox, epsilon: f64) -> f64 {
        let intersection = self.intersection(other);
        let union = self.area() + other.area() - intersection;
        intersection / (union + epsilon)
    }

    /// Snap to the nearest pixel grid rectangle.
    pub fn pixel_rect(&self) -> PixelRect {
        PixelRect {
            y1: self.y1.round() as i64,
            x1: self.x1.round() as i64,
            y2: self.y2.round() as i64,
            x2: self.x2.round() as i64,
        }
    }
}

/// Integer pixel rectangle, half-open: rows `y1..y2`, columns `x1..x2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub y1: i64,
    pub x1: i64,
    pub y2: i64,
    pub x2: i64,
}

impl PixelRect {
    pub fn height(&self) -> usize {
        self.y2.saturating_sub(self.y1).max(0) as usize
    }

    pub fn width(&self) -> usize {
        self.x2.saturating_sub(self.x1).max(0) as usize
    }

    /// `height * width`, or `None` if that overflows.
    pub fn num_pixels(&self) -> Option<usize> {
        self.height().checked_mul(self.width())
    }

    pub fn is_empty(&self) -> bool {
        self.height() == 0 || self.width() == 0
    }

    /// Max of the mins and min of the maxes. May be empty.
    pub fn overlap(&self, other: &PixelRect) -> PixelRect {
        PixelRect {
            y1: self.y1.max(other.y1),
            x1: self.x1.max(other.x1),
            y2: self.y2.min(other.y2),
            x2: self.x2.min(other.x2),
        }
    }
}

/// Split padded box rows into the indices of present rows and their boxes.
pub fn present_boxes(boxes: &[Option<BBox>]) -> (Vec<usize>, Vec<BBox>) {
    boxes
        .iter()
        .enumerate()
        .filter_map(|(i, b)| b.map(|b| (i, b)))
        .unzip()
}

/// Binary occupancy grid, row-major: pixel `(y, x)` is at `y * w + x`.
///
/// Any non-zero byte counts as occupied.
#[derive(Debug, Clone, PartialEq)]
pub struct Mask {
    pub h: usize,
    pub w: usize,
    pub data: Vec<u8>,
}

impl Mask {
    pub fn new(h: usize, w: usize, data: Vec<u8>) -> Result<Self> {
        if data.len() != h * w {
            return Err(EvalError::InvalidInput(format!(
                "mask buffer has {} values, expected {}x{}",
                data.len(),
                h,
                w
            )));
        }
        Ok(Mask { h, w, data })
    }

    pub fn zeros(h: usize, w: usize) -> Self {
        Mask {
            h,
            w,
            data: vec![0; h * w],
        }
    }

    /// Occupancy at `(y, x)`; coordinates outside the frame read as empty.
    pub fn get(&self, y: i64, x: i64) -> bool {
        if y < 0 || x < 0 || y as usize >= self.h || x as usize >= self.w {
            return false;
        }
        self.data[y as usize * self.w + x as usize] != 0
    }

    pub fn set(&mut self, y: usize, x: usize, value: bool) {
        self.data[y * self.w + x] = value as u8;
    }

    /// Number of occupied pixels.
    pub fn area(&self) -> u64 {
        self.data.iter().filter(|&&v| v != 0).count() as u64
    }
}

/// Dense score matrix: rows are ground-truth instances, columns predictions.
#[derive(Debug, Clone, PartialEq)]
pub struct IouMatrix {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl IouMatrix {
    pub fn zeros(rows: usize, cols: usize) -> Self {
        IouMatrix {
            rows,
            cols,
            data: vec![0.0; rows * cols],
        }
    }

    /// Build from nested rows. All rows must share one length.
    pub fn from_rows(rows: Vec<Vec<f64>>) -> Result<Self> {
        let cols = rows.first().map_or(0, |r| r.len());
        if let Some(bad) = rows.iter().position(|r| r.len() != cols) {
            return Err(EvalError::InvalidInput(format!(
                "row {} has {} columns, expected {}",
                bad,
                rows[bad].len(),
                cols
            )));
        }
        let n = rows.len();
        Ok(IouMatrix {
            rows: n,
            cols,
            data: rows.into_iter().flatten().collect(),
        })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.data[i * self.cols + j]
    }

    pub fn set(&mut self, i: usize, j: usize, value: f64) {
        self.data[i * self.cols + j] = value;
    }

    pub fn row(&self, i: usize) -> &[f64] {
        &self.data[i * self.cols..(i + 1) * self.cols]
    }

    /// Zero every entry of column `j`.
    pub fn clear_column(&mut self, j: usize) {
        for i in 0..self.rows {
            self.data[i * self.cols + j] = 0.0;
        }
    }

    pub fn to_rows(&self) -> Vec<Vec<f64>> {
        (0..self.rows).map(|i| self.row(i).to_vec()).collect()
    }

    /// Place this matrix's cells at `(rows[i], cols[j])` of a zeroed
    /// `shape` matrix, undoing [`present_boxes`] on both axes.
    pub fn scatter(&self, rows: &[usize], cols: &[usize], shape: (usize, usize)) -> IouMatrix {
        let mut out = IouMatrix::zeros(shape.0, shape.1);
        for (i, &r) in rows.iter().enumerate() {
            for (j, &c) in cols.iter().enumerate() {
                out.set(r, c, self.get(i, j));
            }
        }
        out
    }

    /// Row-major backing slice.
    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }
}

impl Index<(usize, usize)> for IouMatrix {
    type Output = f64;

    fn index(&self, (i, j): (usize, usize)) -> &f64 {
        &self.data[i * self.cols + j]
    }
}

/// Result of greedy one-to-one matching, one entry per ground-truth row.
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    /// Matched IoU per ground-truth row, 0 when unmatched.
    pub scores: Vec<f64>,
    /// Matched prediction column per ground-truth row.
    pub matches: Vec<Option<usize>>,
    /// Copy of the input with every claimed column zeroed except its matched cell.
    pub resolved: IouMatrix,
}

impl Assignment {
    /// Matches with `-1` marking unmatched rows.
    pub fn match_indices(&self) -> Vec<i64> {
        self.matches
            .iter()
            .map(|m| m.map_or(-1, |j| j as i64))
            .collect()
    }

    pub fn matched_count(&self) -> usize {
        self.matches.iter().filter(|m| m.is_some()).count()
    }
}

/// Top-level COCO-format dataset.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Dataset {
    #[serde(default)]
    pub images: Vec<Image>,
    #[serde(default)]
    pub annotations: Vec<Annotation>,
    #[serde(default)]
    pub categories: Vec<Category>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Image {
    pub id: u64,
    #[serde(default)]
    pub file_name: String,
    pub height: u32,
    pub width: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Annotation {
    #[serde(default)]
    pub id: u64,
    pub image_id: u64,
    pub category_id: u64,
    /// COCO `[x, y, w, h]`.
    #[serde(default)]
    pub bbox: Option<[f64; 4]>,
    #[serde(default)]
    pub area: Option<f64>,
    #[serde(default)]
    pub segmentation: Option<Segmentation>,
    #[serde(default, deserialize_with = "deserialize_iscrowd")]
    pub iscrowd: bool,
    /// Detection score (present only in result annotations).
    #[serde(default)]
    pub score: Option<f64>,
}

fn deserialize_iscrowd<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum IsCrowd {
        Bool(bool),
        Int(u8),
    }
    match IsCrowd::deserialize(deserializer)? {
        IsCrowd::Bool(b) => Ok(b),
        IsCrowd::Int(i) => Ok(i != 0),
    }
}

/// Instance segmentation, column-major RLE as COCO stores it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Segmentation {
    CompressedRle { size: [u32; 2], counts: String },
    UncompressedRle { size: [u32; 2], counts: Vec<u32> },
    /// Accepted on load; not rasterised.
    Polygon(Vec<Vec<f64>>),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Category {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub supercategory: Option<String>,
}

/// Run-length encoding for masks.
#[derive(Debug, Clone, PartialEq)]
pub struct Rle {
    pub h: u32,
    pub w: u32,
    /// Run counts: alternating runs of 0s and 1s, starting with 0s, column-major.
    pub counts: Vec<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_padded_skips_zero_rows() {
        assert_eq!(BBox::from_padded([0.0; 4]), None);
        assert_eq!(
            BBox::from_padded([0.0, 0.0, 4.0, 0.0]),
            Some(BBox::new(0.0, 0.0, 4.0, 0.0))
        );
    }

    #[test]
    fn test_from_xywh() {
        let bb = BBox::from_xywh([2.0, 3.0, 10.0, 5.0]);
        assert_eq!(bb, BBox::new(3.0, 2.0, 8.0, 12.0));
        assert_eq!(bb.area(), 50.0);
    }

    #[test]
    fn test_inverted_box_has_no_intersection() {
        let inverted = BBox::new(10.0, 10.0, 0.0, 0.0);
        let normal = BBox::new(0.0, 0.0, 10.0, 10.0);
        assert_eq!(inverted.intersection(&normal), 0.0);
    }

    #[test]
    fn test_pixel_rect_overlap() {
        let a = BBox::new(0.0, 0.0, 10.0, 10.0).pixel_rect();
        let b = BBox::new(5.0, 8.0, 20.0, 12.0).pixel_rect();
        let o = a.overlap(&b);
        assert_eq!(
            o,
            PixelRect {
                y1: 5,
                x1: 8,
                y2: 10,
                x2: 10
            }
        );
        assert_eq!((o.height(), o.width()), (5, 2));

        let far = BBox::new(20.0, 20.0, 30.0, 30.0).pixel_rect();
        assert!(a.overlap(&far).is_empty());
    }

    #[test]
    fn test_pixel_rect_saturates() {
        let r = BBox::new(-1e19, 0.0, 1e19, 1.0).pixel_rect();
        assert_eq!(r.height(), i64::MAX as usize);
        assert_eq!(r.width(), 1);
        let wide = BBox::new(-1e19, -1e19, 1e19, 1e19).pixel_rect();
        assert_eq!(wide.num_pixels(), None);
        let inverted = PixelRect {
            y1: i64::MAX,
            x1: 0,
            y2: i64::MIN,
            x2: 1,
        };
        assert!(inverted.is_empty());
    }

    #[test]
    fn test_padded_rows_scatter_back() {
        let boxes = [
            BBox::from_padded([0.0; 4]),
            BBox::from_padded([0.0, 0.0, 10.0, 10.0]),
            BBox::from_padded([0.0; 4]),
        ];
        let (rows, present) = present_boxes(&boxes);
        assert_eq!(rows, vec![1]);
        assert_eq!(present, vec![BBox::new(0.0, 0.0, 10.0, 10.0)]);

        let dense = IouMatrix::from_rows(vec![vec![0.9, 0.4]]).unwrap();
        let full = dense.scatter(&rows, &[0, 2], (3, 3));
        assert_eq!(
            full.to_rows(),
            vec![
                vec![0.0, 0.0, 0.0],
                vec![0.9, 0.0, 0.4],
                vec![0.0, 0.0, 0.0],
            ]
        );
        // padded ground truth rows never match
        let a = crate::assign::assign(&full, 0.5);
        assert_eq!(a.match_indices(), vec![-1, 0, -1]);
        assert_eq!(a.scores, vec![0.0, 0.9, 0.0]);
    }

    #[test]
    fn test_mask_rejects_bad_buffer() {
        assert!(Mask::new(2, 3, vec![0; 5]).is_err());
        let m = Mask::new(2, 3, vec![0, 1, 0, 2, 0, 0]).unwrap();
        assert_eq!(m.area(), 2);
        assert!(m.get(1, 0));
        assert!(!m.get(-1, 0));
        assert!(!m.get(0, 3));
    }

    #[test]
    fn test_matrix_from_ragged_rows_fails() {
        assert!(IouMatrix::from_rows(vec![vec![0.1, 0.2], vec![0.3]]).is_err());
        let m = IouMatrix::from_rows(vec![vec![0.1, 0.2], vec![0.3, 0.4]]).unwrap();
        assert_eq!(m.shape(), (2, 2));
        assert_eq!(m[(1, 0)], 0.3);
    }

    #[test]
    fn test_iscrowd_int_or_bool() {
        let a: Annotation =
            serde_json::from_str(r#"{"image_id": 1, "category_id": 2, "iscrowd": 1}"#).unwrap();
        assert!(a.iscrowd);
        let b: Annotation =
            serde_json::from_str(r#"{"image_id": 1, "category_id": 2, "iscrowd": false}"#)
                .unwrap();
        assert!(!b.iscrowd);
    }
}
