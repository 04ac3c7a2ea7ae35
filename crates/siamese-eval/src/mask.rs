//! Mask operations: COCO RLE decoding, polygon and box rasterisation,
//! cropping and the bilinear resize used to bring mini-masks back to their box extent.
//!
//! Masks are row-major (see [`Mask`]); RLE counts are column-major as COCO
//! writes them.

use crate::error::{EvalError, Result};
use crate::types::{BBox, Mask, PixelRect, Rle, Segmentation};

/// 5-bit groups per compressed count; 12 groups fill 60 bits of an `i64`.
pub const MAX_VARINT_GROUPS: usize = 12;

/// Largest box extent, in pixels, that is materialised as a mask.
pub const MAX_MASK_PIXELS: usize = 1 << 28;

/// Fail with `InvalidInput` if `rect` is too large to hold as a mask.
pub fn check_extent(rect: &PixelRect) -> Result<()> {
    match rect.num_pixels() {
        Some(n) if n <= MAX_MASK_PIXELS => Ok(()),
        _ => Err(EvalError::InvalidInput(format!(
            "box extent {}x{} exceeds {} pixels",
            rect.height(),
            rect.width(),
            MAX_MASK_PIXELS
        ))),
    }
}

/// Decode a column-major RLE into a row-major mask of size `h x w`.
///
/// Runs past the end of the frame are truncated.
pub fn decode(rle: &Rle) -> Mask {
    let h = rle.h as usize;
    let w = rle.w as usize;
    let n = h * w;
    let mut mask = Mask::zeros(h, w);
    let mut idx = 0usize;
    let mut on = false;
    for &c in &rle.counts {
        let end = (idx + c as usize).min(n);
        if on {
            for k in idx..end {
                // column-major k = x * h + y
                mask.data[(k % h) * w + k / h] = 1;
            }
        }
        idx = end;
        on = !on;
    }
    mask
}

/// Decompress a COCO counts string into an RLE.
///
/// Each count is a 5-bit-group little-endian varint offset by 48, with bit
/// `0x20` as the continuation flag and bit `0x10` of the last group as the
/// sign. From the fourth count on, values are stored as deltas against the
/// count two positions earlier. A count may span at most
/// [`MAX_VARINT_GROUPS`] groups.
pub fn rle_from_string(s: &str, h: u32, w: u32) -> Result<Rle> {
    let bytes = s.as_bytes();
    let mut counts: Vec<u32> = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let mut x: i64 = 0;
        let mut k = 0;
        loop {
            if k >= MAX_VARINT_GROUPS {
                return Err(EvalError::InvalidInput(format!(
                    "RLE count longer than {} groups",
                    MAX_VARINT_GROUPS
                )));
            }
            let b = bytes[i];
            if b < 48 {
                return Err(EvalError::InvalidInput(format!(
                    "invalid byte {:#x} in RLE counts string",
                    b
                )));
            }
            let c = (b - 48) as i64;
            i += 1;
            x |= (c & 0x1f) << (5 * k);
            k += 1;
            if c & 0x20 == 0 {
                if c & 0x10 != 0 {
                    x |= -1i64 << (5 * k);
                }
                break;
            }
            if i >= bytes.len() {
                return Err(EvalError::InvalidInput(
                    "truncated RLE counts string".to_string(),
                ));
            }
        }
        let m = counts.len();
        if m > 2 {
            x += counts[m - 2] as i64;
        }
        if x < 0 {
            return Err(EvalError::InvalidInput(format!(
                "negative run length {} in RLE counts string",
                x
            )));
        }
        counts.push(x as u32);
    }

    Ok(Rle { h, w, counts })
}

/// Decode an annotation's segmentation to a full-image mask.
///
/// RLE segmentations carry their own size; polygons are rasterised onto an
/// `h x w` frame.
pub fn from_segmentation(seg: &Segmentation, h: u32, w: u32) -> Result<Mask> {
    let rle = match seg {
        Segmentation::CompressedRle { size, counts } => rle_from_string(counts, size[0], size[1])?,
        Segmentation::UncompressedRle { size, counts } => Rle {
            h: size[0],
            w: size[1],
            counts: counts.clone(),
        },
        Segmentation::Polygon(polygons) => return Ok(fr_polys(polygons, h, w)),
    };
    Ok(decode(&rle))
}

/// Rasterise one polygon (`[x0, y0, x1, y1, ...]`) into column-major RLE.
///
/// Edges are walked on a 5x upsampled grid; a pixel is inside when its centre
/// lies below a downward crossing in its column. Matches the COCO mask API.
pub fn fr_poly(xy: &[f64], h: u32, w: u32) -> Rle {
    let k = xy.len() / 2;
    let n = h as i64 * w as i64;
    if k < 3 || n == 0 {
        return Rle {
            h,
            w,
            counts: vec![n as u32],
        };
    }

    let scale = 5.0f64;
    let mut x: Vec<i64> = (0..k).map(|j| (scale * xy[2 * j] + 0.5) as i64).collect();
    let mut y: Vec<i64> = (0..k).map(|j| (scale * xy[2 * j + 1] + 0.5) as i64).collect();
    x.push(x[0]);
    y.push(y[0]);

    // dense boundary points
    let mut u: Vec<i64> = Vec::new();
    let mut v: Vec<i64> = Vec::new();
    for j in 0..k {
        let (mut xs, mut xe, mut ys, mut ye) = (x[j], x[j + 1], y[j], y[j + 1]);
        let dx = xe.saturating_sub(xs).saturating_abs();
        let dy = ys.saturating_sub(ye).saturating_abs();
        let flip = (dx >= dy && xs > xe) || (dx < dy && ys > ye);
        if flip {
            std::mem::swap(&mut xs, &mut xe);
            std::mem::swap(&mut ys, &mut ye);
        }
        if dx >= dy {
            let s = if dx == 0 { 0.0 } else { (ye - ys) as f64 / dx as f64 };
            for d in 0..=dx {
                let t = if flip { dx - d } else { d };
                u.push(t + xs);
                v.push((ys as f64 + s * t as f64 + 0.5) as i64);
            }
        } else {
            let s = (xe - xs) as f64 / dy as f64;
            for d in 0..=dy {
                let t = if flip { dy - d } else { d };
                v.push(t + ys);
                u.push((xs as f64 + s * t as f64 + 0.5) as i64);
            }
        }
    }

    // column crossings, downsampled to pixel centres
    let mut starts: Vec<i64> = Vec::new();
    for j in 1..u.len() {
        if u[j] == u[j - 1] {
            continue;
        }
        let xd_raw = if u[j] < u[j - 1] { u[j] } else { u[j] - 1 };
        let xd = (xd_raw as f64 + 0.5) / scale - 0.5;
        if xd != xd.floor() || xd < 0.0 || xd > (w as f64 - 1.0) {
            continue;
        }
        let yd_raw = v[j].min(v[j - 1]);
        let yd = ((yd_raw as f64 + 0.5) / scale - 0.5).clamp(0.0, h as f64).ceil();
        starts.push(xd as i64 * h as i64 + yd as i64);
    }
    starts.push(n);
    starts.sort_unstable();

    // differences, folding zero-length runs into their neighbours
    let mut diffs = Vec::with_capacity(starts.len());
    let mut prev = 0i64;
    for &t in &starts {
        diffs.push(t - prev);
        prev = t;
    }
    let mut counts: Vec<u32> = Vec::with_capacity(diffs.len());
    let mut i = 0;
    while i < diffs.len() {
        if i > 0 && diffs[i] == 0 {
            if let (Some(last), Some(&next)) = (counts.last_mut(), diffs.get(i + 1)) {
                *last += next as u32;
            }
            i += 2;
        } else {
            counts.push(diffs[i] as u32);
            i += 1;
        }
    }

    Rle { h, w, counts }
}

/// Union of the polygons making up one object, as a row-major mask.
pub fn fr_polys(polygons: &[Vec<f64>], h: u32, w: u32) -> Mask {
    let mut mask = Mask::zeros(h as usize, w as usize);
    for poly in polygons {
        let part = decode(&fr_poly(poly, h, w));
        for (dst, &src) in mask.data.iter_mut().zip(&part.data) {
            *dst |= src;
        }
    }
    mask
}

/// Rasterise a box into an `h x w` mask, clamped to the frame.
///
/// Pixels from `floor(start)` up to `ceil(end)` are set on each axis.
pub fn fr_bbox(bb: &BBox, h: usize, w: usize) -> Mask {
    let mut mask = Mask::zeros(h, w);
    let ys = bb.y1.max(0.0).floor() as usize;
    let xs = bb.x1.max(0.0).floor() as usize;
    let ye = (bb.y2.max(0.0).ceil() as usize).min(h);
    let xe = (bb.x2.max(0.0).ceil() as usize).min(w);
    for y in ys..ye {
        for x in xs..xe {
            mask.set(y, x, true);
        }
    }
    mask
}

/// Copy the `rect` window out of `mask`. Pixels outside the frame are empty.
pub fn crop(mask: &Mask, rect: &PixelRect) -> Mask {
    let (h, w) = (rect.height(), rect.width());
    let mut out = Mask::zeros(h, w);
    for y in 0..h {
        for x in 0..w {
            if mask.get(rect.y1 + y as i64, rect.x1 + x as i64) {
                out.set(y, x, true);
            }
        }
    }
    out
}

/// Bilinear resize to `out_h x out_w`, returning interpolated occupancy in `[0, 1]`.
///
/// Samples at pixel centres (`(i + 0.5) * scale - 0.5`) and clamps to the
/// edge, so resizing to the same shape is the identity.
pub fn resize(mask: &Mask, out_h: usize, out_w: usize) -> Vec<f64> {
    let mut out = vec![0.0f64; out_h * out_w];
    if mask.h == 0 || mask.w == 0 {
        return out;
    }
    let sy = mask.h as f64 / out_h.max(1) as f64;
    let sx = mask.w as f64 / out_w.max(1) as f64;
    let value = |y: usize, x: usize| -> f64 {
        if mask.data[y * mask.w + x] != 0 {
            1.0
        } else {
            0.0
        }
    };

    for r in 0..out_h {
        let fy = ((r as f64 + 0.5) * sy - 0.5).clamp(0.0, (mask.h - 1) as f64);
        let y0 = fy.floor() as usize;
        let y1 = (y0 + 1).min(mask.h - 1);
        let ty = fy - y0 as f64;
        for c in 0..out_w {
            let fx = ((c as f64 + 0.5) * sx - 0.5).clamp(0.0, (mask.w - 1) as f64);
            let x0 = fx.floor() as usize;
            let x1 = (x0 + 1).min(mask.w - 1);
            let tx = fx - x0 as f64;
            let top = value(y0, x0) * (1.0 - tx) + value(y0, x1) * tx;
            let bottom = value(y1, x0) * (1.0 - tx) + value(y1, x1) * tx;
            out[r * out_w + c] = top * (1.0 - ty) + bottom * ty;
        }
    }
    out
}

/// Resize and binarise at `> 0.0`.
pub fn resize_binary(mask: &Mask, out_h: usize, out_w: usize) -> Mask {
    if mask.h == out_h && mask.w == out_w {
        return mask.clone();
    }
    let data = resize(mask, out_h, out_w)
        .into_iter()
        .map(|v| (v > 0.0) as u8)
        .collect();
    Mask {
        h: out_h,
        w: out_w,
        data,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_column_major() {
        // 3 rows x 4 cols, column-major runs
        // Col 0: [0,0,0], Col 1: [1,1,1], Col 2: [0,0,1], Col 3: [1,0,0]
        let rle = Rle {
            h: 3,
            w: 4,
            counts: vec![3, 3, 2, 2, 2],
        };
        let m = decode(&rle);
        #[rustfmt::skip]
        let expected = vec![
            0, 1, 0, 1,
            0, 1, 0, 0,
            0, 1, 1, 0,
        ];
        assert_eq!(m.data, expected);
        assert_eq!(m.area(), 5);
    }

    #[test]
    fn test_decode_truncates_overlong_runs() {
        let rle = Rle {
            h: 2,
            w: 2,
            counts: vec![1, 10],
        };
        assert_eq!(decode(&rle).data, vec![0, 1, 1, 1]);
    }

    #[test]
    fn test_rle_from_string_plain() {
        // '5' = 5, '3' = 3, "l2" = 28 | 2 << 5 = 92
        let rle = rle_from_string("53l2", 10, 10).unwrap();
        assert_eq!(rle.counts, vec![5, 3, 92]);
    }

    #[test]
    fn test_rle_from_string_delta_and_sign() {
        // fourth count is stored as 2 - 10 = -8 ('H')
        let rle = rle_from_string("5:3H", 4, 5).unwrap();
        assert_eq!(rle.counts, vec![5, 10, 3, 2]);
    }

    #[test]
    fn test_rle_from_string_rejects_truncated() {
        assert!(rle_from_string("l", 10, 10).is_err());
    }

    #[test]
    fn test_fr_bbox() {
        let m = fr_bbox(&BBox::new(1.0, 1.0, 3.0, 3.0), 4, 5);
        #[rustfmt::skip]
        let expected = vec![
            0, 0, 0, 0, 0,
            0, 1, 1, 0, 0,
            0, 1, 1, 0, 0,
            0, 0, 0, 0, 0,
        ];
        assert_eq!(m.data, expected);
    }

    #[test]
    fn test_crop_outside_frame_is_empty() {
        let m = Mask::new(2, 2, vec![1, 1, 1, 1]).unwrap();
        let c = crop(
            &m,
            &PixelRect {
                y1: -1,
                x1: 1,
                y2: 2,
                x2: 3,
            },
        );
        assert_eq!((c.h, c.w), (3, 2));
        assert_eq!(c.data, vec![0, 0, 1, 0, 1, 0]);
    }

    #[test]
    fn test_resize_same_shape_is_identity() {
        let m = Mask::new(2, 3, vec![1, 0, 1, 0, 1, 0]).unwrap();
        let r = resize(&m, 2, 3);
        assert_eq!(r, vec![1.0, 0.0, 1.0, 0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_resize_binary_upsamples_mini_mask() {
        // left column on, right column off
        let m = Mask::new(2, 2, vec![1, 0, 1, 0]).unwrap();
        let r = resize_binary(&m, 4, 4);
        // output columns sample at x = -0.25, 0.25, 0.75, 1.25 (clamped);
        // only the last lands fully on the empty column
        #[rustfmt::skip]
        let expected = vec![
            1, 1, 1, 0,
            1, 1, 1, 0,
            1, 1, 1, 0,
            1, 1, 1, 0,
        ];
        assert_eq!(r.data, expected);
    }

    #[test]
    fn test_resize_empty_source() {
        let m = Mask::zeros(0, 0);
        assert_eq!(resize_binary(&m, 2, 2).area(), 0);
    }

    #[test]
    fn test_rle_from_string_rejects_overlong_count() {
        // 'P' only sets the continuation bit
        let err = rle_from_string("PPPPPPPPPPPPPPPP0", 4, 4);
        assert!(matches!(err, Err(EvalError::InvalidInput(_))));
        // twelve groups still fit
        assert!(rle_from_string("PPPPPPPPPPP0", 4, 4).is_ok());
    }

    #[test]
    fn test_fr_poly_rectangle() {
        let rle = fr_poly(&[1.0, 1.0, 4.0, 1.0, 4.0, 3.0, 1.0, 3.0], 5, 6);
        assert_eq!(rle.counts, vec![6, 2, 3, 2, 3, 2, 12]);
        #[rustfmt::skip]
        let expected = vec![
            0, 0, 0, 0, 0, 0,
            0, 1, 1, 1, 0, 0,
            0, 1, 1, 1, 0, 0,
            0, 0, 0, 0, 0, 0,
            0, 0, 0, 0, 0, 0,
        ];
        assert_eq!(decode(&rle).data, expected);
    }

    #[test]
    fn test_fr_poly_triangle() {
        let m = decode(&fr_poly(&[0.0, 0.0, 4.0, 0.0, 0.0, 4.0], 5, 5));
        #[rustfmt::skip]
        let expected = vec![
            1, 1, 1, 0, 0,
            1, 1, 0, 0, 0,
            1, 0, 0, 0, 0,
            0, 0, 0, 0, 0,
            0, 0, 0, 0, 0,
        ];
        assert_eq!(m.data, expected);
    }

    #[test]
    fn test_fr_poly_degenerate() {
        let rle = fr_poly(&[0.0, 0.0, 3.0, 3.0], 4, 4);
        assert_eq!(rle.counts, vec![16]);
    }

    #[test]
    fn test_polygon_segmentation_decodes() {
        let seg = Segmentation::Polygon(vec![
            vec![0.0, 0.0, 10.0, 0.0, 10.0, 10.0, 0.0, 10.0],
            vec![1.0, 1.0, 4.0, 1.0, 4.0, 3.0, 1.0, 3.0],
        ]);
        let m = from_segmentation(&seg, 20, 20).unwrap();
        assert_eq!((m.h, m.w), (20, 20));
        // the second polygon lies inside the first
        assert_eq!(m.area(), 100);
        assert!(m.get(9, 9) && !m.get(10, 10));
    }
}
