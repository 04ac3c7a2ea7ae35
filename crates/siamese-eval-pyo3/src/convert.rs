use numpy::ndarray::{Array2, ArrayView2, ArrayView3};
use numpy::{IntoPyArray, PyArray2};
use pyo3::exceptions::{PyIOError, PyValueError};
use pyo3::prelude::*;
use siamese_core::{BBox, EvalError, IouMatrix, Mask};

pub fn to_py_err(e: EvalError) -> PyErr {
    match e {
        EvalError::InvalidInput(msg) => PyValueError::new_err(msg),
        other => PyIOError::new_err(other.to_string()),
    }
}

/// Rows of a zero-padded `[N, (y1, x1, y2, x2)]` array; padding rows are `None`.
pub fn boxes_from_py(arr: ArrayView2<'_, f64>) -> PyResult<Vec<Option<BBox>>> {
    if arr.ncols() != 4 {
        return Err(PyValueError::new_err(format!(
            "boxes must have shape [N, 4], got [{}, {}]",
            arr.nrows(),
            arr.ncols()
        )));
    }
    Ok(arr
        .rows()
        .into_iter()
        .map(|r| BBox::from_padded([r[0], r[1], r[2], r[3]]))
        .collect())
}

/// Instance-first `[N, H, W]` masks.
pub fn masks_from_py(arr: ArrayView3<'_, bool>) -> Vec<Mask> {
    let (n, h, w) = arr.dim();
    (0..n)
        .map(|k| Mask {
            h,
            w,
            data: arr
                .index_axis(numpy::ndarray::Axis(0), k)
                .iter()
                .map(|&v| v as u8)
                .collect(),
        })
        .collect()
}

pub fn matrix_from_py(arr: ArrayView2<'_, f64>) -> IouMatrix {
    let mut m = IouMatrix::zeros(arr.nrows(), arr.ncols());
    for ((i, j), &v) in arr.indexed_iter() {
        m.set(i, j, v);
    }
    m
}

pub fn matrix_to_py<'py>(py: Python<'py>, m: &IouMatrix) -> PyResult<Bound<'py, PyArray2<f64>>> {
    let arr = Array2::from_shape_vec(m.shape(), m.as_slice().to_vec())
        .map_err(|e| PyValueError::new_err(e.to_string()))?;
    Ok(arr.into_pyarray(py))
}
