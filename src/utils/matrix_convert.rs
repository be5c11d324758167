//! Matrix conversion utilities for the prift library.
//!
//! This module provides functions to convert between the matrix types used
//! internally:
//! - ndarray (Array2, Array1), the public-facing types
//! - faer (Mat, Col), used for the dense normal-equation products
//!
//! All numeric work in the crate is f64, so the conversions are monomorphic.

use crate::error::Result;
use faer::{Col, Mat};
use ndarray::{Array1, Array2};

/// Convert an ndarray Array2 to a faer Mat.
///
/// # Arguments
///
/// * `arr` - The ndarray Array2 to convert
///
/// # Returns
///
/// * A faer Mat with the same data
pub fn ndarray_to_faer(arr: &Array2<f64>) -> Result<Mat<f64>> {
    let rows = arr.nrows();
    let cols = arr.ncols();

    // ndarray is row-major by default, faer is column-major
    let mut mat = Mat::zeros(rows, cols);
    for i in 0..rows {
        for j in 0..cols {
            *mat.get_mut(i, j) = arr[[i, j]];
        }
    }

    Ok(mat)
}

/// Convert a faer Mat to an ndarray Array2.
///
/// # Arguments
///
/// * `mat` - The faer Mat to convert
///
/// # Returns
///
/// * An ndarray Array2 with the same data
pub fn faer_to_ndarray(mat: &Mat<f64>) -> Result<Array2<f64>> {
    let rows = mat.nrows();
    let cols = mat.ncols();

    // Array2::zeros handles the empty case without touching any element
    let mut arr = Array2::zeros((rows, cols));
    for i in 0..rows {
        for j in 0..cols {
            arr[[i, j]] = *mat.get(i, j);
        }
    }

    Ok(arr)
}

/// Convert an ndarray Array1 to a faer Col (column vector).
///
/// # Arguments
///
/// * `arr` - The ndarray Array1 to convert
///
/// # Returns
///
/// * A faer Col with the same data
pub fn ndarray_vec_to_faer(arr: &Array1<f64>) -> Result<Col<f64>> {
    let n = arr.len();

    let mut col = Col::zeros(n);
    for i in 0..n {
        *col.get_mut(i) = arr[i];
    }

    Ok(col)
}

/// Convert a faer Col (column vector) to an ndarray Array1.
///
/// # Arguments
///
/// * `col` - The faer Col to convert
///
/// # Returns
///
/// * An ndarray Array1 with the same data
pub fn faer_vec_to_ndarray(col: &Col<f64>) -> Result<Array1<f64>> {
    let n = col.nrows();

    let mut arr = Array1::zeros(n);
    for i in 0..n {
        arr[i] = *col.get(i);
    }

    Ok(arr)
}
