//! Utility functions and helpers for the prift library.

pub mod linalg;
pub mod matrix_convert;

// Re-export commonly used utilities
pub use matrix_convert::{
    faer_to_ndarray, faer_vec_to_ndarray, ndarray_to_faer, ndarray_vec_to_faer,
};
