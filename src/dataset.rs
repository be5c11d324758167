//! Measured scattering data and its acquisition geometry.

use crate::error::{PriftError, Result};
use ndarray::Array1;
use serde::{Deserialize, Serialize};

/// One scattering dataset: momentum transfer q, intensity I and its
/// uncertainty, an optional fitting window [q_min, q_max], and the slit
/// dimensions of the instrument (zero means no smearing on that axis).
///
/// The arrays can be assigned independently; their lengths are only
/// required to agree when a solve is attempted. Assigning q values is
/// validated immediately: every q must be strictly positive.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Dataset {
    x: Array1<f64>,
    y: Array1<f64>,
    err: Array1<f64>,
    q_min: Option<f64>,
    q_max: Option<f64>,
    slit_width: f64,
    slit_height: f64,
}

impl Dataset {
    /// Create an empty dataset.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a dataset from the three measurement arrays.
    ///
    /// # Arguments
    ///
    /// * `x` - Momentum transfer values, all strictly positive
    /// * `y` - Measured intensities
    /// * `err` - Intensity uncertainties
    ///
    /// # Errors
    ///
    /// * `PriftError::DimensionMismatch` if the lengths differ
    /// * `PriftError::InvalidInput` if any q is non-positive
    pub fn from_arrays(x: Array1<f64>, y: Array1<f64>, err: Array1<f64>) -> Result<Self> {
        if x.len() != y.len() || x.len() != err.len() {
            return Err(PriftError::DimensionMismatch(format!(
                "x has {} points, y has {}, err has {}",
                x.len(),
                y.len(),
                err.len()
            )));
        }
        let mut data = Self::new();
        data.set_x(x)?;
        data.y = y;
        data.err = err;
        Ok(data)
    }

    /// Assign the q array. Fails immediately if any value is non-positive.
    pub fn set_x(&mut self, x: Array1<f64>) -> Result<()> {
        if let Some(bad) = x.iter().find(|&&q| !(q > 0.0)) {
            return Err(PriftError::InvalidInput(format!(
                "q values must be positive, got {}",
                bad
            )));
        }
        self.x = x;
        Ok(())
    }

    pub fn set_y(&mut self, y: Array1<f64>) {
        self.y = y;
    }

    pub fn set_err(&mut self, err: Array1<f64>) {
        self.err = err;
    }

    pub fn x(&self) -> &Array1<f64> {
        &self.x
    }

    pub fn y(&self) -> &Array1<f64> {
        &self.y
    }

    pub fn err(&self) -> &Array1<f64> {
        &self.err
    }

    pub fn set_q_min(&mut self, q_min: Option<f64>) {
        self.q_min = q_min;
    }

    pub fn set_q_max(&mut self, q_max: Option<f64>) {
        self.q_max = q_max;
    }

    pub fn q_min(&self) -> Option<f64> {
        self.q_min
    }

    pub fn q_max(&self) -> Option<f64> {
        self.q_max
    }

    /// Set the slit width used for resolution smearing.
    pub fn set_slit_width(&mut self, width: f64) -> Result<()> {
        if width < 0.0 {
            return Err(PriftError::InvalidInput(format!(
                "slit width must be non-negative, got {}",
                width
            )));
        }
        self.slit_width = width;
        Ok(())
    }

    /// Set the slit height used for resolution smearing.
    pub fn set_slit_height(&mut self, height: f64) -> Result<()> {
        if height < 0.0 {
            return Err(PriftError::InvalidInput(format!(
                "slit height must be non-negative, got {}",
                height
            )));
        }
        self.slit_height = height;
        Ok(())
    }

    pub fn slit_width(&self) -> f64 {
        self.slit_width
    }

    pub fn slit_height(&self) -> f64 {
        self.slit_height
    }

    pub fn is_smeared(&self) -> bool {
        self.slit_width > 0.0 || self.slit_height > 0.0
    }

    /// Number of stored q points.
    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    /// Verify the three arrays agree in length.
    pub fn check_consistent(&self) -> Result<()> {
        if self.x.len() != self.y.len() || self.x.len() != self.err.len() {
            return Err(PriftError::DimensionMismatch(format!(
                "x has {} points, y has {}, err has {}",
                self.x.len(),
                self.y.len(),
                self.err.len()
            )));
        }
        Ok(())
    }

    /// Indices of the points inside the fitting window, in q order as stored.
    pub fn active_indices(&self) -> Vec<usize> {
        self.x
            .iter()
            .enumerate()
            .filter(|(_, &q)| {
                self.q_min.map_or(true, |lo| q >= lo) && self.q_max.map_or(true, |hi| q <= hi)
            })
            .map(|(i, _)| i)
            .collect()
    }
}
