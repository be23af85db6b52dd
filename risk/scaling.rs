//! Batch-relative standardization.
//!
//! Every upload is centred and scaled with the mean and population standard
//! deviation of the rows in that upload, not with statistics stored from
//! training. A patient's standardized values, and therefore their score,
//! depend on the other patients in the same batch. Downstream thresholds and
//! decile tables were calibrated against this behavior, so it is kept as is.

use ndarray::{Array2, ArrayView2, Axis};

/// Per-column statistics of one batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchScaler {
    means: Vec<f64>,
    scales: Vec<f64>,
    constant: Vec<bool>,
}

impl BatchScaler {
    /// Computes column means and population (`ddof = 0`) standard deviations.
    ///
    /// A column whose values are all identical is flagged constant; it has no
    /// spread to divide by and standardizes to 0.
    pub fn fit(x: ArrayView2<f64>) -> Self {
        let n = x.nrows();
        let mut means = Vec::with_capacity(x.ncols());
        let mut scales = Vec::with_capacity(x.ncols());
        let mut constant = Vec::with_capacity(x.ncols());

        for column in x.axis_iter(Axis(1)) {
            let first = column.iter().next().copied();
            let is_constant = n == 0 || column.iter().all(|&v| Some(v) == first);
            if is_constant {
                means.push(first.unwrap_or(0.0));
                scales.push(1.0);
                constant.push(true);
                continue;
            }

            let mean = column.sum() / n as f64;
            let variance = column
                .iter()
                .map(|&v| (v - mean) * (v - mean))
                .sum::<f64>()
                / n as f64;
            let std_dev = variance.sqrt();
            if std_dev > 0.0 && std_dev.is_finite() {
                means.push(mean);
                scales.push(std_dev);
                constant.push(false);
            } else {
                means.push(mean);
                scales.push(1.0);
                constant.push(true);
            }
        }

        Self {
            means,
            scales,
            constant,
        }
    }

    pub fn means(&self) -> &[f64] {
        &self.means
    }

    pub fn scales(&self) -> &[f64] {
        &self.scales
    }

    pub fn constant_columns(&self) -> usize {
        self.constant.iter().filter(|&&c| c).count()
    }

    pub fn transform(&self, x: ArrayView2<f64>) -> Array2<f64> {
        let mut out = x.to_owned();
        for (j, mut column) in out.axis_iter_mut(Axis(1)).enumerate() {
            if self.constant[j] {
                column.fill(0.0);
            } else {
                let mean = self.means[j];
                let inv = 1.0 / self.scales[j];
                column.mapv_inplace(|v| (v - mean) * inv);
            }
        }
        out
    }
}

/// Fits a scaler on `x` and applies it to the same rows.
pub fn standardize_batch(x: ArrayView2<f64>) -> Array2<f64> {
    let scaler = BatchScaler::fit(x);
    if scaler.constant_columns() > 0 {
        log::debug!(
            "{} of {} feature columns have zero variance in this batch and standardize to 0",
            scaler.constant_columns(),
            x.ncols()
        );
    }
    scaler.transform(x)
}
