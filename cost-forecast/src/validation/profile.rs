//! Descriptive statistics for a series or covariate column.

use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

/// Five-number summary, linearly interpolated between order statistics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quantiles {
    pub min: f64,
    pub q25: f64,
    pub median: f64,
    pub q75: f64,
    pub max: f64,
}

impl Quantiles {
    pub fn iqr(&self) -> f64 {
        self.q75 - self.q25
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesProfile {
    pub count: usize,
    pub mean: f64,
    /// Sample standard deviation; `NaN` below two points.
    pub std_dev: f64,
    pub quantiles: Quantiles,
    pub outlier_factor: f64,
    /// Values outside `[q25 - k*IQR, q75 + k*IQR]`.
    pub outliers: usize,
}

impl SeriesProfile {
    /// Profile `values` with outlier fences at `outlier_factor` IQRs.
    /// `None` for an empty slice.
    pub fn compute(values: &[f64], outlier_factor: f64) -> Option<Self> {
        if values.is_empty() {
            return None;
        }

        let mut sorted = values.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let quantiles = Quantiles {
            min: sorted[0],
            q25: quantile(&sorted, 0.25),
            median: quantile(&sorted, 0.5),
            q75: quantile(&sorted, 0.75),
            max: sorted[sorted.len() - 1],
        };

        Some(Self {
            count: values.len(),
            mean: values.mean(),
            std_dev: values.std_dev(),
            quantiles,
            outlier_factor,
            outliers: count_outliers(values, &quantiles, outlier_factor),
        })
    }

    pub fn summary(&self) -> String {
        format!(
            "n={} mean={:.3} std={:.3} min={:.3} q25={:.3} median={:.3} q75={:.3} max={:.3} outliers({}x IQR)={}",
            self.count,
            self.mean,
            self.std_dev,
            self.quantiles.min,
            self.quantiles.q25,
            self.quantiles.median,
            self.quantiles.q75,
            self.quantiles.max,
            self.outlier_factor,
            self.outliers
        )
    }
}

/// Quantile of sorted data with linear interpolation at rank `p * (n - 1)`.
pub fn quantile(sorted: &[f64], p: f64) -> f64 {
    let pos = p.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
}

fn count_outliers(values: &[f64], q: &Quantiles, factor: f64) -> usize {
    let lower = q.q25 - factor * q.iqr();
    let upper = q.q75 + factor * q.iqr();
    values.iter().filter(|&&v| v < lower || v > upper).count()
}
