//! Residual-based interval calibration.
//!
//! Half-widths are estimated per horizon step from held-out residuals, so
//! intervals widen with forecast distance when errors do.

use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};

use crate::error::{EngineResult, ForecastError};

/// How residuals become interval half-widths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntervalMethod {
    /// Normal quantile times the residual root-mean-square.
    Gaussian,
    /// Split-conformal: empirical quantile of absolute residuals.
    #[default]
    Conformal,
}

/// Calibrated per-step interval half-widths (in model units).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    pub level: f64,
    pub method: IntervalMethod,
    pub half_widths: Vec<f64>,
    /// Number of residual windows used.
    pub samples: usize,
}

impl Calibration {
    /// Fit from residual rows (one row per window, one column per step).
    pub fn fit(residuals: &[Vec<f64>], level: f64, method: IntervalMethod) -> EngineResult<Self> {
        if !(level > 0.0 && level < 1.0) {
            return Err(ForecastError::InvalidConfig(format!(
                "interval level must be in (0, 1), got {}",
                level
            )));
        }
        let horizon = match residuals.first() {
            Some(row) => row.len(),
            None => {
                return Err(ForecastError::InsufficientData {
                    segment: "calibration residuals".to_string(),
                    required: 1,
                    available: 0,
                })
            }
        };
        if let Some(row) = residuals.iter().find(|r| r.len() != horizon) {
            return Err(ForecastError::ShapeMismatch {
                what: "residual row".to_string(),
                expected: horizon,
                actual: row.len(),
            });
        }

        let half_widths = match method {
            IntervalMethod::Gaussian => {
                let z = Normal::new(0.0, 1.0)
                    .map_err(|e| ForecastError::InvalidConfig(e.to_string()))?
                    .inverse_cdf(0.5 + level / 2.0);
                (0..horizon)
                    .map(|h| {
                        let ms = residuals.iter().map(|r| r[h] * r[h]).sum::<f64>()
                            / residuals.len() as f64;
                        z * ms.sqrt()
                    })
                    .collect()
            }
            IntervalMethod::Conformal => (0..horizon)
                .map(|h| {
                    let mut abs: Vec<f64> = residuals.iter().map(|r| r[h].abs()).collect();
                    abs.sort_by(|a, b| a.total_cmp(b));
                    conformal_quantile(&abs, level)
                })
                .collect(),
        };

        Ok(Self {
            level,
            method,
            half_widths,
            samples: residuals.len(),
        })
    }

    pub fn horizon(&self) -> usize {
        self.half_widths.len()
    }
}

/// The ceil((n+1)·level)-th smallest value, capped at the largest.
fn conformal_quantile(sorted: &[f64], level: f64) -> f64 {
    let n = sorted.len();
    let rank = ((n as f64 + 1.0) * level).ceil() as usize;
    sorted[rank.clamp(1, n) - 1]
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_conformal_quantile_rank() {
        let residuals: Vec<Vec<f64>> = (1..=9).map(|i| vec![i as f64]).collect();
        let cal = Calibration::fit(&residuals, 0.8, IntervalMethod::Conformal).unwrap();
        // ceil(10 * 0.8) = 8th smallest
        assert_eq!(cal.half_widths, vec![8.0]);
        assert_eq!(cal.samples, 9);
    }

    #[test]
    fn test_conformal_uses_absolute_residuals() {
        let residuals = vec![vec![-5.0], vec![1.0], vec![2.0]];
        let cal = Calibration::fit(&residuals, 0.99, IntervalMethod::Conformal).unwrap();
        assert_eq!(cal.half_widths, vec![5.0]);
    }

    #[test]
    fn test_gaussian_width() {
        let residuals = vec![vec![1.0, 2.0], vec![-1.0, -2.0]];
        let cal = Calibration::fit(&residuals, 0.95, IntervalMethod::Gaussian).unwrap();
        assert_relative_eq!(cal.half_widths[0], 1.959964, epsilon = 1e-5);
        assert_relative_eq!(cal.half_widths[1], 2.0 * 1.959964, epsilon = 1e-5);
    }

    #[test]
    fn test_rejects_bad_level() {
        assert!(Calibration::fit(&[vec![1.0]], 1.0, IntervalMethod::Gaussian).is_err());
        assert!(Calibration::fit(&[vec![1.0]], 0.0, IntervalMethod::Conformal).is_err());
    }

    #[test]
    fn test_rejects_empty_residuals() {
        assert!(matches!(
            Calibration::fit(&[], 0.9, IntervalMethod::Conformal),
            Err(ForecastError::InsufficientData { .. })
        ));
    }
}
