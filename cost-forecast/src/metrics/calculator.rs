//! Forecast error accumulation.
//!
//! Observations are added one forecast at a time; totals are kept per horizon
//! step so both per-step and pooled metrics come from the same pass.

use serde::{Deserialize, Serialize};

use crate::error::{EngineResult, ForecastError};

/// Error metrics for one horizon step, or pooled over all steps.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForecastMetrics {
    /// Number of (actual, predicted) pairs.
    pub count: usize,
    pub mae: f64,
    /// Mean absolute percentage error in percent. Zero actuals are skipped;
    /// `None` when every actual was zero.
    pub mape: Option<f64>,
    pub rmse: f64,
    /// Fraction of actuals inside `[lower, upper]`.
    pub coverage: Option<f64>,
    pub mean_interval_width: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Totals {
    count: usize,
    abs_err: f64,
    sq_err: f64,
    pct_err: f64,
    pct_count: usize,
    interval_count: usize,
    covered: usize,
    width: f64,
}

impl Totals {
    fn merge(&mut self, other: &Totals) {
        self.count += other.count;
        self.abs_err += other.abs_err;
        self.sq_err += other.sq_err;
        self.pct_err += other.pct_err;
        self.pct_count += other.pct_count;
        self.interval_count += other.interval_count;
        self.covered += other.covered;
        self.width += other.width;
    }

    fn metrics(&self) -> ForecastMetrics {
        let n = self.count.max(1) as f64;
        let intervals = self.interval_count as f64;
        ForecastMetrics {
            count: self.count,
            mae: self.abs_err / n,
            mape: (self.pct_count > 0).then(|| self.pct_err / self.pct_count as f64 * 100.0),
            rmse: (self.sq_err / n).sqrt(),
            coverage: (self.interval_count > 0).then(|| self.covered as f64 / intervals),
            mean_interval_width: (self.interval_count > 0).then(|| self.width / intervals),
        }
    }
}

/// Bounds for one forecast, aligned with its points.
#[derive(Debug, Clone, Copy)]
pub struct IntervalBounds<'a> {
    pub lower: &'a [f64],
    pub upper: &'a [f64],
}

/// Accumulates forecast errors per horizon step.
#[derive(Debug, Clone)]
pub struct MetricsCalculator {
    steps: Vec<Totals>,
}

impl MetricsCalculator {
    pub fn new(horizon: usize) -> Self {
        Self {
            steps: vec![Totals::default(); horizon],
        }
    }

    pub fn horizon(&self) -> usize {
        self.steps.len()
    }

    /// Number of forecasts added.
    pub fn forecasts(&self) -> usize {
        self.steps.first().map(|s| s.count).unwrap_or(0)
    }

    /// Record one forecast against its actuals.
    pub fn add(
        &mut self,
        actual: &[f64],
        predicted: &[f64],
        interval: Option<IntervalBounds<'_>>,
    ) -> EngineResult<()> {
        let horizon = self.horizon();
        for (what, len) in [("actual values", actual.len()), ("predicted values", predicted.len())] {
            if len != horizon {
                return Err(ForecastError::ShapeMismatch {
                    what: what.to_string(),
                    expected: horizon,
                    actual: len,
                });
            }
        }
        if let Some(bounds) = &interval {
            if bounds.lower.len() != horizon || bounds.upper.len() != horizon {
                return Err(ForecastError::ShapeMismatch {
                    what: "interval bounds".to_string(),
                    expected: horizon,
                    actual: bounds.lower.len().min(bounds.upper.len()),
                });
            }
        }

        for (h, totals) in self.steps.iter_mut().enumerate() {
            let err = predicted[h] - actual[h];
            totals.count += 1;
            totals.abs_err += err.abs();
            totals.sq_err += err * err;
            if actual[h] != 0.0 {
                totals.pct_err += (err / actual[h]).abs();
                totals.pct_count += 1;
            }
            if let Some(bounds) = &interval {
                totals.interval_count += 1;
                totals.width += bounds.upper[h] - bounds.lower[h];
                if bounds.lower[h] <= actual[h] && actual[h] <= bounds.upper[h] {
                    totals.covered += 1;
                }
            }
        }
        Ok(())
    }

    /// Metrics for each step, index 0 being one step ahead.
    pub fn per_step(&self) -> Vec<ForecastMetrics> {
        self.steps.iter().map(Totals::metrics).collect()
    }

    /// Metrics pooled over every step of every forecast.
    pub fn aggregate(&self) -> ForecastMetrics {
        let mut pooled = Totals::default();
        for totals in &self.steps {
            pooled.merge(totals);
        }
        pooled.metrics()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_point_metrics() {
        let mut calc = MetricsCalculator::new(2);
        calc.add(&[10.0, 20.0], &[12.0, 20.0], None).unwrap();
        calc.add(&[10.0, 40.0], &[10.0, 36.0], None).unwrap();

        let steps = calc.per_step();
        assert_relative_eq!(steps[0].mae, 1.0);
        assert_relative_eq!(steps[0].rmse, 2.0_f64.sqrt());
        assert_relative_eq!(steps[0].mape.unwrap(), 10.0);
        assert_relative_eq!(steps[1].mae, 2.0);
        assert_relative_eq!(steps[1].mape.unwrap(), 5.0);

        let all = calc.aggregate();
        assert_eq!(all.count, 4);
        assert_relative_eq!(all.mae, 1.5);
        assert_relative_eq!(all.rmse, 5.0_f64.sqrt());
        assert!(all.coverage.is_none());
        assert_eq!(calc.forecasts(), 2);
    }

    #[test]
    fn test_mape_skips_zero_actuals() {
        let mut calc = MetricsCalculator::new(1);
        calc.add(&[0.0], &[5.0], None).unwrap();
        assert!(calc.aggregate().mape.is_none());

        calc.add(&[4.0], &[5.0], None).unwrap();
        assert_relative_eq!(calc.aggregate().mape.unwrap(), 25.0);
        assert_relative_eq!(calc.aggregate().mae, 3.0);
    }

    #[test]
    fn test_interval_coverage_and_width() {
        let mut calc = MetricsCalculator::new(1);
        for (actual, lo, hi) in [(5.0, 4.0, 6.0), (9.0, 4.0, 6.0), (6.0, 5.0, 6.0), (1.0, 0.0, 4.0)] {
            calc.add(&[actual], &[5.0], Some(IntervalBounds { lower: &[lo], upper: &[hi] }))
                .unwrap();
        }
        let m = calc.aggregate();
        assert_relative_eq!(m.coverage.unwrap(), 0.75);
        assert_relative_eq!(m.mean_interval_width.unwrap(), 2.25);
    }

    #[test]
    fn test_shape_checked() {
        let mut calc = MetricsCalculator::new(3);
        assert!(calc.add(&[1.0, 2.0], &[1.0, 2.0, 3.0], None).is_err());
        assert_eq!(calc.forecasts(), 0);
    }
}
