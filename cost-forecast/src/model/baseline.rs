//! Naive baselines.
//!
//! Parameter-free models used to sanity-check the training and evaluation
//! harness independently of any learned weights.

use serde::{Deserialize, Serialize};

use super::{ensure_context_shape, ForecastModel};
use crate::error::{EngineResult, ForecastError};
use crate::windows::ContextWindow;

/// Repeats the last observed value across the horizon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastValue {
    context_length: usize,
    horizon: usize,
    /// Covariate columns accepted (and ignored) alongside the target.
    #[serde(default)]
    covariate_width: usize,
}

impl LastValue {
    pub fn new(context_length: usize, horizon: usize) -> Self {
        Self {
            context_length,
            horizon,
            covariate_width: 0,
        }
    }

    pub fn with_covariate_width(mut self, width: usize) -> Self {
        self.covariate_width = width;
        self
    }
}

impl ForecastModel for LastValue {
    fn name(&self) -> &'static str {
        "last_value"
    }

    fn context_length(&self) -> usize {
        self.context_length
    }

    fn horizon(&self) -> usize {
        self.horizon
    }

    fn covariate_width(&self) -> usize {
        self.covariate_width
    }

    fn predict(&self, context: &ContextWindow) -> EngineResult<Vec<f64>> {
        ensure_context_shape(self, context)?;
        let last = context.last_value().ok_or(ForecastError::ShapeMismatch {
            what: "last_value context length".to_string(),
            expected: self.context_length,
            actual: 0,
        })?;
        Ok(vec![last; self.horizon])
    }
}

/// Repeats the last full season of the context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeasonalNaive {
    context_length: usize,
    horizon: usize,
    season: usize,
    #[serde(default)]
    covariate_width: usize,
}

impl SeasonalNaive {
    /// `season` must be positive and no longer than the context.
    pub fn new(context_length: usize, horizon: usize, season: usize) -> EngineResult<Self> {
        if season == 0 || season > context_length {
            return Err(ForecastError::InvalidConfig(format!(
                "season {} must be in 1..={} (context length)",
                season, context_length
            )));
        }
        Ok(Self {
            context_length,
            horizon,
            season,
            covariate_width: 0,
        })
    }

    pub fn with_covariate_width(mut self, width: usize) -> Self {
        self.covariate_width = width;
        self
    }

    pub fn season(&self) -> usize {
        self.season
    }
}

impl ForecastModel for SeasonalNaive {
    fn name(&self) -> &'static str {
        "seasonal_naive"
    }

    fn context_length(&self) -> usize {
        self.context_length
    }

    fn horizon(&self) -> usize {
        self.horizon
    }

    fn covariate_width(&self) -> usize {
        self.covariate_width
    }

    fn predict(&self, context: &ContextWindow) -> EngineResult<Vec<f64>> {
        ensure_context_shape(self, context)?;
        let last_season = &context.values[self.context_length - self.season..];
        Ok((0..self.horizon)
            .map(|h| last_season[h % self.season])
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_value_repeats() {
        let model = LastValue::new(4, 3);
        let pred = model.predict(&ContextWindow::new(vec![1.0, 2.0, 3.0, 7.5])).unwrap();
        assert_eq!(pred, vec![7.5, 7.5, 7.5]);
    }

    #[test]
    fn test_last_value_shape_mismatch() {
        let model = LastValue::new(4, 3);
        let err = model.predict(&ContextWindow::new(vec![1.0, 2.0])).unwrap_err();
        assert!(matches!(
            err,
            ForecastError::ShapeMismatch { expected: 4, actual: 2, .. }
        ));
    }

    #[test]
    fn test_seasonal_naive_cycles() {
        let model = SeasonalNaive::new(6, 5, 3).unwrap();
        let ctx = ContextWindow::new(vec![9.0, 9.0, 9.0, 1.0, 2.0, 3.0]);
        assert_eq!(model.predict(&ctx).unwrap(), vec![1.0, 2.0, 3.0, 1.0, 2.0]);
    }

    #[test]
    fn test_seasonal_naive_rejects_long_season() {
        assert!(SeasonalNaive::new(5, 2, 7).is_err());
        assert!(SeasonalNaive::new(5, 2, 0).is_err());
    }

    #[test]
    fn test_baselines_have_no_uncertainty() {
        let model = LastValue::new(2, 1);
        let ctx = ContextWindow::new(vec![1.0, 2.0]);
        assert!(model.predict_with_uncertainty(&ctx).unwrap().is_none());
        assert!(!model.supports_uncertainty());
        assert_eq!(model.parameter_count(), 0);
    }

    #[test]
    fn test_baselines_reject_unexpected_covariates() {
        let model = LastValue::new(2, 1);
        let ctx = ContextWindow::new(vec![1.0, 2.0]).with_covariates(vec![vec![0.0, 0.0]]);
        assert!(model.predict(&ctx).is_err());

        let widened = LastValue::new(2, 1).with_covariate_width(1);
        assert_eq!(widened.predict(&ctx).unwrap(), vec![2.0]);
    }
}
