//! One-call fit and evaluation over a single split.
//!
//! series -> split -> windows -> scaler (train only) -> trainer -> evaluator

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::ForecastConfig;
use crate::data::{CovariateFrame, Series, SeriesSplit, SplitBoundaries};
use crate::error::{EngineResult, ForecastError};
use crate::model::ForecastModelState;
use crate::scaling::{Scaler, ScalerState};
use crate::service::ForecastService;
use crate::training::{CancellationToken, Trainer};
use crate::walkforward::{EvaluationReport, Evaluator};
use crate::windows::WindowSet;

/// Window counts per segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowCounts {
    pub train: usize,
    pub validation: usize,
    pub test: usize,
}

/// Output of `ForecastPipeline::fit`.
#[derive(Debug, Clone)]
pub struct FittedForecast {
    pub boundaries: SplitBoundaries,
    pub scaler: ScalerState,
    pub state: ForecastModelState,
    /// Unscaled windows for every segment.
    pub windows: WindowSet,
}

impl FittedForecast {
    pub fn window_counts(&self) -> WindowCounts {
        WindowCounts {
            train: self.windows.train.len(),
            validation: self.windows.validation.len(),
            test: self.windows.test.len(),
        }
    }

    pub fn service(&self) -> EngineResult<ForecastService<'_>> {
        ForecastService::new(&self.state, &self.scaler)
    }
}

#[derive(Debug, Clone)]
pub struct ForecastPipeline {
    config: ForecastConfig,
    cancel: CancellationToken,
}

impl ForecastPipeline {
    pub fn new(config: ForecastConfig) -> EngineResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            cancel: CancellationToken::new(),
        })
    }

    /// Share a cancellation token with the training loop.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &ForecastConfig {
        &self.config
    }

    /// Fit using split points derived from the configured fractions.
    pub fn fit(&self, series: &Series, covariates: Option<&CovariateFrame>) -> EngineResult<FittedForecast> {
        let boundaries = self.config.boundaries_for(series)?;
        self.fit_with_boundaries(series, covariates, &boundaries)
    }

    pub fn fit_with_boundaries(
        &self,
        series: &Series,
        covariates: Option<&CovariateFrame>,
        boundaries: &SplitBoundaries,
    ) -> EngineResult<FittedForecast> {
        let builder = self.config.window_builder();
        let required = self.config.context_length + self.config.horizon;
        if series.len() < required {
            return Err(ForecastError::InsufficientData {
                segment: "series".to_string(),
                required,
                available: series.len(),
            });
        }

        let split = SeriesSplit::new(series, covariates, boundaries)?;
        let windows = builder.build_split(&split)?;
        info!(
            "Windows built: train {}, validation {}, test {}",
            windows.train.len(),
            windows.validation.len(),
            windows.test.len()
        );

        let scaler = Scaler::new(self.config.scaling).fit(&split.train())?;
        let scaled = Scaler::transform_windows(&scaler, &windows)?;

        let model = self
            .config
            .build_model(split.train().segment().covariate_width())?;
        let state = Trainer::new(self.config.training.clone()).train_with_cancel(
            model,
            &scaled.train,
            &scaled.validation,
            &scaler,
            &self.cancel,
        )?;

        Ok(FittedForecast {
            boundaries: *boundaries,
            scaler,
            state,
            windows,
        })
    }

    /// Score the fitted model on its held-out test windows.
    pub fn evaluate(
        &self,
        fitted: &FittedForecast,
        evaluator: &Evaluator,
        series: &Series,
        covariates: Option<&CovariateFrame>,
    ) -> EngineResult<EvaluationReport> {
        evaluator.evaluate_with_history(
            &fitted.state,
            &fitted.scaler,
            series,
            covariates,
            &fitted.windows.test,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelKind;
    use chrono::NaiveDate;

    fn daily(n: usize) -> Series {
        Series::daily(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            (0..n).map(|i| 30.0 + 5.0 * ((i % 7) as f64)).collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_window_counts_for_default_split() {
        let config = ForecastConfig::new(14, 7).with_model(ModelKind::LastValue);
        let fitted = ForecastPipeline::new(config).unwrap().fit(&daily(100), None).unwrap();
        assert_eq!(
            fitted.window_counts(),
            WindowCounts {
                train: 50,
                validation: 0,
                test: 0
            }
        );
    }

    #[test]
    fn test_fit_and_evaluate() {
        let series = daily(200);
        let config = ForecastConfig::new(14, 7).with_model(ModelKind::SeasonalNaive { season: 7 });
        let pipeline = ForecastPipeline::new(config).unwrap();
        let fitted = pipeline.fit(&series, None).unwrap();
        let report = pipeline
            .evaluate(&fitted, &Evaluator::frozen(), &series, None)
            .unwrap();
        assert!(report.aggregate.mae < 1e-9);

        let forecast = fitted.service().unwrap().forecast_latest(&series, None).unwrap();
        assert_eq!(forecast.points.len(), 7);
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(ForecastPipeline::new(ForecastConfig::new(0, 7)).is_err());
    }

    #[test]
    fn test_short_series() {
        let pipeline = ForecastPipeline::new(ForecastConfig::new(14, 7)).unwrap();
        let series = daily(10);
        let ts = series.timestamps();
        assert!(matches!(
            pipeline.fit_with_boundaries(&series, None, &SplitBoundaries::new(ts[5], ts[7])),
            Err(ForecastError::InsufficientData { required: 21, available: 10, .. })
        ));
    }
}
