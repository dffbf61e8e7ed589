//! Walk-forward evaluation of a trained model on held-out windows.
//!
//! Windows are scored in time order and every metric is computed in the
//! original (unscaled) units of the series.
//!
//! - Frozen: the trained model and scaler are applied unchanged. Windows are
//!   scored in parallel and collected in time order.
//! - Rolling refit: before scoring a window, the scaler and model are refit
//!   (warm start) on the part of the series strictly before that window.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::data::{CovariateFrame, Series, SeriesSplit, SplitBoundaries};
use crate::error::{EngineResult, ForecastError};
use crate::metrics::{ForecastMetrics, IntervalBounds, MetricsCalculator};
use crate::model::{ForecastModelState, IntervalForecast};
use crate::scaling::{Scaler, ScalerState};
use crate::training::Trainer;
use crate::windows::{Window, WindowBuilder};

/// How the model is treated as evaluation walks forward.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationMode {
    #[default]
    Frozen,
    RollingRefit {
        /// Refit before every `refit_every`-th window.
        refit_every: usize,
        /// Tail share of the available history used for validation on refit.
        validation_fraction: f64,
    },
}

/// One scored window, in original units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowForecast {
    pub position: usize,
    pub origin: NaiveDateTime,
    pub target_timestamps: Vec<NaiveDateTime>,
    pub actual: Vec<f64>,
    pub point: Vec<f64>,
    pub interval: Option<IntervalForecast>,
}

/// Result of one evaluation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub model_name: String,
    pub mode: EvaluationMode,
    pub horizon: usize,
    pub forecasts: Vec<WindowForecast>,
    /// Metrics pooled over all steps.
    pub aggregate: ForecastMetrics,
    /// Metrics keyed by step (1 = one step ahead).
    pub per_step: BTreeMap<usize, ForecastMetrics>,
}

impl EvaluationReport {
    fn from_forecasts(
        model_name: &str,
        mode: EvaluationMode,
        horizon: usize,
        forecasts: Vec<WindowForecast>,
    ) -> EngineResult<Self> {
        let mut calc = MetricsCalculator::new(horizon);
        for f in &forecasts {
            let bounds = f.interval.as_ref().map(|iv| IntervalBounds {
                lower: &iv.lower,
                upper: &iv.upper,
            });
            calc.add(&f.actual, &f.point, bounds)?;
        }

        Ok(Self {
            model_name: model_name.to_string(),
            mode,
            horizon,
            forecasts,
            aggregate: calc.aggregate(),
            per_step: calc
                .per_step()
                .into_iter()
                .enumerate()
                .map(|(h, m)| (h + 1, m))
                .collect(),
        })
    }

    pub fn windows(&self) -> usize {
        self.forecasts.len()
    }

    /// Aggregate metrics by name. Absent metrics (MAPE with all-zero actuals,
    /// interval metrics without bounds) are omitted.
    pub fn metrics(&self) -> BTreeMap<String, f64> {
        metric_map(&self.aggregate)
    }

    /// One named metric for every step.
    pub fn step_metric(&self, name: &str) -> BTreeMap<usize, f64> {
        self.per_step
            .iter()
            .filter_map(|(step, m)| metric_map(m).get(name).map(|v| (*step, *v)))
            .collect()
    }

    /// `1 - MAE / MAE_reference`. Positive when this model beats the reference.
    pub fn skill_score(&self, reference: &EvaluationReport) -> Option<f64> {
        (reference.aggregate.mae > 0.0).then(|| 1.0 - self.aggregate.mae / reference.aggregate.mae)
    }

    pub fn summary(&self) -> String {
        let mut out = format!(
            "Evaluation: {} ({:?}), {} windows, horizon {}\n\
             MAE: {:.4}\n\
             RMSE: {:.4}\n",
            self.model_name,
            self.mode,
            self.windows(),
            self.horizon,
            self.aggregate.mae,
            self.aggregate.rmse
        );
        match self.aggregate.mape {
            Some(mape) => out.push_str(&format!("MAPE: {:.2}%\n", mape)),
            None => out.push_str("MAPE: n/a (all actuals zero)\n"),
        }
        if let (Some(cov), Some(width)) = (self.aggregate.coverage, self.aggregate.mean_interval_width) {
            out.push_str(&format!("Coverage: {:.1}%  Mean width: {:.4}\n", cov * 100.0, width));
        }
        out.push_str("Step |    MAE    |   RMSE\n");
        for (step, m) in &self.per_step {
            out.push_str(&format!("{:>4} | {:>9.4} | {:>9.4}\n", step, m.mae, m.rmse));
        }
        out
    }
}

fn metric_map(m: &ForecastMetrics) -> BTreeMap<String, f64> {
    let mut map = BTreeMap::new();
    map.insert("mae".to_string(), m.mae);
    map.insert("rmse".to_string(), m.rmse);
    map.insert("count".to_string(), m.count as f64);
    if let Some(v) = m.mape {
        map.insert("mape".to_string(), v);
    }
    if let Some(v) = m.coverage {
        map.insert("coverage".to_string(), v);
    }
    if let Some(v) = m.mean_interval_width {
        map.insert("mean_interval_width".to_string(), v);
    }
    map
}

/// Scores a trained model on raw (unscaled) windows.
#[derive(Debug, Clone, Copy, Default)]
pub struct Evaluator {
    mode: EvaluationMode,
}

impl Evaluator {
    pub fn new(mode: EvaluationMode) -> Self {
        Self { mode }
    }

    pub fn frozen() -> Self {
        Self::new(EvaluationMode::Frozen)
    }

    pub fn rolling_refit(refit_every: usize, validation_fraction: f64) -> Self {
        Self::new(EvaluationMode::RollingRefit {
            refit_every,
            validation_fraction,
        })
    }

    pub fn mode(&self) -> EvaluationMode {
        self.mode
    }

    /// Frozen-model evaluation. Rolling refit needs the series history; use
    /// `evaluate_with_history` for that mode.
    pub fn evaluate(
        &self,
        state: &ForecastModelState,
        scaler: &ScalerState,
        windows: &[Window],
    ) -> EngineResult<EvaluationReport> {
        match self.mode {
            EvaluationMode::Frozen => evaluate_frozen(state, scaler, windows),
            EvaluationMode::RollingRefit { .. } => Err(ForecastError::InvalidConfig(
                "rolling refit evaluation needs the series history".to_string(),
            )),
        }
    }

    /// Evaluate with access to the series the windows were cut from.
    pub fn evaluate_with_history(
        &self,
        state: &ForecastModelState,
        scaler: &ScalerState,
        series: &Series,
        covariates: Option<&CovariateFrame>,
        windows: &[Window],
    ) -> EngineResult<EvaluationReport> {
        match self.mode {
            EvaluationMode::Frozen => evaluate_frozen(state, scaler, windows),
            EvaluationMode::RollingRefit {
                refit_every,
                validation_fraction,
            } => {
                if refit_every == 0 || !(validation_fraction > 0.0 && validation_fraction < 1.0) {
                    return Err(ForecastError::InvalidConfig(format!(
                        "rolling refit needs refit_every > 0 and validation_fraction in (0, 1), got {} and {}",
                        refit_every, validation_fraction
                    )));
                }
                evaluate_rolling(
                    state,
                    scaler,
                    series,
                    covariates,
                    windows,
                    refit_every,
                    validation_fraction,
                    self.mode,
                )
            }
        }
    }
}

fn time_ordered(windows: &[Window]) -> EngineResult<Vec<&Window>> {
    if windows.is_empty() {
        return Err(ForecastError::InsufficientData {
            segment: "evaluation windows".to_string(),
            required: 1,
            available: 0,
        });
    }
    let mut ordered: Vec<&Window> = windows.iter().collect();
    ordered.sort_by_key(|w| w.position);
    Ok(ordered)
}

fn evaluate_frozen(
    state: &ForecastModelState,
    scaler: &ScalerState,
    windows: &[Window],
) -> EngineResult<EvaluationReport> {
    state.ensure_scaler(scaler)?;
    let ordered = time_ordered(windows)?;

    let forecasts = ordered
        .par_iter()
        .map(|w| score_window(state, scaler, w))
        .collect::<EngineResult<Vec<_>>>()?;

    let report = EvaluationReport::from_forecasts(
        state.model().name(),
        EvaluationMode::Frozen,
        state.horizon,
        forecasts,
    )?;
    info!(
        "Evaluated {} on {} windows: MAE {:.4}, RMSE {:.4}",
        report.model_name,
        report.windows(),
        report.aggregate.mae,
        report.aggregate.rmse
    );
    Ok(report)
}

#[allow(clippy::too_many_arguments)]
fn evaluate_rolling(
    state: &ForecastModelState,
    scaler: &ScalerState,
    series: &Series,
    covariates: Option<&CovariateFrame>,
    windows: &[Window],
    refit_every: usize,
    validation_fraction: f64,
    mode: EvaluationMode,
) -> EngineResult<EvaluationReport> {
    state.ensure_scaler(scaler)?;
    let ordered = time_ordered(windows)?;

    let mut current_state = state.clone();
    let mut current_scaler = scaler.clone();
    let mut forecasts = Vec::with_capacity(ordered.len());

    for (k, window) in ordered.iter().enumerate() {
        if k % refit_every == 0 {
            match refit_before(
                &current_state,
                &current_scaler,
                series,
                covariates,
                window.position,
                validation_fraction,
            ) {
                Ok((refit_state, refit_scaler)) => {
                    debug!("Refit before window at position {}", window.position);
                    current_state = refit_state;
                    current_scaler = refit_scaler;
                }
                Err(ForecastError::InsufficientData { segment, available, .. }) => {
                    warn!(
                        "Skipping refit before position {}: {} has {} points",
                        window.position, segment, available
                    );
                }
                Err(e) => return Err(e),
            }
        }
        forecasts.push(score_window(&current_state, &current_scaler, window)?);
    }

    let report = EvaluationReport::from_forecasts(state.model().name(), mode, state.horizon, forecasts)?;
    info!(
        "Rolling-refit evaluation of {} on {} windows: MAE {:.4}",
        report.model_name,
        report.windows(),
        report.aggregate.mae
    );
    Ok(report)
}

/// Refit scaler and model on observations strictly before `position`.
fn refit_before(
    state: &ForecastModelState,
    scaler: &ScalerState,
    series: &Series,
    covariates: Option<&CovariateFrame>,
    position: usize,
    validation_fraction: f64,
) -> EngineResult<(ForecastModelState, ScalerState)> {
    let history = series.prefix(position);
    let history_cov = covariates.map(|c| c.prefix(position));
    let available = history.len();
    let train_len = ((available as f64) * (1.0 - validation_fraction)).floor() as usize;
    if train_len == 0 || train_len >= available {
        return Err(ForecastError::InsufficientData {
            segment: "refit history".to_string(),
            required: 2,
            available,
        });
    }

    let ts = history.timestamps();
    let boundaries = SplitBoundaries::new(ts[train_len - 1], ts[available - 1]);
    let split = SeriesSplit::new(&history, history_cov.as_ref(), &boundaries)?;

    let refit_scaler = Scaler::new(scaler.method).fit(&split.train())?;
    let windows = WindowBuilder::new(state.context_length, state.horizon).build_split(&split)?;
    let scaled = Scaler::transform_windows(&refit_scaler, &windows)?;

    let refit_state = Trainer::new(state.config.clone()).train(
        state.model.clone(),
        &scaled.train,
        &scaled.validation,
        &refit_scaler,
    )?;
    Ok((refit_state, refit_scaler))
}

fn score_window(
    state: &ForecastModelState,
    scaler: &ScalerState,
    window: &Window,
) -> EngineResult<WindowForecast> {
    let context = Scaler::transform_context(scaler, &window.context)?;

    let (point, interval) = match state.predict_with_uncertainty(&context)? {
        Some(iv) => {
            let point = Scaler::inverse_transform(scaler, &iv.point);
            let interval = IntervalForecast {
                point: point.clone(),
                lower: Scaler::inverse_transform(scaler, &iv.lower),
                upper: Scaler::inverse_transform(scaler, &iv.upper),
                level: iv.level,
            };
            (point, Some(interval))
        }
        None => (Scaler::inverse_transform(scaler, &state.predict(&context)?), None),
    };

    Ok(WindowForecast {
        position: window.position,
        origin: window.origin,
        target_timestamps: window.target_timestamps.clone(),
        actual: window.target.clone(),
        point,
        interval,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{LastValue, LstmConfig, LstmForecaster, SeasonalNaive};
    use crate::training::TrainingConfig;
    use approx::assert_relative_eq;
    use chrono::NaiveDate;

    fn weekly_series(n: usize) -> Series {
        let values = (0..n)
            .map(|i| 100.0 + 20.0 * ((i % 7) as f64) + i as f64 * 0.2)
            .collect();
        Series::daily(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(), values).unwrap()
    }

    fn fit(
        series: &Series,
        model: crate::model::ModelVariant,
        config: TrainingConfig,
    ) -> (ForecastModelState, ScalerState, Vec<Window>) {
        let ts = series.timestamps();
        let n = series.len();
        let split = SeriesSplit::new(series, None, &SplitBoundaries::new(ts[n * 6 / 10 - 1], ts[n * 8 / 10 - 1])).unwrap();
        let scaler = Scaler::default().fit(&split.train()).unwrap();
        let windows = WindowBuilder::new(14, 3).build_split(&split).unwrap();
        let scaled = Scaler::transform_windows(&scaler, &windows).unwrap();
        let state = Trainer::new(config)
            .train(model, &scaled.train, &scaled.validation, &scaler)
            .unwrap();
        (state, scaler, windows.test)
    }

    #[test]
    fn test_last_value_metrics_in_original_units() {
        let values: Vec<f64> = (1..=50).map(|i| i as f64).collect();
        let series = Series::daily(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(), values).unwrap();
        let ts = series.timestamps();
        let split = SeriesSplit::new(&series, None, &SplitBoundaries::new(ts[29], ts[39])).unwrap();
        let scaler = Scaler::default().fit(&split.train()).unwrap();
        let windows = WindowBuilder::new(5, 1).build_split(&split).unwrap();
        let scaled = Scaler::transform_windows(&scaler, &windows).unwrap();
        let state = Trainer::default()
            .train(LastValue::new(5, 1).into(), &scaled.train, &scaled.validation, &scaler)
            .unwrap();

        let report = Evaluator::frozen().evaluate(&state, &scaler, &windows.test).unwrap();
        assert_eq!(report.windows(), 5);
        for f in &report.forecasts {
            assert_relative_eq!(f.point[0], f.actual[0] - 1.0, epsilon = 1e-9);
        }
        assert_relative_eq!(report.metrics()["mae"], 1.0, epsilon = 1e-9);
        assert!(report.metrics().get("coverage").is_none());
    }

    #[test]
    fn test_seasonal_naive_beats_last_value() {
        let series = weekly_series(210);
        let (naive, scaler, test) = fit(&series, LastValue::new(14, 3).into(), TrainingConfig::default());
        let (seasonal, _, _) = fit(&series, SeasonalNaive::new(14, 3, 7).unwrap().into(), TrainingConfig::default());

        let reference = Evaluator::frozen().evaluate(&naive, &scaler, &test).unwrap();
        let report = Evaluator::frozen().evaluate(&seasonal, &scaler, &test).unwrap();
        assert!(report.skill_score(&reference).unwrap() > 0.5);
        assert_eq!(report.per_step.len(), 3);
        assert_eq!(report.step_metric("mae").len(), 3);
        assert!(report.summary().contains("seasonal_naive"));
    }

    #[test]
    fn test_frozen_results_in_time_order() {
        let series = weekly_series(150);
        let (state, scaler, mut test) = fit(&series, LastValue::new(14, 3).into(), TrainingConfig::default());
        test.reverse();
        let report = Evaluator::frozen().evaluate(&state, &scaler, &test).unwrap();
        assert!(report.forecasts.windows(2).all(|p| p[0].position < p[1].position));
    }

    #[test]
    fn test_stale_scaler_rejected() {
        let series = weekly_series(150);
        let (state, _, test) = fit(&series, LastValue::new(14, 3).into(), TrainingConfig::default());
        let other = weekly_series(160);
        let ts = other.timestamps();
        let split = SeriesSplit::new(&other, None, &SplitBoundaries::new(ts[99], ts[129])).unwrap();
        let foreign = Scaler::default().fit(&split.train()).unwrap();

        assert!(matches!(
            Evaluator::frozen().evaluate(&state, &foreign, &test),
            Err(ForecastError::StaleScaler { .. })
        ));
    }

    #[test]
    fn test_empty_windows_rejected() {
        let series = weekly_series(150);
        let (state, scaler, _) = fit(&series, LastValue::new(14, 3).into(), TrainingConfig::default());
        assert!(matches!(
            Evaluator::frozen().evaluate(&state, &scaler, &[]),
            Err(ForecastError::InsufficientData { .. })
        ));
    }

    #[test]
    fn test_lstm_reports_interval_metrics() {
        let series = weekly_series(210);
        let model = LstmForecaster::new(14, 3, 0, &LstmConfig::new(8)).unwrap();
        let (state, scaler, test) = fit(&series, model.into(), TrainingConfig::default().with_max_passes(5));
        let report = Evaluator::frozen().evaluate(&state, &scaler, &test).unwrap();

        let metrics = report.metrics();
        assert!(metrics.contains_key("coverage"));
        assert!(metrics["mean_interval_width"] > 0.0);
        for f in &report.forecasts {
            let iv = f.interval.as_ref().unwrap();
            assert!(iv.lower.iter().zip(&iv.upper).all(|(l, u)| l <= u));
        }
    }

    #[test]
    fn test_rolling_refit_requires_history() {
        let series = weekly_series(150);
        let (state, scaler, test) = fit(&series, LastValue::new(14, 3).into(), TrainingConfig::default());
        let evaluator = Evaluator::rolling_refit(2, 0.2);
        assert!(evaluator.evaluate(&state, &scaler, &test).is_err());

        let report = evaluator
            .evaluate_with_history(&state, &scaler, &series, None, &test)
            .unwrap();
        assert_eq!(report.windows(), test.len());
        // Last-value ignores refits, so results match frozen scoring.
        let frozen = Evaluator::frozen().evaluate(&state, &scaler, &test).unwrap();
        assert_relative_eq!(report.aggregate.mae, frozen.aggregate.mae, epsilon = 1e-9);
    }

    #[test]
    fn test_lstm_refit_uses_only_prior_history() {
        let series = weekly_series(210);
        let model = LstmForecaster::new(14, 3, 0, &LstmConfig::new(6)).unwrap();
        let (state, scaler, test) = fit(&series, model.into(), TrainingConfig::default().with_max_passes(3));

        let position = test.iter().map(|w| w.position).min().unwrap();
        // 5% of 168 observations is too short for a validation window.
        let (refit_state, refit_scaler) = refit_before(&state, &scaler, &series, None, position, 0.05).unwrap();

        let history = series.prefix(position);
        let ts = history.timestamps();
        let train_len = (position as f64 * 0.95).floor() as usize;
        let split = SeriesSplit::new(&history, None, &SplitBoundaries::new(ts[train_len - 1], ts[position - 1])).unwrap();
        let expected = split.train().fingerprint();
        assert_eq!(refit_scaler.fingerprint, expected);
        assert_eq!(refit_state.scaler_fingerprint, expected);
        assert_ne!(refit_scaler.fingerprint, scaler.fingerprint);
        assert_ne!(refit_state.model().parameters(), state.model().parameters());
        assert_eq!(refit_state.summary.validation_windows, 0);

        // Observations from `position` on do not influence the refit.
        let mut values = series.values().to_vec();
        values[position..].iter_mut().for_each(|v| *v *= 3.0);
        let altered = Series::new(series.timestamps().to_vec(), values).unwrap();
        let (altered_state, altered_scaler) =
            refit_before(&state, &scaler, &altered, None, position, 0.05).unwrap();
        assert_eq!(altered_state, refit_state);
        assert_eq!(altered_scaler, refit_scaler);

        let frozen = Evaluator::frozen().evaluate(&state, &scaler, &test).unwrap();
        let rolling = Evaluator::rolling_refit(1000, 0.05)
            .evaluate_with_history(&state, &scaler, &series, None, &test)
            .unwrap();
        assert_eq!(rolling.windows(), frozen.windows());
        assert_ne!(rolling.forecasts[0].point, frozen.forecasts[0].point);
        // The refit model was not recalibrated, so no stale intervals remain.
        assert!(rolling.forecasts.iter().all(|f| f.interval.is_none()));
        assert!(rolling.aggregate.coverage.is_none());
        assert!(frozen.aggregate.coverage.is_some());
    }
}
