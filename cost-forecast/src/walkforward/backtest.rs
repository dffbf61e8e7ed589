//! Multi-fold walk-forward backtest.
//!
//! Every fold is fit from scratch on its own train segment and scored on its
//! test segment. Folds are independent and run in parallel.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::evaluator::{EvaluationReport, Evaluator};
use super::periods::{WalkForwardConfig, WalkForwardFold, WalkForwardPlan};
use crate::config::ForecastConfig;
use crate::data::{CovariateFrame, Series};
use crate::error::{EngineResult, ForecastError};
use crate::pipeline::ForecastPipeline;
use crate::training::TrainingSummary;

/// Result of a single fold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoldResult {
    pub fold: WalkForwardFold,
    pub training: TrainingSummary,
    pub report: EvaluationReport,
}

/// Complete walk-forward backtest result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalkForwardResult {
    pub folds: Vec<FoldResult>,
    /// Mean per-step MAE across folds (1 = one step ahead).
    pub per_step_mae: BTreeMap<usize, f64>,
}

impl WalkForwardResult {
    fn mean_of(&self, metric: impl Fn(&FoldResult) -> f64) -> f64 {
        if self.folds.is_empty() {
            return 0.0;
        }
        self.folds.iter().map(metric).sum::<f64>() / self.folds.len() as f64
    }

    pub fn mean_mae(&self) -> f64 {
        self.mean_of(|f| f.report.aggregate.mae)
    }

    pub fn mean_rmse(&self) -> f64 {
        self.mean_of(|f| f.report.aggregate.rmse)
    }

    /// Mean interval coverage across folds that report it.
    pub fn mean_coverage(&self) -> Option<f64> {
        let covered: Vec<f64> = self
            .folds
            .iter()
            .filter_map(|f| f.report.aggregate.coverage)
            .collect();
        (!covered.is_empty()).then(|| covered.iter().sum::<f64>() / covered.len() as f64)
    }

    pub fn summary(&self) -> String {
        let mut out = format!(
            "Walk-Forward Results: {} folds\n\
             Mean MAE: {:.4}\n\
             Mean RMSE: {:.4}\n",
            self.folds.len(),
            self.mean_mae(),
            self.mean_rmse()
        );
        if let Some(cov) = self.mean_coverage() {
            out.push_str(&format!("Mean Coverage: {:.1}%\n", cov * 100.0));
        }
        out.push_str("| Fold | Train | Test windows |    MAE    | Best pass |\n");
        out.push_str("|------|-------|--------------|-----------|-----------|\n");
        for f in &self.folds {
            out.push_str(&format!(
                "| {:>4} | {:>5} | {:>12} | {:>9.4} | {:>9} |\n",
                f.fold.fold_num,
                f.fold.train_len(),
                f.report.windows(),
                f.report.aggregate.mae,
                f.training.best_pass
            ));
        }
        out
    }
}

/// Walk-forward backtest over rolling folds.
#[derive(Debug, Clone)]
pub struct WalkForwardBacktest {
    folds: WalkForwardConfig,
    forecast: ForecastConfig,
    evaluator: Evaluator,
}

impl WalkForwardBacktest {
    pub fn new(folds: WalkForwardConfig, forecast: ForecastConfig) -> Self {
        Self {
            folds,
            forecast,
            evaluator: Evaluator::frozen(),
        }
    }

    pub fn with_evaluator(mut self, evaluator: Evaluator) -> Self {
        self.evaluator = evaluator;
        self
    }

    pub fn run(&self, series: &Series, covariates: Option<&CovariateFrame>) -> EngineResult<WalkForwardResult> {
        self.folds.validate()?;
        if let Some(frame) = covariates {
            frame.check_aligned(series.len())?;
        }
        let pipeline = ForecastPipeline::new(self.forecast.clone())?;

        let plan = WalkForwardPlan::new(self.folds.clone(), series.len());
        let folds = plan.generate();
        if folds.is_empty() {
            return Err(ForecastError::InsufficientData {
                segment: "walk-forward series".to_string(),
                required: self.folds.train_len + self.folds.validation_len + self.folds.test_len,
                available: series.len(),
            });
        }
        info!("Generated {} walk-forward folds", folds.len());

        let done = AtomicUsize::new(0);
        let total = folds.len();
        let results = folds
            .par_iter()
            .map(|fold| {
                let result = self.run_fold(&pipeline, fold, series, covariates);
                let n = done.fetch_add(1, Ordering::Relaxed) + 1;
                info!("  Fold {} complete ({}/{})", fold.fold_num, n, total);
                result
            })
            .collect::<EngineResult<Vec<_>>>()?;

        let per_step_mae = mean_per_step_mae(&results);
        Ok(WalkForwardResult {
            folds: results,
            per_step_mae,
        })
    }

    fn run_fold(
        &self,
        pipeline: &ForecastPipeline,
        fold: &WalkForwardFold,
        series: &Series,
        covariates: Option<&CovariateFrame>,
    ) -> EngineResult<FoldResult> {
        let span = fold.span();
        let fold_series = series.slice(span.clone());
        let fold_cov = covariates.map(|c| c.slice(span));
        let boundaries = fold.boundaries(series)?;

        let fitted = pipeline.fit_with_boundaries(&fold_series, fold_cov.as_ref(), &boundaries)?;
        let report = pipeline.evaluate(&fitted, &self.evaluator, &fold_series, fold_cov.as_ref())?;

        Ok(FoldResult {
            fold: fold.clone(),
            training: fitted.state.summary.clone(),
            report,
        })
    }
}

fn mean_per_step_mae(results: &[FoldResult]) -> BTreeMap<usize, f64> {
    let mut sums: BTreeMap<usize, (f64, usize)> = BTreeMap::new();
    for result in results {
        for (step, metrics) in &result.report.per_step {
            let entry = sums.entry(*step).or_insert((0.0, 0));
            entry.0 += metrics.mae;
            entry.1 += 1;
        }
    }
    sums.into_iter()
        .map(|(step, (sum, n))| (step, sum / n as f64))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelKind;
    use approx::assert_relative_eq;
    use chrono::NaiveDate;

    fn weekly(n: usize) -> Series {
        Series::daily(
            NaiveDate::from_ymd_opt(2023, 6, 1).unwrap(),
            (0..n).map(|i| 80.0 + 6.0 * ((i % 7) as f64) + 0.1 * i as f64).collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_folds_run_and_aggregate() {
        let series = weekly(160);
        let backtest = WalkForwardBacktest::new(
            WalkForwardConfig::new(80, 20, 20),
            ForecastConfig::new(14, 3).with_model(ModelKind::SeasonalNaive { season: 7 }),
        );
        let result = backtest.run(&series, None).unwrap();

        // (160 - 120) / 20 + 1
        assert_eq!(result.folds.len(), 3);
        assert!(result.folds.windows(2).all(|p| p[0].fold.fold_num < p[1].fold.fold_num));
        assert_eq!(result.per_step_mae.len(), 3);
        // Trend of 0.1 per step over one season.
        assert_relative_eq!(result.mean_mae(), 0.7, epsilon = 1e-6);
        assert!(result.summary().contains("3 folds"));
    }

    #[test]
    fn test_series_too_short() {
        let backtest = WalkForwardBacktest::new(WalkForwardConfig::new(80, 20, 20), ForecastConfig::new(14, 3));
        assert!(matches!(
            backtest.run(&weekly(100), None),
            Err(ForecastError::InsufficientData { .. })
        ));
    }
}
