//! Forecast models.
//!
//! Every model family implements [`ForecastModel`]: a narrow capability
//! covering prediction, optional uncertainty, and the fit-step hooks the
//! trainer drives (flat parameter access plus per-window loss gradient).
//!
//! - Baselines (`LastValue`, `SeasonalNaive`) have no parameters and exist to
//!   sanity-check the trainer and evaluator.
//! - `LstmForecaster` is a recurrent network with a direct multi-horizon head.

pub mod baseline;
pub mod calibration;
pub mod lstm;
pub mod persistence;
pub mod state;

use serde::{Deserialize, Serialize};

use crate::error::{EngineResult, ForecastError};
use crate::windows::{ContextWindow, Window};

pub use baseline::{LastValue, SeasonalNaive};
pub use calibration::{Calibration, IntervalMethod};
pub use lstm::{LstmConfig, LstmForecaster};
pub use persistence::{deserialize, deserialize_scaler, serialize, serialize_scaler, SCHEMA_VERSION};
pub use state::{ForecastModelState, ModelVariant};

/// Point forecast with symmetric or asymmetric interval bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntervalForecast {
    pub point: Vec<f64>,
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
    /// Nominal coverage of `[lower, upper]`.
    pub level: f64,
}

/// Capability shared by all forecast model families.
pub trait ForecastModel: Send + Sync {
    /// Short family name, used in logs and reports.
    fn name(&self) -> &'static str;

    /// Context length the model was built for.
    fn context_length(&self) -> usize;

    /// Number of steps produced per prediction.
    fn horizon(&self) -> usize;

    /// Number of covariate columns expected alongside the target.
    fn covariate_width(&self) -> usize {
        0
    }

    /// Predict `horizon()` values following the context.
    fn predict(&self, context: &ContextWindow) -> EngineResult<Vec<f64>>;

    /// Predict with interval bounds. `None` when the model has no
    /// uncertainty estimate; callers must not treat this as a zero-width
    /// interval.
    fn predict_with_uncertainty(
        &self,
        context: &ContextWindow,
    ) -> EngineResult<Option<IntervalForecast>> {
        ensure_context_shape(self, context)?;
        Ok(None)
    }

    /// Number of trainable parameters.
    fn parameter_count(&self) -> usize {
        0
    }

    /// Flat copy of the trainable parameters.
    fn parameters(&self) -> Vec<f64> {
        Vec::new()
    }

    /// Replace the trainable parameters from a flat vector.
    fn set_parameters(&mut self, params: &[f64]) -> EngineResult<()> {
        if !params.is_empty() {
            return Err(ForecastError::ShapeMismatch {
                what: format!("{} parameters", self.name()),
                expected: 0,
                actual: params.len(),
            });
        }
        Ok(())
    }

    /// Mean squared error on one window and its gradient with respect to
    /// `parameters()`.
    fn loss_and_gradient(&self, window: &Window) -> EngineResult<(f64, Vec<f64>)> {
        let prediction = self.predict(&window.context)?;
        Ok((mean_squared_error(&prediction, &window.target)?, Vec::new()))
    }

    /// Mean squared error on one window.
    fn loss(&self, window: &Window) -> EngineResult<f64> {
        let prediction = self.predict(&window.context)?;
        mean_squared_error(&prediction, &window.target)
    }

    /// Whether `calibrate` produces interval estimates.
    fn supports_uncertainty(&self) -> bool {
        false
    }

    /// Fit interval estimates from held-out windows.
    fn calibrate(&mut self, _windows: &[Window], _level: f64, _method: IntervalMethod) -> EngineResult<()> {
        Ok(())
    }

    /// Drop interval estimates. Half-widths are tied to the scaler and
    /// parameters they were fit against.
    fn clear_calibration(&mut self) {}
}

/// Fail with `ShapeMismatch` unless the context matches the model's shape.
pub fn ensure_context_shape<M: ForecastModel + ?Sized>(
    model: &M,
    context: &ContextWindow,
) -> EngineResult<()> {
    if context.len() != model.context_length() {
        return Err(ForecastError::ShapeMismatch {
            what: format!("{} context length", model.name()),
            expected: model.context_length(),
            actual: context.len(),
        });
    }
    if context.width() != model.covariate_width() {
        return Err(ForecastError::ShapeMismatch {
            what: format!("{} covariate columns", model.name()),
            expected: model.covariate_width(),
            actual: context.width(),
        });
    }
    if let Some(column) = context.covariates.iter().find(|c| c.len() != context.len()) {
        return Err(ForecastError::ShapeMismatch {
            what: format!("{} covariate column length", model.name()),
            expected: context.len(),
            actual: column.len(),
        });
    }
    Ok(())
}

/// Mean of squared differences.
pub fn mean_squared_error(prediction: &[f64], target: &[f64]) -> EngineResult<f64> {
    if prediction.len() != target.len() || target.is_empty() {
        return Err(ForecastError::ShapeMismatch {
            what: "target length".to_string(),
            expected: prediction.len(),
            actual: target.len(),
        });
    }
    Ok(prediction
        .iter()
        .zip(target)
        .map(|(p, t)| (p - t).powi(2))
        .sum::<f64>()
        / target.len() as f64)
}
