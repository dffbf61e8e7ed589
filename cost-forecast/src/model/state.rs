//! Trained model state.

use serde::{Deserialize, Serialize};

use super::{ForecastModel, IntervalForecast, LastValue, LstmForecaster, SeasonalNaive};
use crate::data::SegmentFingerprint;
use crate::error::{EngineResult, ForecastError};
use crate::scaling::ScalerState;
use crate::training::{TrainingConfig, TrainingSummary};
use crate::windows::ContextWindow;

/// Closed set of persistable model families.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelVariant {
    LastValue(LastValue),
    SeasonalNaive(SeasonalNaive),
    Lstm(LstmForecaster),
}

impl ModelVariant {
    pub fn as_model(&self) -> &dyn ForecastModel {
        match self {
            Self::LastValue(m) => m,
            Self::SeasonalNaive(m) => m,
            Self::Lstm(m) => m,
        }
    }

    pub fn as_model_mut(&mut self) -> &mut dyn ForecastModel {
        match self {
            Self::LastValue(m) => m,
            Self::SeasonalNaive(m) => m,
            Self::Lstm(m) => m,
        }
    }
}

impl From<LastValue> for ModelVariant {
    fn from(model: LastValue) -> Self {
        Self::LastValue(model)
    }
}

impl From<SeasonalNaive> for ModelVariant {
    fn from(model: SeasonalNaive) -> Self {
        Self::SeasonalNaive(model)
    }
}

impl From<LstmForecaster> for ModelVariant {
    fn from(model: LstmForecaster) -> Self {
        Self::Lstm(model)
    }
}

/// Everything needed to reproduce and serve a trained model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastModelState {
    /// Best-checkpoint parameters.
    pub model: ModelVariant,
    pub context_length: usize,
    pub horizon: usize,
    /// Training configuration in force for the run (seed included).
    pub config: TrainingConfig,
    pub summary: TrainingSummary,
    /// Train segment of the scaler the model was trained against.
    pub scaler_fingerprint: SegmentFingerprint,
}

impl ForecastModelState {
    pub fn model(&self) -> &dyn ForecastModel {
        self.model.as_model()
    }

    pub fn covariate_width(&self) -> usize {
        self.model().covariate_width()
    }

    /// Fail with `StaleScaler` unless `scaler` is the one this model was trained with.
    pub fn ensure_scaler(&self, scaler: &ScalerState) -> EngineResult<()> {
        scaler.ensure_bound_to(&self.scaler_fingerprint)
    }

    /// Point forecast on an already scaled context.
    pub fn predict(&self, context: &ContextWindow) -> EngineResult<Vec<f64>> {
        self.model().predict(context)
    }

    /// Interval forecast on an already scaled context.
    pub fn predict_with_uncertainty(
        &self,
        context: &ContextWindow,
    ) -> EngineResult<Option<IntervalForecast>> {
        self.model().predict_with_uncertainty(context)
    }

    /// Best validation loss recorded during training.
    pub fn best_validation_loss(&self) -> f64 {
        self.summary.best_validation_loss
    }

    pub(crate) fn check_shape(&self) -> EngineResult<()> {
        let model = self.model();
        if model.context_length() != self.context_length {
            return Err(ForecastError::ShapeMismatch {
                what: format!("{} state context length", model.name()),
                expected: self.context_length,
                actual: model.context_length(),
            });
        }
        if model.horizon() != self.horizon {
            return Err(ForecastError::ShapeMismatch {
                what: format!("{} state horizon", model.name()),
                expected: self.horizon,
                actual: model.horizon(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LstmConfig;

    #[test]
    fn test_variant_dispatch() {
        let variant = ModelVariant::from(SeasonalNaive::new(4, 2, 2).unwrap());
        assert_eq!(variant.as_model().name(), "seasonal_naive");
        assert_eq!(variant.as_model().horizon(), 2);

        let mut lstm = ModelVariant::from(LstmForecaster::new(4, 2, 0, &LstmConfig::new(3)).unwrap());
        let n = lstm.as_model().parameter_count();
        lstm.as_model_mut().set_parameters(&vec![0.0; n]).unwrap();
        let pred = lstm.as_model().predict(&ContextWindow::new(vec![1.0; 4])).unwrap();
        assert_eq!(pred, vec![0.0, 0.0]);
    }
}
