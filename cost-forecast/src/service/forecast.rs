//! Forecast service.
//!
//! Holds no state of its own: model and scaler are borrowed for the lifetime
//! of the service and checked to belong together on construction.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::data::{CovariateFrame, Series};
use crate::error::{EngineResult, ForecastError};
use crate::model::ForecastModelState;
use crate::scaling::{Scaler, ScalerState};
use crate::windows::context_ending_at;

/// Interval bounds around one point forecast.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Interval {
    pub lower: f64,
    pub upper: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    pub timestamp: NaiveDateTime,
    pub value: f64,
    /// `None` when the model has no uncertainty estimate.
    pub interval: Option<Interval>,
}

/// Horizon-length forecast in original units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastResult {
    pub as_of: NaiveDateTime,
    pub model_name: String,
    /// Nominal interval coverage, when intervals are present.
    pub interval_level: Option<f64>,
    pub points: Vec<ForecastPoint>,
}

impl ForecastResult {
    pub fn values(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.value).collect()
    }

    pub fn timestamps(&self) -> Vec<NaiveDateTime> {
        self.points.iter().map(|p| p.timestamp).collect()
    }

    pub fn has_intervals(&self) -> bool {
        self.interval_level.is_some()
    }
}

pub struct ForecastService<'a> {
    state: &'a ForecastModelState,
    scaler: &'a ScalerState,
}

impl<'a> ForecastService<'a> {
    /// Fails with `StaleScaler` if `scaler` is not the one `state` was trained with.
    pub fn new(state: &'a ForecastModelState, scaler: &'a ScalerState) -> EngineResult<Self> {
        state.ensure_scaler(scaler)?;
        Ok(Self { state, scaler })
    }

    /// Forecast the `horizon` steps after `as_of`, using the last
    /// `context_length` observations at or before `as_of`.
    pub fn forecast(
        &self,
        history: &Series,
        covariates: Option<&CovariateFrame>,
        as_of: NaiveDateTime,
    ) -> EngineResult<ForecastResult> {
        let required = self.state.context_length;
        let available = history.count_at_or_before(as_of);
        if available < required {
            return Err(ForecastError::InsufficientHistory {
                as_of,
                required,
                available,
            });
        }
        let step = history.step().ok_or(ForecastError::InsufficientHistory {
            as_of,
            required: 2,
            available,
        })?;

        let raw = context_ending_at(history, covariates, available, required)?;
        let context = Scaler::transform_context(self.scaler, &raw)?;

        let (values, bounds, level) = match self.state.predict_with_uncertainty(&context)? {
            Some(iv) => (
                Scaler::inverse_transform(self.scaler, &iv.point),
                Some((
                    Scaler::inverse_transform(self.scaler, &iv.lower),
                    Scaler::inverse_transform(self.scaler, &iv.upper),
                )),
                Some(iv.level),
            ),
            None => (
                Scaler::inverse_transform(self.scaler, &self.state.predict(&context)?),
                None,
                None,
            ),
        };

        let points = values
            .iter()
            .enumerate()
            .map(|(k, &value)| ForecastPoint {
                timestamp: as_of + step * (k as i32 + 1),
                value,
                interval: bounds.as_ref().map(|(lower, upper)| Interval {
                    lower: lower[k],
                    upper: upper[k],
                }),
            })
            .collect();

        debug!(
            "Forecast {} steps after {} with {}",
            values.len(),
            as_of,
            self.state.model().name()
        );

        Ok(ForecastResult {
            as_of,
            model_name: self.state.model().name().to_string(),
            interval_level: level,
            points,
        })
    }

    /// Forecast from the last observation of `history`.
    pub fn forecast_latest(
        &self,
        history: &Series,
        covariates: Option<&CovariateFrame>,
    ) -> EngineResult<ForecastResult> {
        let as_of = history.last_timestamp().ok_or(ForecastError::InsufficientData {
            segment: "history".to_string(),
            required: self.state.context_length,
            available: 0,
        })?;
        self.forecast(history, covariates, as_of)
    }
}
