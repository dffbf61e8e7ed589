//! Train-only numeric normalization.
//!
//! Statistics are computed from a `TrainSegment` and stamped with its
//! fingerprint. Every operation that crosses a component boundary checks the
//! fingerprint, so statistics from one split cannot silently be applied to
//! windows cut from another.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::data::{SegmentFingerprint, TrainSegment};
use crate::error::{EngineResult, ForecastError};
use crate::windows::{ContextWindow, Window, WindowSet};

/// Normalization method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalingMethod {
    /// Zero mean, unit (population) standard deviation.
    #[default]
    Standard,
    /// Map the train range onto [0, 1].
    MinMax,
}

/// Affine statistics for one channel: `scaled = (x - center) / scale`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelStats {
    pub center: f64,
    pub scale: f64,
}

impl ChannelStats {
    fn fit(method: ScalingMethod, values: &[f64]) -> Self {
        let (center, spread) = match method {
            ScalingMethod::Standard => {
                let n = values.len() as f64;
                let mean = values.iter().sum::<f64>() / n;
                let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
                (mean, var.sqrt())
            }
            ScalingMethod::MinMax => {
                let min = values.iter().copied().fold(f64::INFINITY, f64::min);
                let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                (min, max - min)
            }
        };

        // Constant channels pass through shifted but unscaled.
        let scale = if spread.is_finite() && spread > f64::EPSILON {
            spread
        } else {
            1.0
        };

        Self { center, scale }
    }

    pub fn apply(&self, x: f64) -> f64 {
        (x - self.center) / self.scale
    }

    pub fn invert(&self, x: f64) -> f64 {
        x * self.scale + self.center
    }
}

/// Fitted scaler statistics. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalerState {
    pub method: ScalingMethod,
    /// Statistics for the forecast target.
    pub target: ChannelStats,
    /// Statistics for each covariate column, in frame order.
    pub covariates: Vec<ChannelStats>,
    /// Train segment these statistics were computed from.
    pub fingerprint: SegmentFingerprint,
}

impl ScalerState {
    /// Fail with `StaleScaler` unless this state was fit on `expected`.
    pub fn ensure_bound_to(&self, expected: &SegmentFingerprint) -> EngineResult<()> {
        if &self.fingerprint != expected {
            return Err(ForecastError::StaleScaler {
                expected: expected.to_string(),
                found: self.fingerprint.to_string(),
            });
        }
        Ok(())
    }
}

/// Stateless scaler; all state lives in `ScalerState`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scaler {
    method: ScalingMethod,
}

impl Scaler {
    pub fn new(method: ScalingMethod) -> Self {
        Self { method }
    }

    pub fn method(&self) -> ScalingMethod {
        self.method
    }

    /// Compute statistics from the train segment.
    pub fn fit(&self, train: &TrainSegment<'_>) -> EngineResult<ScalerState> {
        if train.is_empty() {
            return Err(ForecastError::InsufficientData {
                segment: "train".to_string(),
                required: 1,
                available: 0,
            });
        }

        let target = ChannelStats::fit(self.method, train.values());
        let covariates = train
            .covariates()
            .iter()
            .map(|column| ChannelStats::fit(self.method, column))
            .collect();
        let fingerprint = train.fingerprint();

        debug!(
            "Fit {:?} scaler on {} train points (center {:.4}, scale {:.4})",
            self.method,
            train.len(),
            target.center,
            target.scale
        );

        Ok(ScalerState {
            method: self.method,
            target,
            covariates,
            fingerprint,
        })
    }

    /// Scale target values.
    pub fn transform(state: &ScalerState, values: &[f64]) -> Vec<f64> {
        values.iter().map(|&v| state.target.apply(v)).collect()
    }

    /// Undo `transform`. Values outside the fit range are not clamped.
    pub fn inverse_transform(state: &ScalerState, scaled: &[f64]) -> Vec<f64> {
        scaled.iter().map(|&v| state.target.invert(v)).collect()
    }

    /// Scale a context window's target and covariate channels.
    pub fn transform_context(state: &ScalerState, context: &ContextWindow) -> EngineResult<ContextWindow> {
        if context.width() != state.covariates.len() {
            return Err(ForecastError::ShapeMismatch {
                what: "covariate columns".to_string(),
                expected: state.covariates.len(),
                actual: context.width(),
            });
        }

        Ok(ContextWindow {
            values: Self::transform(state, &context.values),
            covariates: context
                .covariates
                .iter()
                .zip(&state.covariates)
                .map(|(column, stats)| column.iter().map(|&v| stats.apply(v)).collect())
                .collect(),
        })
    }

    /// Scale a single window's context and target.
    pub fn transform_window(state: &ScalerState, window: &Window) -> EngineResult<Window> {
        Ok(Window {
            context: Self::transform_context(state, &window.context)?,
            target: Self::transform(state, &window.target),
            ..window.clone()
        })
    }

    /// Scale every window in a set cut from the same train segment.
    pub fn transform_windows(state: &ScalerState, windows: &WindowSet) -> EngineResult<WindowSet> {
        state.ensure_bound_to(&windows.train_fingerprint)?;

        let scale_all = |ws: &[Window]| -> EngineResult<Vec<Window>> {
            ws.iter().map(|w| Self::transform_window(state, w)).collect()
        };

        Ok(WindowSet {
            train: scale_all(&windows.train)?,
            validation: scale_all(&windows.validation)?,
            test: scale_all(&windows.test)?,
            context_length: windows.context_length,
            horizon: windows.horizon,
            stride: windows.stride,
            train_fingerprint: windows.train_fingerprint,
            covariate_names: windows.covariate_names.clone(),
        })
    }
}
