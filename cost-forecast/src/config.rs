//! Engine configuration.
//!
//! Plain serde structs with defaults; reading them from files is left to the
//! caller.

use serde::{Deserialize, Serialize};

use crate::data::{Series, SplitBoundaries};
use crate::error::{EngineResult, ForecastError};
use crate::model::{LastValue, LstmConfig, LstmForecaster, ModelVariant, SeasonalNaive};
use crate::scaling::ScalingMethod;
use crate::training::TrainingConfig;
use crate::windows::WindowBuilder;

/// Model family to build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelKind {
    LastValue,
    SeasonalNaive { season: usize },
    Lstm(LstmConfig),
}

impl Default for ModelKind {
    fn default() -> Self {
        Self::Lstm(LstmConfig::default())
    }
}

/// Full configuration for one fit/evaluate run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastConfig {
    pub context_length: usize,
    pub horizon: usize,
    pub stride: usize,
    /// Share of observations in the train segment.
    pub train_fraction: f64,
    /// Share of observations in the validation segment; the rest is test.
    pub validation_fraction: f64,
    pub scaling: ScalingMethod,
    pub model: ModelKind,
    pub training: TrainingConfig,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            context_length: 14,
            horizon: 7,
            stride: 1,
            train_fraction: 0.7,
            validation_fraction: 0.15,
            scaling: ScalingMethod::Standard,
            model: ModelKind::default(),
            training: TrainingConfig::default(),
        }
    }
}

impl ForecastConfig {
    pub fn new(context_length: usize, horizon: usize) -> Self {
        Self {
            context_length,
            horizon,
            ..Self::default()
        }
    }

    pub fn with_stride(mut self, stride: usize) -> Self {
        self.stride = stride;
        self
    }

    pub fn with_split(mut self, train_fraction: f64, validation_fraction: f64) -> Self {
        self.train_fraction = train_fraction;
        self.validation_fraction = validation_fraction;
        self
    }

    pub fn with_scaling(mut self, scaling: ScalingMethod) -> Self {
        self.scaling = scaling;
        self
    }

    pub fn with_model(mut self, model: ModelKind) -> Self {
        self.model = model;
        self
    }

    pub fn with_training(mut self, training: TrainingConfig) -> Self {
        self.training = training;
        self
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.context_length == 0 || self.horizon == 0 || self.stride == 0 {
            return Err(ForecastError::InvalidConfig(format!(
                "context_length ({}), horizon ({}) and stride ({}) must all be positive",
                self.context_length, self.horizon, self.stride
            )));
        }
        let fractions_ok = self.train_fraction > 0.0
            && self.validation_fraction > 0.0
            && self.train_fraction + self.validation_fraction < 1.0;
        if !fractions_ok {
            return Err(ForecastError::InvalidConfig(format!(
                "split fractions train={} validation={} must be positive and sum below 1",
                self.train_fraction, self.validation_fraction
            )));
        }
        match &self.model {
            ModelKind::SeasonalNaive { season } if *season == 0 || *season > self.context_length => {
                return Err(ForecastError::InvalidConfig(format!(
                    "season {} must be in 1..={}",
                    season, self.context_length
                )));
            }
            ModelKind::Lstm(lstm) if lstm.hidden_size == 0 => {
                return Err(ForecastError::InvalidConfig("hidden_size must be positive".to_string()));
            }
            _ => {}
        }
        self.training.validate()
    }

    pub fn window_builder(&self) -> WindowBuilder {
        WindowBuilder::new(self.context_length, self.horizon).with_stride(self.stride)
    }

    /// Build an untrained model for `covariate_width` covariate columns.
    pub fn build_model(&self, covariate_width: usize) -> EngineResult<ModelVariant> {
        Ok(match &self.model {
            ModelKind::LastValue => LastValue::new(self.context_length, self.horizon)
                .with_covariate_width(covariate_width)
                .into(),
            ModelKind::SeasonalNaive { season } => {
                SeasonalNaive::new(self.context_length, self.horizon, *season)?
                    .with_covariate_width(covariate_width)
                    .into()
            }
            ModelKind::Lstm(lstm) => {
                LstmForecaster::new(self.context_length, self.horizon, covariate_width, lstm)?.into()
            }
        })
    }

    /// Split points from the configured fractions, as observation counts
    /// rounded down.
    pub fn boundaries_for(&self, series: &Series) -> EngineResult<SplitBoundaries> {
        let n = series.len();
        let train_len = (n as f64 * self.train_fraction).floor() as usize;
        let validation_end = train_len + (n as f64 * self.validation_fraction).floor() as usize;
        if train_len == 0 || validation_end <= train_len || validation_end >= n {
            return Err(ForecastError::InsufficientData {
                segment: "series".to_string(),
                required: 3,
                available: n,
            });
        }
        let ts = series.timestamps();
        Ok(SplitBoundaries::new(ts[train_len - 1], ts[validation_end - 1]))
    }
}
