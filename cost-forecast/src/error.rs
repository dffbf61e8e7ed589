//! Error taxonomy for the forecasting engine.
//!
//! Input validation errors (windows, scaler, model shape) are raised
//! immediately and never retried. `NonFiniteLoss` ends a training run but
//! carries the last good checkpoint so the caller still gets a usable model.

use chrono::NaiveDateTime;
use thiserror::Error;

use crate::model::ForecastModelState;

/// Phase of training in which a loss was computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LossPhase {
    Initial,
    Training,
    Validation,
}

impl std::fmt::Display for LossPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Initial => write!(f, "initial validation"),
            Self::Training => write!(f, "training"),
            Self::Validation => write!(f, "validation"),
        }
    }
}

#[derive(Error, Debug)]
pub enum ForecastError {
    #[error("Insufficient data in {segment}: {available} points, need at least {required}")]
    InsufficientData {
        segment: String,
        required: usize,
        available: usize,
    },

    #[error("Covariate '{column}' has {actual} values, series has {expected}")]
    MisalignedFeatures {
        column: String,
        expected: usize,
        actual: usize,
    },

    #[error("Scaler state fit on segment {found} used with data from segment {expected}")]
    StaleScaler { expected: String, found: String },

    #[error("Shape mismatch in {what}: expected {expected}, got {actual}")]
    ShapeMismatch {
        what: String,
        expected: usize,
        actual: usize,
    },

    #[error("Non-finite {phase} loss at pass {pass}{}", .batch.map(|b| format!(", batch {}", b)).unwrap_or_default())]
    NonFiniteLoss {
        phase: LossPhase,
        pass: usize,
        batch: Option<usize>,
        /// Best checkpoint obtained before divergence.
        checkpoint: Option<Box<ForecastModelState>>,
    },

    #[error("Insufficient history before {as_of}: {available} points, need {required}")]
    InsufficientHistory {
        as_of: NaiveDateTime,
        required: usize,
        available: usize,
    },

    #[error("Incompatible model state schema version {found} (expected {expected})")]
    IncompatibleVersion { expected: u16, found: u16 },

    #[error("Invalid series at index {index}: {reason}")]
    InvalidSeries { index: usize, reason: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),
}

impl ForecastError {
    /// Take the last good checkpoint out of a `NonFiniteLoss` error.
    pub fn into_checkpoint(self) -> Option<ForecastModelState> {
        match self {
            Self::NonFiniteLoss { checkpoint, .. } => checkpoint.map(|c| *c),
            _ => None,
        }
    }

    /// Whether the caller passed malformed input (as opposed to a runtime failure).
    pub fn is_input_error(&self) -> bool {
        !matches!(self, Self::NonFiniteLoss { .. } | Self::Serialization(_))
    }
}

pub type EngineResult<T> = Result<T, ForecastError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_finite_message_includes_batch() {
        let err = ForecastError::NonFiniteLoss {
            phase: LossPhase::Training,
            pass: 3,
            batch: Some(7),
            checkpoint: None,
        };
        assert_eq!(err.to_string(), "Non-finite training loss at pass 3, batch 7");
        assert!(!err.is_input_error());
    }

    #[test]
    fn test_insufficient_data_message() {
        let err = ForecastError::InsufficientData {
            segment: "series".to_string(),
            required: 21,
            available: 10,
        };
        assert!(err.to_string().contains("10 points"));
        assert!(err.is_input_error());
        assert!(err.into_checkpoint().is_none());
    }
}
