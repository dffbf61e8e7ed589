//! Walk-forward fold generation.
//!
//! Folds are laid out by observation counts. Each fold's origin moves
//! forward by `roll` observations; the train segment either grows from the
//! start of the series (expanding) or keeps a fixed length (sliding).

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::data::{Series, SplitBoundaries};
use crate::error::{EngineResult, ForecastError};

/// A single walk-forward fold as index ranges into the full series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalkForwardFold {
    /// Fold number (1-indexed).
    pub fold_num: usize,
    pub train: Range<usize>,
    pub validation: Range<usize>,
    pub test: Range<usize>,
}

impl WalkForwardFold {
    pub fn train_len(&self) -> usize {
        self.train.len()
    }

    pub fn validation_len(&self) -> usize {
        self.validation.len()
    }

    pub fn test_len(&self) -> usize {
        self.test.len()
    }

    /// Observations covered by the fold.
    pub fn span(&self) -> Range<usize> {
        self.train.start..self.test.end
    }

    /// Split boundaries of this fold as timestamps of `series`.
    pub fn boundaries(&self, series: &Series) -> EngineResult<SplitBoundaries> {
        if self.test.end > series.len() {
            return Err(ForecastError::InsufficientData {
                segment: format!("fold {}", self.fold_num),
                required: self.test.end,
                available: series.len(),
            });
        }
        let ts = series.timestamps();
        Ok(SplitBoundaries::new(ts[self.train.end - 1], ts[self.validation.end - 1])
            .with_test_end(ts[self.test.end - 1]))
    }
}

/// Configuration for walk-forward folds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalkForwardConfig {
    /// Train segment length (initial length when expanding).
    pub train_len: usize,
    pub validation_len: usize,
    pub test_len: usize,
    /// Roll forward by this many observations.
    pub roll: usize,
    /// Grow the train segment from the series start instead of sliding it.
    pub expanding: bool,
}

impl Default for WalkForwardConfig {
    fn default() -> Self {
        Self {
            train_len: 365,
            validation_len: 60,
            test_len: 30,
            roll: 30,
            expanding: true,
        }
    }
}

impl WalkForwardConfig {
    pub fn new(train_len: usize, validation_len: usize, test_len: usize) -> Self {
        Self {
            train_len,
            validation_len,
            test_len,
            roll: test_len,
            ..Self::default()
        }
    }

    pub fn with_roll(mut self, roll: usize) -> Self {
        self.roll = roll;
        self
    }

    pub fn sliding(mut self) -> Self {
        self.expanding = false;
        self
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.train_len == 0 || self.validation_len == 0 || self.test_len == 0 || self.roll == 0 {
            return Err(ForecastError::InvalidConfig(format!(
                "walk-forward lengths must be positive (train {}, validation {}, test {}, roll {})",
                self.train_len, self.validation_len, self.test_len, self.roll
            )));
        }
        Ok(())
    }

    fn fold_len(&self) -> usize {
        self.train_len + self.validation_len + self.test_len
    }
}

/// Generator for walk-forward folds over a series of known length.
#[derive(Debug, Clone)]
pub struct WalkForwardPlan {
    config: WalkForwardConfig,
    series_len: usize,
}

impl WalkForwardPlan {
    pub fn new(config: WalkForwardConfig, series_len: usize) -> Self {
        Self { config, series_len }
    }

    pub fn config(&self) -> &WalkForwardConfig {
        &self.config
    }

    /// Generate all folds that fit entirely inside the series.
    pub fn generate(&self) -> Vec<WalkForwardFold> {
        let c = &self.config;
        if c.roll == 0 {
            return Vec::new();
        }

        (0..self.expected_folds())
            .map(|k| {
                let offset = k * c.roll;
                let train_end = c.train_len + offset;
                let validation_end = train_end + c.validation_len;
                let test_end = validation_end + c.test_len;
                let train_start = if c.expanding { 0 } else { offset };

                WalkForwardFold {
                    fold_num: k + 1,
                    train: train_start..train_end,
                    validation: train_end..validation_end,
                    test: validation_end..test_end,
                }
            })
            .collect()
    }

    pub fn expected_folds(&self) -> usize {
        let required = self.config.fold_len();
        if self.series_len < required || self.config.roll == 0 {
            return 0;
        }
        (self.series_len - required) / self.config.roll + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_default_config() {
        let config = WalkForwardConfig::default();
        assert_eq!(config.train_len, 365);
        assert_eq!(config.roll, 30);
        assert!(config.expanding);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_expanding_folds() {
        let plan = WalkForwardPlan::new(WalkForwardConfig::new(50, 10, 10), 100);
        let folds = plan.generate();

        // (100 - 70) / 10 + 1
        assert_eq!(folds.len(), 4);
        assert_eq!(plan.expected_folds(), 4);
        assert_eq!(folds[0].train, 0..50);
        assert_eq!(folds[3].train, 0..80);
        assert_eq!(folds[3].validation, 80..90);
        assert_eq!(folds[3].test, 90..100);
        assert!(folds.windows(2).all(|p| p[1].test.start == p[0].test.end));
    }

    #[test]
    fn test_sliding_folds_keep_train_length() {
        let plan = WalkForwardPlan::new(WalkForwardConfig::new(40, 10, 5).with_roll(7).sliding(), 90);
        let folds = plan.generate();
        assert!(!folds.is_empty());
        for fold in &folds {
            assert_eq!(fold.train_len(), 40);
            assert!(fold.test.end <= 90);
        }
        assert_eq!(folds[1].train.start, 7);
    }

    #[test]
    fn test_too_short_series() {
        let plan = WalkForwardPlan::new(WalkForwardConfig::new(50, 10, 10), 60);
        assert!(plan.generate().is_empty());
    }

    #[test]
    fn test_fold_boundaries() {
        let series = Series::daily(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(), vec![1.0; 30]).unwrap();
        let fold = WalkForwardFold {
            fold_num: 1,
            train: 0..20,
            validation: 20..25,
            test: 25..30,
        };
        let b = fold.boundaries(&series).unwrap();
        assert_eq!(b.train_end, series.timestamps()[19]);
        assert_eq!(b.validation_end, series.timestamps()[24]);
        assert_eq!(b.test_end, Some(series.timestamps()[29]));
    }
}
