//! Supervised window construction.
//!
//! Slides a (context, target) frame through each split segment separately.
//! A window never straddles a segment boundary, so no validation or test
//! target is ever visible in a training context.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::data::{
    CovariateFrame, Segment, SegmentFingerprint, SegmentRole, Series, SeriesSplit, SplitBoundaries,
};
use crate::error::{EngineResult, ForecastError};

/// Model input: the last `L` values plus aligned covariate slices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextWindow {
    pub values: Vec<f64>,
    /// One slice per covariate column, each `values.len()` long.
    pub covariates: Vec<Vec<f64>>,
}

impl ContextWindow {
    pub fn new(values: Vec<f64>) -> Self {
        Self {
            values,
            covariates: Vec::new(),
        }
    }

    pub fn with_covariates(mut self, covariates: Vec<Vec<f64>>) -> Self {
        self.covariates = covariates;
        self
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Number of covariate columns.
    pub fn width(&self) -> usize {
        self.covariates.len()
    }

    pub fn last_value(&self) -> Option<f64> {
        self.values.last().copied()
    }
}

/// A supervised (context, target) example.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Window {
    /// Series index of the first context point.
    pub position: usize,
    pub role: SegmentRole,
    pub context: ContextWindow,
    pub target: Vec<f64>,
    /// Timestamp of the last context point.
    pub origin: NaiveDateTime,
    pub target_timestamps: Vec<NaiveDateTime>,
}

impl Window {
    /// Series index of the first target point.
    pub fn target_position(&self) -> usize {
        self.position + self.context.len()
    }

    pub fn horizon(&self) -> usize {
        self.target.len()
    }
}

/// Windows for every segment of one split.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowSet {
    pub train: Vec<Window>,
    pub validation: Vec<Window>,
    pub test: Vec<Window>,
    pub context_length: usize,
    pub horizon: usize,
    pub stride: usize,
    /// Identity of the train segment the windows were cut from.
    pub train_fingerprint: SegmentFingerprint,
    pub covariate_names: Vec<String>,
}

impl WindowSet {
    pub fn windows(&self, role: SegmentRole) -> &[Window] {
        match role {
            SegmentRole::Train => &self.train,
            SegmentRole::Validation => &self.validation,
            SegmentRole::Test => &self.test,
        }
    }

    pub fn total(&self) -> usize {
        self.train.len() + self.validation.len() + self.test.len()
    }
}

/// Builds windows with a fixed context length, horizon and stride.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowBuilder {
    context_length: usize,
    horizon: usize,
    stride: usize,
}

impl WindowBuilder {
    pub fn new(context_length: usize, horizon: usize) -> Self {
        Self {
            context_length,
            horizon,
            stride: 1,
        }
    }

    pub fn with_stride(mut self, stride: usize) -> Self {
        self.stride = stride;
        self
    }

    pub fn context_length(&self) -> usize {
        self.context_length
    }

    pub fn horizon(&self) -> usize {
        self.horizon
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    fn validate(&self) -> EngineResult<()> {
        if self.context_length == 0 || self.horizon == 0 || self.stride == 0 {
            return Err(ForecastError::InvalidConfig(format!(
                "context_length ({}), horizon ({}) and stride ({}) must all be positive",
                self.context_length, self.horizon, self.stride
            )));
        }
        Ok(())
    }

    /// Partition `series` and build windows for every segment.
    pub fn build(
        &self,
        series: &Series,
        covariates: Option<&CovariateFrame>,
        boundaries: &SplitBoundaries,
    ) -> EngineResult<WindowSet> {
        self.validate()?;
        let required = self.context_length + self.horizon;
        if series.len() < required {
            return Err(ForecastError::InsufficientData {
                segment: "series".to_string(),
                required,
                available: series.len(),
            });
        }

        let split = SeriesSplit::new(series, covariates, boundaries)?;
        self.build_split(&split)
    }

    /// Build windows for an existing split.
    pub fn build_split(&self, split: &SeriesSplit<'_>) -> EngineResult<WindowSet> {
        self.validate()?;

        let train = self.segment_windows(split.train().segment());
        let validation = self.segment_windows(&split.validation());
        let test = self.segment_windows(&split.test());

        debug!(
            "Built windows (L={}, H={}, stride={}): train {}, validation {}, test {}",
            self.context_length,
            self.horizon,
            self.stride,
            train.len(),
            validation.len(),
            test.len()
        );

        Ok(WindowSet {
            train,
            validation,
            test,
            context_length: self.context_length,
            horizon: self.horizon,
            stride: self.stride,
            train_fingerprint: split.train().fingerprint(),
            covariate_names: split
                .covariates()
                .map(|c| c.names().into_iter().map(str::to_string).collect())
                .unwrap_or_default(),
        })
    }

    /// Number of windows that fit in a segment of `len` points.
    pub fn windows_in(&self, len: usize) -> usize {
        let span = self.context_length + self.horizon;
        if len < span || self.stride == 0 {
            0
        } else {
            (len - span) / self.stride + 1
        }
    }

    /// Windows lying entirely inside one segment.
    pub fn segment_windows(&self, segment: &Segment<'_>) -> Vec<Window> {
        let count = self.windows_in(segment.len());
        let offset = segment.range().start;
        let timestamps = segment.timestamps();
        let values = segment.values();
        let covariates = segment.covariates();

        (0..count)
            .map(|k| {
                let start = k * self.stride;
                let split_at = start + self.context_length;
                let end = split_at + self.horizon;

                Window {
                    position: offset + start,
                    role: segment.role(),
                    context: ContextWindow {
                        values: values[start..split_at].to_vec(),
                        covariates: covariates
                            .iter()
                            .map(|c| c[start..split_at].to_vec())
                            .collect(),
                    },
                    target: values[split_at..end].to_vec(),
                    origin: timestamps[split_at - 1],
                    target_timestamps: timestamps[split_at..end].to_vec(),
                }
            })
            .collect()
    }
}

/// Extract the context window ending just before series index `end`.
pub fn context_ending_at(
    series: &Series,
    covariates: Option<&CovariateFrame>,
    end: usize,
    context_length: usize,
) -> EngineResult<ContextWindow> {
    if end > series.len() {
        return Err(ForecastError::ShapeMismatch {
            what: "context end position".to_string(),
            expected: series.len(),
            actual: end,
        });
    }
    if end < context_length {
        return Err(ForecastError::InsufficientData {
            segment: "context".to_string(),
            required: context_length,
            available: end,
        });
    }

    let start = end - context_length;
    let cov = match covariates {
        Some(frame) => {
            frame.check_aligned(series.len())?;
            frame
                .columns()
                .iter()
                .map(|c| c.values[start..end].to_vec())
                .collect()
        }
        None => Vec::new(),
    };

    Ok(ContextWindow::new(series.values()[start..end].to_vec()).with_covariates(cov))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn daily(n: usize) -> Series {
        Series::daily(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            (1..=n).map(|i| i as f64).collect(),
        )
        .unwrap()
    }

    fn bounds_at(s: &Series, train: usize, val: usize) -> SplitBoundaries {
        SplitBoundaries::new(s.timestamps()[train - 1], s.timestamps()[val - 1])
    }

    #[test]
    fn test_window_counts_per_segment() {
        let s = daily(100);
        let set = WindowBuilder::new(14, 7).build(&s, None, &bounds_at(&s, 70, 85)).unwrap();

        assert_eq!(set.train.len(), 70 - 14 - 7 + 1);
        // 15-point segments cannot hold a 21-point window.
        assert!(set.validation.is_empty());
        assert!(set.test.is_empty());
    }

    #[test]
    fn test_windows_do_not_cross_boundaries() {
        let s = daily(200);
        let bounds = bounds_at(&s, 120, 160);
        let set = WindowBuilder::new(10, 5).build(&s, None, &bounds).unwrap();

        for w in &set.train {
            assert_eq!(w.context.len(), 10);
            assert_eq!(w.target.len(), 5);
            assert!(*w.target_timestamps.last().unwrap() <= bounds.train_end);
        }
        for w in &set.validation {
            assert!(s.timestamps()[w.position] > bounds.train_end);
            assert!(*w.target_timestamps.last().unwrap() <= bounds.validation_end);
        }
        for w in &set.test {
            assert!(s.timestamps()[w.position] > bounds.validation_end);
        }
    }

    #[test]
    fn test_context_and_target_are_contiguous() {
        let s = daily(40);
        let set = WindowBuilder::new(5, 3).build(&s, None, &bounds_at(&s, 30, 35)).unwrap();
        let w = &set.train[4];
        assert_eq!(w.context.values, vec![5.0, 6.0, 7.0, 8.0, 9.0]);
        assert_eq!(w.target, vec![10.0, 11.0, 12.0]);
        assert_eq!(w.origin, s.timestamps()[8]);
        assert_eq!(w.target_position(), 9);
    }

    #[test]
    fn test_stride() {
        let s = daily(50);
        let builder = WindowBuilder::new(5, 2).with_stride(3);
        let set = builder.build(&s, None, &bounds_at(&s, 30, 40)).unwrap();
        assert_eq!(set.train.len(), (30 - 7) / 3 + 1);
        assert_eq!(set.train[1].position - set.train[0].position, 3);
    }

    #[test]
    fn test_insufficient_data() {
        let s = daily(10);
        let err = WindowBuilder::new(14, 7)
            .build(&s, None, &bounds_at(&s, 5, 8))
            .unwrap_err();
        assert!(matches!(
            err,
            ForecastError::InsufficientData { required: 21, available: 10, .. }
        ));
    }

    #[test]
    fn test_misaligned_covariates() {
        let s = daily(30);
        let frame = CovariateFrame::new().with_column("temp", vec![1.0; 29]).unwrap();
        let err = WindowBuilder::new(5, 2)
            .build(&s, Some(&frame), &bounds_at(&s, 20, 25))
            .unwrap_err();
        assert!(matches!(err, ForecastError::MisalignedFeatures { .. }));
    }

    #[test]
    fn test_covariates_follow_context() {
        let s = daily(30);
        let frame = CovariateFrame::new()
            .with_column("temp", (0..30).map(|i| i as f64 * 10.0).collect())
            .unwrap();
        let set = WindowBuilder::new(4, 2)
            .build(&s, Some(&frame), &bounds_at(&s, 20, 25))
            .unwrap();
        let w = &set.train[2];
        assert_eq!(w.context.covariates, vec![vec![20.0, 30.0, 40.0, 50.0]]);
        assert_eq!(set.covariate_names, vec!["temp".to_string()]);
    }

    #[test]
    fn test_build_is_deterministic() {
        let s = daily(60);
        let b = WindowBuilder::new(7, 3);
        let a = b.build(&s, None, &bounds_at(&s, 40, 50)).unwrap();
        let c = b.build(&s, None, &bounds_at(&s, 40, 50)).unwrap();
        assert_eq!(a.train, c.train);
        assert_eq!(a.train_fingerprint, c.train_fingerprint);
    }

    #[test]
    fn test_context_ending_at() {
        let s = daily(20);
        let ctx = context_ending_at(&s, None, 10, 4).unwrap();
        assert_eq!(ctx.values, vec![7.0, 8.0, 9.0, 10.0]);
        assert!(context_ending_at(&s, None, 3, 4).is_err());
    }

    #[test]
    fn test_zero_horizon_rejected() {
        let s = daily(20);
        assert!(matches!(
            WindowBuilder::new(5, 0).build(&s, None, &bounds_at(&s, 10, 15)),
            Err(ForecastError::InvalidConfig(_))
        ));
    }
}
