//! Time-ordered train/validation/test partitioning.
//!
//! Boundaries are inclusive segment end timestamps. Segments are contiguous
//! index ranges of the series and never interleave.

use std::fmt;
use std::ops::Range;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::types::{CovariateFrame, SegmentFingerprint, Series};
use crate::error::{EngineResult, ForecastError};

/// Split points for a single train/validation/test partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitBoundaries {
    /// Last timestamp of the train segment.
    pub train_end: NaiveDateTime,
    /// Last timestamp of the validation segment.
    pub validation_end: NaiveDateTime,
    /// Last timestamp of the test segment. `None` runs to the end of the series.
    pub test_end: Option<NaiveDateTime>,
}

impl SplitBoundaries {
    pub fn new(train_end: NaiveDateTime, validation_end: NaiveDateTime) -> Self {
        Self {
            train_end,
            validation_end,
            test_end: None,
        }
    }

    pub fn with_test_end(mut self, test_end: NaiveDateTime) -> Self {
        self.test_end = Some(test_end);
        self
    }

    /// Check that boundaries are strictly increasing.
    pub fn validate(&self) -> EngineResult<()> {
        if self.validation_end <= self.train_end {
            return Err(ForecastError::InvalidConfig(format!(
                "validation_end {} must be after train_end {}",
                self.validation_end, self.train_end
            )));
        }
        if let Some(test_end) = self.test_end {
            if test_end <= self.validation_end {
                return Err(ForecastError::InvalidConfig(format!(
                    "test_end {} must be after validation_end {}",
                    test_end, self.validation_end
                )));
            }
        }
        Ok(())
    }
}

/// Role of a segment within a split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SegmentRole {
    Train,
    Validation,
    Test,
}

impl fmt::Display for SegmentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Train => "train",
            Self::Validation => "validation",
            Self::Test => "test",
        };
        f.write_str(name)
    }
}

/// A borrowed contiguous slice of a series (and its covariates).
#[derive(Debug, Clone)]
pub struct Segment<'a> {
    role: SegmentRole,
    range: Range<usize>,
    series: &'a Series,
    covariates: Option<&'a CovariateFrame>,
}

impl<'a> Segment<'a> {
    pub fn role(&self) -> SegmentRole {
        self.role
    }

    /// Index range of this segment within the full series.
    pub fn range(&self) -> Range<usize> {
        self.range.clone()
    }

    pub fn len(&self) -> usize {
        self.range.len()
    }

    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }

    pub fn timestamps(&self) -> &'a [NaiveDateTime] {
        &self.series.timestamps()[self.range.clone()]
    }

    pub fn values(&self) -> &'a [f64] {
        &self.series.values()[self.range.clone()]
    }

    /// Number of covariate columns.
    pub fn covariate_width(&self) -> usize {
        self.covariates.map(|c| c.width()).unwrap_or(0)
    }

    /// Segment slice of each covariate column, in frame order.
    pub fn covariates(&self) -> Vec<&'a [f64]> {
        match self.covariates {
            Some(frame) => frame
                .columns()
                .iter()
                .map(|c| &c.values[self.range.clone()])
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn fingerprint(&self) -> SegmentFingerprint {
        SegmentFingerprint::compute(self.timestamps(), self.values(), &self.covariates())
    }
}

/// The train segment. Only this type can be used to fit a scaler.
#[derive(Debug, Clone)]
pub struct TrainSegment<'a>(Segment<'a>);

impl<'a> TrainSegment<'a> {
    pub fn segment(&self) -> &Segment<'a> {
        &self.0
    }

    pub fn values(&self) -> &'a [f64] {
        self.0.values()
    }

    pub fn covariates(&self) -> Vec<&'a [f64]> {
        self.0.covariates()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn fingerprint(&self) -> SegmentFingerprint {
        self.0.fingerprint()
    }
}

/// A series partitioned into train, validation and test segments.
#[derive(Debug, Clone)]
pub struct SeriesSplit<'a> {
    series: &'a Series,
    covariates: Option<&'a CovariateFrame>,
    boundaries: SplitBoundaries,
    train: Range<usize>,
    validation: Range<usize>,
    test: Range<usize>,
}

impl<'a> SeriesSplit<'a> {
    /// Partition `series` by `boundaries`.
    ///
    /// Fails if covariates are misaligned, boundaries are out of order, or
    /// the train segment is empty.
    pub fn new(
        series: &'a Series,
        covariates: Option<&'a CovariateFrame>,
        boundaries: &SplitBoundaries,
    ) -> EngineResult<Self> {
        boundaries.validate()?;
        if let Some(frame) = covariates {
            frame.check_aligned(series.len())?;
        }

        let train_stop = series.count_at_or_before(boundaries.train_end);
        let validation_stop = series.count_at_or_before(boundaries.validation_end);
        let test_stop = match boundaries.test_end {
            Some(end) => series.count_at_or_before(end),
            None => series.len(),
        };

        if train_stop == 0 {
            return Err(ForecastError::InsufficientData {
                segment: SegmentRole::Train.to_string(),
                required: 1,
                available: 0,
            });
        }

        Ok(Self {
            series,
            covariates: covariates.filter(|c| !c.is_empty()),
            boundaries: *boundaries,
            train: 0..train_stop,
            validation: train_stop..validation_stop,
            test: validation_stop..test_stop,
        })
    }

    pub fn series(&self) -> &'a Series {
        self.series
    }

    pub fn covariates(&self) -> Option<&'a CovariateFrame> {
        self.covariates
    }

    pub fn boundaries(&self) -> &SplitBoundaries {
        &self.boundaries
    }

    pub fn train(&self) -> TrainSegment<'a> {
        TrainSegment(self.segment(SegmentRole::Train))
    }

    pub fn validation(&self) -> Segment<'a> {
        self.segment(SegmentRole::Validation)
    }

    pub fn test(&self) -> Segment<'a> {
        self.segment(SegmentRole::Test)
    }

    pub fn segment(&self, role: SegmentRole) -> Segment<'a> {
        let range = match role {
            SegmentRole::Train => self.train.clone(),
            SegmentRole::Validation => self.validation.clone(),
            SegmentRole::Test => self.test.clone(),
        };
        Segment {
            role,
            range,
            series: self.series,
            covariates: self.covariates,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};

    fn series(n: usize) -> Series {
        Series::daily(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            (0..n).map(|i| i as f64).collect(),
        )
        .unwrap()
    }

    fn nth_day(s: &Series, n: usize) -> NaiveDateTime {
        s.timestamps()[n - 1]
    }

    #[test]
    fn test_segments_are_disjoint_and_ordered() {
        let s = series(100);
        let bounds = SplitBoundaries::new(nth_day(&s, 70), nth_day(&s, 85));
        let split = SeriesSplit::new(&s, None, &bounds).unwrap();

        assert_eq!(split.train().len(), 70);
        assert_eq!(split.validation().len(), 15);
        assert_eq!(split.test().len(), 15);

        let train_max = *split.train().segment().timestamps().last().unwrap();
        let val_min = split.validation().timestamps()[0];
        let test_min = split.test().timestamps()[0];
        assert!(train_max < val_min);
        assert!(val_min < test_min);
    }

    #[test]
    fn test_test_end_truncates() {
        let s = series(100);
        let bounds = SplitBoundaries::new(nth_day(&s, 70), nth_day(&s, 85))
            .with_test_end(nth_day(&s, 90));
        let split = SeriesSplit::new(&s, None, &bounds).unwrap();
        assert_eq!(split.test().len(), 5);
    }

    #[test]
    fn test_rejects_out_of_order_boundaries() {
        let s = series(10);
        let bounds = SplitBoundaries::new(nth_day(&s, 5), nth_day(&s, 3));
        assert!(matches!(
            SeriesSplit::new(&s, None, &bounds),
            Err(ForecastError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_empty_train_segment() {
        let s = series(10);
        let before = nth_day(&s, 1) - Duration::days(5);
        let bounds = SplitBoundaries::new(before, nth_day(&s, 5));
        assert!(matches!(
            SeriesSplit::new(&s, None, &bounds),
            Err(ForecastError::InsufficientData { .. })
        ));
    }

    #[test]
    fn test_misaligned_covariates() {
        let s = series(10);
        let frame = CovariateFrame::new().with_column("temp", vec![0.0; 9]).unwrap();
        let bounds = SplitBoundaries::new(nth_day(&s, 5), nth_day(&s, 8));
        assert!(matches!(
            SeriesSplit::new(&s, Some(&frame), &bounds),
            Err(ForecastError::MisalignedFeatures { .. })
        ));
    }
}
