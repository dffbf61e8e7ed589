//! Core data types for cost/usage time series.
//!
//! A `Series` is a cleaned, strictly increasing sequence of timestamped
//! finite values. Exogenous features live in a separate `CovariateFrame`
//! whose alignment is checked wherever it meets a series.

use std::collections::HashMap;
use std::fmt;
use std::ops::Range;

use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::error::{EngineResult, ForecastError};

/// A cleaned univariate time series.
///
/// Deserialization goes through `Series::new`, so decoded series obey the
/// same ordering and finiteness checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawSeries")]
pub struct Series {
    timestamps: Vec<NaiveDateTime>,
    values: Vec<f64>,
}

/// Unchecked wire form of `Series`.
#[derive(Deserialize)]
struct RawSeries {
    timestamps: Vec<NaiveDateTime>,
    values: Vec<f64>,
}

impl TryFrom<RawSeries> for Series {
    type Error = ForecastError;

    fn try_from(raw: RawSeries) -> EngineResult<Self> {
        Self::new(raw.timestamps, raw.values)
    }
}

impl Series {
    /// Create a series, checking ordering and finiteness.
    pub fn new(timestamps: Vec<NaiveDateTime>, values: Vec<f64>) -> EngineResult<Self> {
        if timestamps.len() != values.len() {
            return Err(ForecastError::InvalidSeries {
                index: timestamps.len().min(values.len()),
                reason: format!(
                    "{} timestamps but {} values",
                    timestamps.len(),
                    values.len()
                ),
            });
        }

        for (index, pair) in timestamps.windows(2).enumerate() {
            if pair[1] <= pair[0] {
                return Err(ForecastError::InvalidSeries {
                    index: index + 1,
                    reason: format!(
                        "timestamp {} does not follow {}",
                        pair[1], pair[0]
                    ),
                });
            }
        }

        if let Some(index) = values.iter().position(|v| !v.is_finite()) {
            return Err(ForecastError::InvalidSeries {
                index,
                reason: format!("non-finite value {}", values[index]),
            });
        }

        Ok(Self { timestamps, values })
    }

    /// Create a series with evenly spaced timestamps.
    pub fn regular(start: NaiveDateTime, step: Duration, values: Vec<f64>) -> EngineResult<Self> {
        if step <= Duration::zero() {
            return Err(ForecastError::InvalidConfig(format!(
                "series step must be positive, got {}",
                step
            )));
        }
        let timestamps = (0..values.len())
            .map(|i| start + step * i as i32)
            .collect();
        Self::new(timestamps, values)
    }

    /// Create a daily series starting at midnight of `start`.
    pub fn daily(start: NaiveDate, values: Vec<f64>) -> EngineResult<Self> {
        Self::regular(start.and_time(chrono::NaiveTime::MIN), Duration::days(1), values)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn timestamps(&self) -> &[NaiveDateTime] {
        &self.timestamps
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn first_timestamp(&self) -> Option<NaiveDateTime> {
        self.timestamps.first().copied()
    }

    pub fn last_timestamp(&self) -> Option<NaiveDateTime> {
        self.timestamps.last().copied()
    }

    /// Number of observations at or before `ts`.
    pub fn count_at_or_before(&self, ts: NaiveDateTime) -> usize {
        self.timestamps.partition_point(|t| *t <= ts)
    }

    /// Number of observations strictly before `ts`.
    pub fn count_before(&self, ts: NaiveDateTime) -> usize {
        self.timestamps.partition_point(|t| *t < ts)
    }

    /// Most common spacing between consecutive observations.
    ///
    /// Ties resolve to the shorter spacing. `None` for fewer than two points.
    pub fn step(&self) -> Option<Duration> {
        let mut counts: HashMap<i64, usize> = HashMap::new();
        for pair in self.timestamps.windows(2) {
            *counts
                .entry((pair[1] - pair[0]).num_milliseconds())
                .or_insert(0) += 1;
        }
        counts
            .into_iter()
            .max_by(|(a_ms, a_n), (b_ms, b_n)| a_n.cmp(b_n).then(b_ms.cmp(a_ms)))
            .map(|(ms, _)| Duration::milliseconds(ms))
    }

    /// Copy of the first `len` observations.
    pub fn prefix(&self, len: usize) -> Self {
        self.slice(0..len)
    }

    /// Copy of the observations in `range`, clamped to the series.
    pub fn slice(&self, range: Range<usize>) -> Self {
        let end = range.end.min(self.len());
        let start = range.start.min(end);
        Self {
            timestamps: self.timestamps[start..end].to_vec(),
            values: self.values[start..end].to_vec(),
        }
    }
}

/// A single named exogenous feature column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Covariate {
    pub name: String,
    pub values: Vec<f64>,
}

/// Exogenous covariates aligned per timestamp with a series.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CovariateFrame {
    columns: Vec<Covariate>,
}

impl CovariateFrame {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a column. Values must be finite.
    pub fn with_column(mut self, name: &str, values: Vec<f64>) -> EngineResult<Self> {
        if let Some(index) = values.iter().position(|v| !v.is_finite()) {
            return Err(ForecastError::InvalidSeries {
                index,
                reason: format!("covariate '{}' has non-finite value {}", name, values[index]),
            });
        }
        self.columns.push(Covariate {
            name: name.to_string(),
            values,
        });
        Ok(self)
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn columns(&self) -> &[Covariate] {
        &self.columns
    }

    pub fn names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Check every column has exactly `series_len` values.
    pub fn check_aligned(&self, series_len: usize) -> EngineResult<()> {
        for column in &self.columns {
            if column.values.len() != series_len {
                return Err(ForecastError::MisalignedFeatures {
                    column: column.name.clone(),
                    expected: series_len,
                    actual: column.values.len(),
                });
            }
        }
        Ok(())
    }

    /// Copy of the first `len` rows.
    pub fn prefix(&self, len: usize) -> Self {
        self.slice(0..len)
    }

    /// Copy of the rows in `range`, clamped per column.
    pub fn slice(&self, range: Range<usize>) -> Self {
        Self {
            columns: self
                .columns
                .iter()
                .map(|c| {
                    let end = range.end.min(c.values.len());
                    let start = range.start.min(end);
                    Covariate {
                        name: c.name.clone(),
                        values: c.values[start..end].to_vec(),
                    }
                })
                .collect(),
        }
    }
}

/// Identity of a series segment: length plus a content digest.
///
/// Used to bind fitted scaler statistics to the exact train segment they
/// were computed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SegmentFingerprint {
    pub len: usize,
    pub digest: u64,
}

impl SegmentFingerprint {
    const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

    /// Digest timestamps, values and covariate columns of a segment.
    pub fn compute(timestamps: &[NaiveDateTime], values: &[f64], covariates: &[&[f64]]) -> Self {
        let mut hash = Self::FNV_OFFSET;
        let mut feed = |word: u64| {
            for byte in word.to_le_bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(Self::FNV_PRIME);
            }
        };

        for ts in timestamps {
            feed(ts.and_utc().timestamp_millis() as u64);
        }
        for v in values {
            feed(v.to_bits());
        }
        for column in covariates {
            feed(column.len() as u64);
            for v in column.iter() {
                feed(v.to_bits());
            }
        }

        Self {
            len: values.len(),
            digest: hash,
        }
    }
}

impl fmt::Display for SegmentFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{:016x}", self.len, self.digest)
    }
}
