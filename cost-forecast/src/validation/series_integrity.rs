//! Pre-flight integrity checks for a cleaned cost/usage series.
//!
//! Validates:
//! - Timestamp ordering (strictly increasing, no duplicates)
//! - Finite values
//! - Regular spacing (gaps relative to the modal step)
//! - Covariate alignment
//! - IQR outlier share

use std::collections::HashMap;

use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::profile::SeriesProfile;
use crate::data::{CovariateFrame, Series};

/// Result of a single validation check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: String,
    pub passed: bool,
    pub message: String,
    pub details: Option<String>,
}

impl CheckResult {
    pub fn pass(name: &str, message: &str) -> Self {
        Self {
            name: name.to_string(),
            passed: true,
            message: message.to_string(),
            details: None,
        }
    }

    pub fn fail(name: &str, message: &str, details: Option<String>) -> Self {
        Self {
            name: name.to_string(),
            passed: false,
            message: message.to_string(),
            details,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SeriesIntegrityReport {
    pub points: usize,
    pub step: Option<Duration>,
    pub profile: Option<SeriesProfile>,
    pub checks: Vec<CheckResult>,
}

impl SeriesIntegrityReport {
    pub fn all_passed(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }

    pub fn failed_checks(&self) -> Vec<&CheckResult> {
        self.checks.iter().filter(|c| !c.passed).collect()
    }

    pub fn check(&self, name: &str) -> Option<&CheckResult> {
        self.checks.iter().find(|c| c.name == name)
    }

    pub fn summary(&self) -> String {
        let passed = self.checks.iter().filter(|c| c.passed).count();
        format!(
            "{} points: {}/{} checks passed",
            self.points,
            passed,
            self.checks.len()
        )
    }
}

/// Thresholds for the integrity checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegrityConfig {
    /// IQR multiplier for outlier fences.
    pub outlier_factor: f64,
    /// Largest tolerated share of outliers.
    pub max_outlier_fraction: f64,
    /// Largest tolerated number of gaps (spacings above the modal step).
    pub max_gaps: usize,
}

impl Default for IntegrityConfig {
    fn default() -> Self {
        Self {
            outlier_factor: 1.5,
            max_outlier_fraction: 0.05,
            max_gaps: 0,
        }
    }
}

/// Runs integrity checks on raw or constructed series.
#[derive(Debug, Clone, Default)]
pub struct SeriesIntegrityValidator {
    config: IntegrityConfig,
}

impl SeriesIntegrityValidator {
    pub fn new(config: IntegrityConfig) -> Self {
        Self { config }
    }

    pub fn validate(&self, series: &Series, covariates: Option<&CovariateFrame>) -> SeriesIntegrityReport {
        self.validate_raw(series.timestamps(), series.values(), covariates)
    }

    /// Check raw columns before they are turned into a `Series`.
    pub fn validate_raw(
        &self,
        timestamps: &[NaiveDateTime],
        values: &[f64],
        covariates: Option<&CovariateFrame>,
    ) -> SeriesIntegrityReport {
        let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
        let profile = SeriesProfile::compute(&finite, self.config.outlier_factor);
        let step = modal_step(timestamps);

        let checks = vec![
            check_lengths(timestamps, values),
            check_ordering(timestamps),
            check_finite(values),
            self.check_spacing(timestamps, step),
            check_covariates(covariates, values.len()),
            self.check_outliers(profile.as_ref()),
        ];

        let report = SeriesIntegrityReport {
            points: values.len(),
            step,
            profile,
            checks,
        };
        if report.all_passed() {
            info!("Series integrity: {}", report.summary());
        } else {
            for check in report.failed_checks() {
                warn!("Integrity check {} failed: {}", check.name, check.message);
            }
        }
        report
    }

    fn check_spacing(&self, timestamps: &[NaiveDateTime], step: Option<Duration>) -> CheckResult {
        let Some(step) = step else {
            return CheckResult::pass("regular_spacing", "Fewer than two points");
        };

        let gaps: Vec<(NaiveDateTime, Duration)> = timestamps
            .windows(2)
            .filter(|p| p[1] - p[0] > step)
            .map(|p| (p[0], p[1] - p[0]))
            .collect();

        if gaps.len() <= self.config.max_gaps {
            CheckResult::pass(
                "regular_spacing",
                &format!("{} gaps against modal step {}", gaps.len(), step),
            )
        } else {
            let details = gaps
                .iter()
                .take(5)
                .map(|(ts, d)| format!("{} (+{})", ts, d))
                .collect::<Vec<_>>()
                .join(", ");
            CheckResult::fail(
                "regular_spacing",
                &format!("{} gaps against modal step {}", gaps.len(), step),
                Some(details),
            )
        }
    }

    fn check_outliers(&self, profile: Option<&SeriesProfile>) -> CheckResult {
        let Some(profile) = profile else {
            return CheckResult::fail("outliers", "No finite values to profile", None);
        };
        let fraction = profile.outliers as f64 / profile.count as f64;
        let message = format!(
            "{} outliers ({:.1}%) at {}x IQR",
            profile.outliers,
            fraction * 100.0,
            profile.outlier_factor
        );
        if fraction <= self.config.max_outlier_fraction {
            CheckResult::pass("outliers", &message)
        } else {
            CheckResult::fail("outliers", &message, Some(profile.summary()))
        }
    }
}

fn check_lengths(timestamps: &[NaiveDateTime], values: &[f64]) -> CheckResult {
    if timestamps.len() == values.len() {
        CheckResult::pass("lengths", &format!("{} timestamps and values", values.len()))
    } else {
        CheckResult::fail(
            "lengths",
            &format!("{} timestamps but {} values", timestamps.len(), values.len()),
            None,
        )
    }
}

fn check_ordering(timestamps: &[NaiveDateTime]) -> CheckResult {
    let bad: Vec<usize> = timestamps
        .windows(2)
        .enumerate()
        .filter(|(_, p)| p[1] <= p[0])
        .map(|(i, _)| i + 1)
        .collect();

    if bad.is_empty() {
        CheckResult::pass("timestamp_order", "Timestamps strictly increasing")
    } else {
        CheckResult::fail(
            "timestamp_order",
            &format!("{} out-of-order or duplicate timestamps", bad.len()),
            Some(format!("First at indices {:?}", &bad[..bad.len().min(5)])),
        )
    }
}

fn check_finite(values: &[f64]) -> CheckResult {
    let bad: Vec<usize> = values
        .iter()
        .enumerate()
        .filter(|(_, v)| !v.is_finite())
        .map(|(i, _)| i)
        .collect();

    if bad.is_empty() {
        CheckResult::pass("finite_values", "All values finite")
    } else {
        CheckResult::fail(
            "finite_values",
            &format!("{} non-finite values", bad.len()),
            Some(format!("First at indices {:?}", &bad[..bad.len().min(5)])),
        )
    }
}

fn check_covariates(covariates: Option<&CovariateFrame>, len: usize) -> CheckResult {
    let Some(frame) = covariates else {
        return CheckResult::pass("covariate_alignment", "No covariates");
    };
    match frame.check_aligned(len) {
        Ok(()) => CheckResult::pass(
            "covariate_alignment",
            &format!("{} covariate columns aligned", frame.width()),
        ),
        Err(e) => CheckResult::fail("covariate_alignment", &e.to_string(), None),
    }
}

fn modal_step(timestamps: &[NaiveDateTime]) -> Option<Duration> {
    let mut counts: HashMap<i64, usize> = HashMap::new();
    for pair in timestamps.windows(2) {
        let ms = (pair[1] - pair[0]).num_milliseconds();
        if ms > 0 {
            *counts.entry(ms).or_insert(0) += 1;
        }
    }
    counts
        .into_iter()
        .max_by(|(a_ms, a_n), (b_ms, b_n)| a_n.cmp(b_n).then(b_ms.cmp(a_ms)))
        .map(|(ms, _)| Duration::milliseconds(ms))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn day(d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, d)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_clean_series_passes() {
        let values: Vec<f64> = (0..30).map(|i| 20.0 + (i % 5) as f64).collect();
        let series = Series::daily(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(), values).unwrap();
        let frame = CovariateFrame::new().with_column("temp", vec![15.0; 30]).unwrap();

        let report = SeriesIntegrityValidator::default().validate(&series, Some(&frame));
        assert!(report.all_passed(), "{:?}", report.failed_checks());
        assert_eq!(report.step, Some(Duration::days(1)));
        assert_eq!(report.profile.as_ref().unwrap().count, 30);
    }

    #[test]
    fn test_raw_problems_reported() {
        let ts = vec![day(1), day(2), day(2), day(5), day(6)];
        let values = vec![1.0, f64::NAN, 1.0, 1.0, 1.0];
        let report = SeriesIntegrityValidator::default().validate_raw(&ts, &values, None);

        assert!(!report.check("timestamp_order").unwrap().passed);
        assert!(!report.check("finite_values").unwrap().passed);
        assert!(!report.check("regular_spacing").unwrap().passed);
        assert!(report.check("lengths").unwrap().passed);
        assert_eq!(report.failed_checks().len(), 3);
    }

    #[test]
    fn test_gap_tolerance() {
        let ts = vec![day(1), day(2), day(3), day(5), day(6)];
        let values = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let config = IntegrityConfig {
            max_gaps: 1,
            ..IntegrityConfig::default()
        };
        let report = SeriesIntegrityValidator::new(config).validate_raw(&ts, &values, None);
        assert!(report.check("regular_spacing").unwrap().passed);
    }

    #[test]
    fn test_misaligned_covariates_and_outliers() {
        let mut values = vec![10.0; 19];
        values.push(500.0);
        let series = Series::daily(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(), values).unwrap();
        let frame = CovariateFrame::new().with_column("price", vec![0.2; 18]).unwrap();

        let report = SeriesIntegrityValidator::default().validate(&series, Some(&frame));
        let alignment = report.check("covariate_alignment").unwrap();
        assert!(!alignment.passed);
        assert!(alignment.message.contains("price"));
        assert!(report.check("outliers").unwrap().passed);

        let strict = IntegrityConfig {
            max_outlier_fraction: 0.01,
            ..IntegrityConfig::default()
        };
        let report = SeriesIntegrityValidator::new(strict).validate(&series, None);
        assert!(!report.check("outliers").unwrap().passed);
    }
}
