//! Input validation for cost/usage series.
//!
//! - Integrity checks (ordering, finiteness, spacing, covariate alignment)
//! - Descriptive profile with IQR outlier counts

pub mod profile;
pub mod series_integrity;

pub use profile::{quantile, Quantiles, SeriesProfile};
pub use series_integrity::{
    CheckResult, IntegrityConfig, SeriesIntegrityReport, SeriesIntegrityValidator,
};
