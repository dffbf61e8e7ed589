//! Forecast accuracy metrics.
//!
//! - MAE, MAPE, RMSE per horizon step and pooled
//! - Interval coverage and mean width

pub mod calculator;

pub use calculator::{ForecastMetrics, IntervalBounds, MetricsCalculator};
