//! Inference: answer "given history up to T, forecast T+1..T+H".

pub mod forecast;

pub use forecast::{ForecastPoint, ForecastResult, ForecastService, Interval};
