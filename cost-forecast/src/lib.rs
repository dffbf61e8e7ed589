pub mod config;
pub mod data;
pub mod error;
pub mod metrics;
pub mod model;
pub mod pipeline;
pub mod scaling;
pub mod service;
pub mod training;
pub mod validation;
pub mod walkforward;
pub mod windows;

// Re-export commonly used types
pub use config::{ForecastConfig, ModelKind};
pub use data::{CovariateFrame, Series, SeriesSplit, SplitBoundaries};
pub use error::{EngineResult, ForecastError};
pub use metrics::{ForecastMetrics, MetricsCalculator};
pub use model::{ForecastModel, ForecastModelState, IntervalForecast, ModelVariant};
pub use pipeline::{FittedForecast, ForecastPipeline};
pub use scaling::{Scaler, ScalerState, ScalingMethod};
pub use service::{ForecastResult, ForecastService};
pub use training::{CancellationToken, Trainer, TrainingConfig};
pub use validation::{SeriesIntegrityReport, SeriesIntegrityValidator, SeriesProfile};
pub use walkforward::{Evaluator, EvaluationReport, WalkForwardBacktest, WalkForwardConfig, WalkForwardResult};
pub use windows::{Window, WindowBuilder, WindowSet};
