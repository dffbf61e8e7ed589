//! Walk-forward evaluation.
//!
//! - Frozen and rolling-refit scoring of held-out windows
//! - Rolling-origin fold generation by observation counts
//! - Multi-fold backtest with per-step aggregation

pub mod backtest;
pub mod evaluator;
pub mod periods;

pub use backtest::{FoldResult, WalkForwardBacktest, WalkForwardResult};
pub use evaluator::{EvaluationMode, EvaluationReport, Evaluator, WindowForecast};
pub use periods::{WalkForwardConfig, WalkForwardFold, WalkForwardPlan};
