//! Model training.
//!
//! - Seeded mini-batch Adam with optional gradient clipping
//! - Checkpoint on best validation loss
//! - Early stopping state machine
//! - Cooperative cancellation between passes

pub mod cancel;
pub mod early_stopping;
pub mod optimizer;
pub mod trainer;

pub use cancel::CancellationToken;
pub use early_stopping::{EarlyStopping, EarlyStoppingState};
pub use optimizer::{clip_global_norm, Adam};
pub use trainer::{mean_loss, PassRecord, StopReason, Trainer, TrainingConfig, TrainingSummary};
