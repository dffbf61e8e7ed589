//! Optimization loop.
//!
//! Each pass shuffles the training windows with a seeded RNG, steps the
//! optimizer once per mini-batch, then scores the monitored windows. The
//! lowest monitored loss seen so far is kept as the checkpoint and returned
//! at the end, so the result is never worse than any earlier pass.
//!
//! Per-window gradients run in parallel; the batch sum is taken in window
//! order so parallel and serial runs produce the same bits.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::cancel::CancellationToken;
use super::early_stopping::{EarlyStopping, EarlyStoppingState};
use super::optimizer::{clip_global_norm, Adam};
use crate::error::{EngineResult, ForecastError, LossPhase};
use crate::model::{ForecastModel, ForecastModelState, IntervalMethod, ModelVariant};
use crate::scaling::ScalerState;
use crate::windows::Window;

/// Training hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub batch_size: usize,
    pub max_passes: usize,
    /// Passes without sufficient improvement before stopping.
    pub early_stop_patience: usize,
    /// Improvement smaller than this counts as no improvement.
    pub early_stop_min_delta: f64,
    pub random_seed: u64,
    pub learning_rate: f64,
    /// Global L2 norm cap on each batch gradient.
    pub gradient_clip: Option<f64>,
    /// Nominal coverage of calibrated intervals.
    pub interval_level: f64,
    pub interval_method: IntervalMethod,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            batch_size: 32,
            max_passes: 50,
            early_stop_patience: 5,
            early_stop_min_delta: 1e-4,
            random_seed: 42,
            learning_rate: 0.01,
            gradient_clip: Some(1.0),
            interval_level: 0.9,
            interval_method: IntervalMethod::Conformal,
        }
    }
}

impl TrainingConfig {
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_max_passes(mut self, max_passes: usize) -> Self {
        self.max_passes = max_passes;
        self
    }

    pub fn with_early_stopping(mut self, patience: usize, min_delta: f64) -> Self {
        self.early_stop_patience = patience;
        self.early_stop_min_delta = min_delta;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.random_seed = seed;
        self
    }

    pub fn with_learning_rate(mut self, learning_rate: f64) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    pub fn with_gradient_clip(mut self, clip: Option<f64>) -> Self {
        self.gradient_clip = clip;
        self
    }

    pub fn with_intervals(mut self, level: f64, method: IntervalMethod) -> Self {
        self.interval_level = level;
        self.interval_method = method;
        self
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.batch_size == 0 {
            return Err(ForecastError::InvalidConfig("batch_size must be positive".to_string()));
        }
        if self.early_stop_patience == 0 {
            return Err(ForecastError::InvalidConfig(
                "early_stop_patience must be positive".to_string(),
            ));
        }
        if !(self.early_stop_min_delta >= 0.0) {
            return Err(ForecastError::InvalidConfig(format!(
                "early_stop_min_delta must be non-negative, got {}",
                self.early_stop_min_delta
            )));
        }
        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return Err(ForecastError::InvalidConfig(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if let Some(clip) = self.gradient_clip {
            if !(clip > 0.0) {
                return Err(ForecastError::InvalidConfig(format!(
                    "gradient_clip must be positive, got {}",
                    clip
                )));
            }
        }
        if !(self.interval_level > 0.0 && self.interval_level < 1.0) {
            return Err(ForecastError::InvalidConfig(format!(
                "interval_level must be in (0, 1), got {}",
                self.interval_level
            )));
        }
        Ok(())
    }
}

/// Why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    MaxPasses,
    EarlyStopped,
    Cancelled,
    NoTrainableParameters,
    NonFiniteLoss,
}

/// Losses for one pass. Pass 0 is the untrained model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PassRecord {
    pub pass: usize,
    /// Mean training loss over the pass; `None` for pass 0.
    pub train_loss: Option<f64>,
    pub validation_loss: f64,
}

/// Record of a finished training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSummary {
    pub seed: u64,
    pub passes: Vec<PassRecord>,
    pub best_pass: usize,
    pub best_validation_loss: f64,
    pub stop_reason: StopReason,
    pub parameter_count: usize,
    pub train_windows: usize,
    pub validation_windows: usize,
}

impl TrainingSummary {
    /// Number of optimization passes actually run.
    pub fn passes_run(&self) -> usize {
        self.passes.iter().filter(|p| p.pass > 0).count()
    }
}

struct Checkpoint {
    params: Vec<f64>,
    pass: usize,
    loss: f64,
}

/// Drives a model through the optimization loop.
#[derive(Debug, Clone, Default)]
pub struct Trainer {
    config: TrainingConfig,
}

impl Trainer {
    pub fn new(config: TrainingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Train `model` on scaled windows and return the best checkpoint.
    pub fn train(
        &self,
        model: ModelVariant,
        train: &[Window],
        validation: &[Window],
        scaler: &ScalerState,
    ) -> EngineResult<ForecastModelState> {
        self.train_with_cancel(model, train, validation, scaler, &CancellationToken::new())
    }

    /// Like `train`, returning the best checkpoint so far once `cancel` fires.
    pub fn train_with_cancel(
        &self,
        mut model: ModelVariant,
        train: &[Window],
        validation: &[Window],
        scaler: &ScalerState,
        cancel: &CancellationToken,
    ) -> EngineResult<ForecastModelState> {
        self.config.validate()?;
        if train.is_empty() {
            return Err(ForecastError::InsufficientData {
                segment: "train windows".to_string(),
                required: 1,
                available: 0,
            });
        }
        // A warm-started model may carry intervals from an earlier scaler.
        model.as_model_mut().clear_calibration();
        let monitor = if validation.is_empty() {
            warn!("No validation windows; monitoring training loss for checkpoints");
            train
        } else {
            validation
        };

        let parameter_count = model.as_model().parameter_count();
        info!(
            "Training {} ({} parameters) on {} windows, validating on {}",
            model.as_model().name(),
            parameter_count,
            train.len(),
            validation.len()
        );

        let initial = mean_loss(model.as_model(), monitor)?;
        if !initial.is_finite() {
            warn!("Initial validation loss is not finite");
            return Err(ForecastError::NonFiniteLoss {
                phase: LossPhase::Initial,
                pass: 0,
                batch: None,
                checkpoint: None,
            });
        }

        let mut passes = vec![PassRecord {
            pass: 0,
            train_loss: None,
            validation_loss: initial,
        }];
        let mut best = Checkpoint {
            params: model.as_model().parameters(),
            pass: 0,
            loss: initial,
        };

        let stop_reason = if parameter_count == 0 {
            StopReason::NoTrainableParameters
        } else {
            let outcome = self.optimize(&mut model, train, monitor, cancel, &mut passes, &mut best);
            match outcome {
                Ok(reason) => reason,
                Err(err) => {
                    let checkpoint = self.finish(
                        model,
                        &best,
                        passes,
                        StopReason::NonFiniteLoss,
                        scaler,
                        train.len(),
                        validation,
                    )?;
                    return Err(attach_checkpoint(err, checkpoint));
                }
            }
        };

        info!(
            "Training stopped ({:?}) after {} passes; best pass {} with loss {:.6}",
            stop_reason,
            passes.len() - 1,
            best.pass,
            best.loss
        );

        self.finish(model, &best, passes, stop_reason, scaler, train.len(), validation)
    }

    fn optimize(
        &self,
        model: &mut ModelVariant,
        train: &[Window],
        monitor: &[Window],
        cancel: &CancellationToken,
        passes: &mut Vec<PassRecord>,
        best: &mut Checkpoint,
    ) -> EngineResult<StopReason> {
        let config = &self.config;
        let mut rng = StdRng::seed_from_u64(config.random_seed);
        let mut optimizer = Adam::new(best.params.len(), config.learning_rate);
        let mut stopper = EarlyStopping::new(
            config.early_stop_patience,
            config.early_stop_min_delta,
            best.loss,
        );
        let mut order: Vec<usize> = (0..train.len()).collect();

        for pass in 1..=config.max_passes {
            if cancel.is_cancelled() {
                info!("Training cancelled before pass {}", pass);
                return Ok(StopReason::Cancelled);
            }

            order.shuffle(&mut rng);
            let mut loss_sum = 0.0;

            for (batch_idx, batch) in order.chunks(config.batch_size).enumerate() {
                let (batch_loss, mut grad) = batch_gradient(model.as_model(), train, batch)?;
                if !batch_loss.is_finite() || grad.iter().any(|g| !g.is_finite()) {
                    warn!("Non-finite training loss at pass {}, batch {}", pass, batch_idx);
                    return Err(ForecastError::NonFiniteLoss {
                        phase: LossPhase::Training,
                        pass,
                        batch: Some(batch_idx),
                        checkpoint: None,
                    });
                }
                loss_sum += batch_loss * batch.len() as f64;

                if let Some(max_norm) = config.gradient_clip {
                    clip_global_norm(&mut grad, max_norm);
                }
                let mut params = model.as_model().parameters();
                optimizer.step(&mut params, &grad);
                model.as_model_mut().set_parameters(&params)?;
            }

            let train_loss = loss_sum / train.len() as f64;
            let validation_loss = mean_loss(model.as_model(), monitor)?;
            if !validation_loss.is_finite() {
                warn!("Non-finite validation loss at pass {}", pass);
                return Err(ForecastError::NonFiniteLoss {
                    phase: LossPhase::Validation,
                    pass,
                    batch: None,
                    checkpoint: None,
                });
            }

            debug!(
                "Pass {}: train loss {:.6}, validation loss {:.6}",
                pass, train_loss, validation_loss
            );
            passes.push(PassRecord {
                pass,
                train_loss: Some(train_loss),
                validation_loss,
            });

            if validation_loss < best.loss {
                *best = Checkpoint {
                    params: model.as_model().parameters(),
                    pass,
                    loss: validation_loss,
                };
            }

            if stopper.observe(validation_loss) == EarlyStoppingState::Stopped {
                info!(
                    "Early stopping at pass {} ({} passes without improvement > {})",
                    pass, config.early_stop_patience, config.early_stop_min_delta
                );
                return Ok(StopReason::EarlyStopped);
            }
        }

        Ok(StopReason::MaxPasses)
    }

    #[allow(clippy::too_many_arguments)]
    fn finish(
        &self,
        mut model: ModelVariant,
        best: &Checkpoint,
        passes: Vec<PassRecord>,
        stop_reason: StopReason,
        scaler: &ScalerState,
        train_windows: usize,
        validation: &[Window],
    ) -> EngineResult<ForecastModelState> {
        model.as_model_mut().set_parameters(&best.params)?;

        if model.as_model().supports_uncertainty() {
            if validation.is_empty() {
                warn!("No validation windows; intervals will not be calibrated");
            } else {
                model.as_model_mut().calibrate(
                    validation,
                    self.config.interval_level,
                    self.config.interval_method,
                )?;
            }
        }

        let context_length = model.as_model().context_length();
        let horizon = model.as_model().horizon();
        let parameter_count = model.as_model().parameter_count();

        Ok(ForecastModelState {
            model,
            context_length,
            horizon,
            config: self.config.clone(),
            summary: TrainingSummary {
                seed: self.config.random_seed,
                passes,
                best_pass: best.pass,
                best_validation_loss: best.loss,
                stop_reason,
                parameter_count,
                train_windows,
                validation_windows: validation.len(),
            },
            scaler_fingerprint: scaler.fingerprint,
        })
    }
}

/// Mean per-window loss, scored in parallel and summed in window order.
pub fn mean_loss(model: &dyn ForecastModel, windows: &[Window]) -> EngineResult<f64> {
    let losses = windows
        .par_iter()
        .map(|w| model.loss(w))
        .collect::<EngineResult<Vec<f64>>>()?;
    Ok(losses.iter().sum::<f64>() / losses.len().max(1) as f64)
}

fn batch_gradient(
    model: &dyn ForecastModel,
    windows: &[Window],
    batch: &[usize],
) -> EngineResult<(f64, Vec<f64>)> {
    let results = batch
        .par_iter()
        .map(|&i| model.loss_and_gradient(&windows[i]))
        .collect::<EngineResult<Vec<(f64, Vec<f64>)>>>()?;

    let mut loss = 0.0;
    let mut grad = vec![0.0; model.parameter_count()];
    for (l, g) in &results {
        loss += l;
        for (acc, v) in grad.iter_mut().zip(g) {
            *acc += v;
        }
    }

    let n = batch.len() as f64;
    grad.iter_mut().for_each(|g| *g /= n);
    Ok((loss / n, grad))
}

fn attach_checkpoint(err: ForecastError, state: ForecastModelState) -> ForecastError {
    match err {
        ForecastError::NonFiniteLoss {
            phase, pass, batch, ..
        } => ForecastError::NonFiniteLoss {
            phase,
            pass,
            batch,
            checkpoint: Some(Box::new(state)),
        },
        other => other,
    }
}
