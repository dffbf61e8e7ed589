//! Early stopping state machine.
//!
//! Transitions on each observed validation loss:
//! - improvement greater than `min_delta` -> `Improving`, counter reset
//! - otherwise -> `Plateauing` with one more stale pass
//! - `patience` stale passes in a row -> `Stopped` (terminal)

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EarlyStoppingState {
    Improving,
    Plateauing { stale_passes: usize },
    Stopped,
}

#[derive(Debug, Clone)]
pub struct EarlyStopping {
    patience: usize,
    min_delta: f64,
    reference: f64,
    state: EarlyStoppingState,
}

impl EarlyStopping {
    /// Start from the loss of the untrained model.
    pub fn new(patience: usize, min_delta: f64, initial_loss: f64) -> Self {
        Self {
            patience,
            min_delta,
            reference: initial_loss,
            state: EarlyStoppingState::Improving,
        }
    }

    pub fn state(&self) -> EarlyStoppingState {
        self.state
    }

    /// Loss that the next pass must beat by more than `min_delta`.
    pub fn reference(&self) -> f64 {
        self.reference
    }

    pub fn observe(&mut self, loss: f64) -> EarlyStoppingState {
        if self.state == EarlyStoppingState::Stopped {
            return self.state;
        }

        self.state = if loss < self.reference - self.min_delta {
            self.reference = loss;
            EarlyStoppingState::Improving
        } else {
            let stale_passes = match self.state {
                EarlyStoppingState::Plateauing { stale_passes } => stale_passes + 1,
                _ => 1,
            };
            if stale_passes >= self.patience {
                EarlyStoppingState::Stopped
            } else {
                EarlyStoppingState::Plateauing { stale_passes }
            }
        };
        self.state
    }
}
