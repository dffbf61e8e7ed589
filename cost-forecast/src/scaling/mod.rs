//! Normalization fit on the train segment only.

pub mod scaler;

pub use scaler::{ChannelStats, Scaler, ScalerState, ScalingMethod};
