//! Windowing of a split series into supervised examples.

pub mod builder;

pub use builder::{context_ending_at, ContextWindow, Window, WindowBuilder, WindowSet};
