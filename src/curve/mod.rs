//! Fitted curve evaluation and its uncertainty band.

pub mod evaluator;
pub mod propagate;

pub use evaluator::*;
pub use propagate::*;
