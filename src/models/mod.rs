//! Efficiency model implementation.
//!
//! The model family is fixed, so it is implemented as small, pure functions
//! that the objective, the seeding code and the curve evaluator share.

pub mod model;

pub use model::*;
