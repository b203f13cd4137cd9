//! Global fit.
//!
//! Responsibilities:
//!
//! - assemble validated per-source datasets
//! - build the joint chi-square and its Jacobian
//! - seed and run Levenberg–Marquardt
//! - derive the parameter covariance at the optimum

pub mod dataset;
pub mod fitter;
pub mod minimizer;
pub mod objective;
pub mod seed;

pub use dataset::*;
pub use fitter::*;
pub use minimizer::*;
pub use objective::*;
pub use seed::*;
