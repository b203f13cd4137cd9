//! Mathematical utilities: log-energy basis, weighted least squares and
//! symmetric positive-definite inversion.

pub mod basis;
pub mod ols;
pub mod spd;

pub use basis::*;
pub use ols::*;
pub use spd::*;
