//! Error types.
//!
//! - [`FitError`] is what the fitting core returns. Each variant maps to one
//!   failure class of the global fit so callers can react (e.g. retry a
//!   `Convergence` failure with different seeds).
//! - [`AppError`] is the binary-facing error: a message plus a process exit code.

use thiserror::Error;

/// Failures of the global efficiency fit.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FitError {
    /// Not enough data to constrain the requested parameterization.
    #[error("insufficient data: {message}")]
    InsufficientData { message: String },

    /// The minimizer gave up before satisfying its convergence tolerances.
    #[error("fit did not converge after {iterations} iterations (chi2 = {chi_square:.6e}): {reason}")]
    Convergence {
        iterations: usize,
        chi_square: f64,
        reason: String,
    },

    /// The normal matrix at the optimum is not positive-definite.
    #[error("covariance matrix is singular: {message}")]
    SingularCovariance { message: String },

    /// A configuration value is out of its accepted range.
    #[error("invalid configuration: {message}")]
    Configuration { message: String },

    /// An input observation is malformed (non-finite value, negative error).
    #[error("invalid observation in source #{source_index}: {message}")]
    InvalidObservation { source_index: usize, message: String },
}

impl FitError {
    pub fn insufficient(message: impl Into<String>) -> Self {
        Self::InsufficientData {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn singular(message: impl Into<String>) -> Self {
        Self::SingularCovariance {
            message: message.into(),
        }
    }
}

#[derive(Clone)]
pub struct AppError {
    exit_code: u8,
    message: String,
}

impl AppError {
    pub fn new(exit_code: u8, message: impl Into<String>) -> Self {
        Self {
            exit_code,
            message: message.into(),
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.exit_code
    }
}

impl From<FitError> for AppError {
    fn from(err: FitError) -> Self {
        let exit_code = match err {
            FitError::Configuration { .. } | FitError::InvalidObservation { .. } => 2,
            FitError::InsufficientData { .. } => 3,
            FitError::Convergence { .. } | FitError::SingularCovariance { .. } => 4,
        };
        AppError::new(exit_code, err.to_string())
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::fmt::Debug for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppError")
            .field("exit_code", &self.exit_code)
            .field("message", &self.message)
            .finish()
    }
}

impl std::error::Error for AppError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fit_errors_map_to_exit_codes() {
        let e: AppError = FitError::config("bad").into();
        assert_eq!(e.exit_code(), 2);
        let e: AppError = FitError::insufficient("none").into();
        assert_eq!(e.exit_code(), 3);
        let e: AppError = FitError::singular("rank 1").into();
        assert_eq!(e.exit_code(), 4);
        assert!(e.to_string().contains("rank 1"));
    }
}
