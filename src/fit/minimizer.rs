//! Levenberg–Marquardt nonlinear least squares.
//!
//! Solves `min_p ‖r(p)‖²` for a residual vector `r` with analytic Jacobian
//! `J = ∂r/∂p`. Each iteration solves the damped normal equations
//!
//! ```text
//! (JᵀJ + λ·diag(JᵀJ)) δ = −Jᵀr
//! ```
//!
//! and accepts `p + δ` only if it stays inside the problem's feasible region
//! and lowers `‖r‖²`. λ shrinks after an accepted step and grows after a
//! rejected one.
//!
//! Termination (first one hit wins):
//! - both actual and predicted relative chi-square decrease below `ftol`
//! - step length below `xtol · (‖p‖ + xtol)`
//! - scaled gradient `max_j |(Jᵀr)_j| / (‖J_j‖ ‖r‖)` below `gtol`
//! - chi-square numerically zero
//!
//! Running out of iterations, or saturating λ away from a stationary point,
//! is a [`FitError::Convergence`].

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::error::FitError;

/// Chi-square treated as an exact fit.
const ZERO_CHI_SQUARE: f64 = 1e-20;

/// Scaled gradient accepted as stationary when λ saturates.
const STALL_GRADIENT_TOL: f64 = 1e-6;

/// A least squares problem over a flat parameter vector.
pub trait LeastSquaresProblem {
    fn n_params(&self) -> usize;

    fn n_residuals(&self) -> usize;

    /// Weighted residuals; `‖r‖²` is the chi-square.
    fn residuals(&self, params: &DVector<f64>) -> DVector<f64>;

    /// `∂r_i/∂p_j`, shape `n_residuals × n_params`.
    fn jacobian(&self, params: &DVector<f64>) -> DMatrix<f64>;

    /// Whether `params` lies in the domain of the model. Trial steps outside
    /// it are rejected like steps that raise `‖r‖²`.
    fn is_feasible(&self, _params: &DVector<f64>) -> bool {
        true
    }
}

/// Solver tuning.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LmConfig {
    pub max_iterations: usize,
    /// Relative chi-square decrease tolerance.
    pub ftol: f64,
    /// Relative step length tolerance.
    pub xtol: f64,
    /// Scaled gradient tolerance.
    pub gtol: f64,
    pub initial_lambda: f64,
    pub lambda_up: f64,
    pub lambda_down: f64,
    pub min_lambda: f64,
    pub max_lambda: f64,
}

impl Default for LmConfig {
    fn default() -> Self {
        Self {
            max_iterations: 500,
            ftol: 1e-10,
            xtol: 1e-10,
            gtol: 1e-10,
            initial_lambda: 1e-3,
            lambda_up: 10.0,
            lambda_down: 0.1,
            min_lambda: 1e-12,
            max_lambda: 1e12,
        }
    }
}

impl LmConfig {
    pub fn validate(&self) -> Result<(), FitError> {
        if self.max_iterations == 0 {
            return Err(FitError::config("max_iterations must be at least 1"));
        }
        for (name, v) in [("ftol", self.ftol), ("xtol", self.xtol), ("gtol", self.gtol)] {
            if !(v.is_finite() && v >= 0.0) {
                return Err(FitError::config(format!("{name} must be finite and >= 0, got {v}")));
            }
        }
        if !(self.lambda_up > 1.0 && self.lambda_down > 0.0 && self.lambda_down < 1.0) {
            return Err(FitError::config(format!(
                "lambda factors must satisfy up > 1 and 0 < down < 1, got up = {}, down = {}",
                self.lambda_up, self.lambda_down
            )));
        }
        if !(self.min_lambda > 0.0
            && self.initial_lambda >= self.min_lambda
            && self.max_lambda > self.initial_lambda)
        {
            return Err(FitError::config(format!(
                "lambda bounds must satisfy 0 < min <= initial < max, got {} / {} / {}",
                self.min_lambda, self.initial_lambda, self.max_lambda
            )));
        }
        Ok(())
    }
}

/// Why the solver stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Termination {
    ChiSquare,
    Step,
    Gradient,
    ZeroResidual,
    /// λ saturated at a point that is stationary within `STALL_GRADIENT_TOL`.
    Stalled,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LmOutcome {
    pub params: DVector<f64>,
    pub chi_square: f64,
    pub iterations: usize,
    /// Scaled gradient at the last Jacobian evaluation.
    pub gradient: f64,
    pub termination: Termination,
}

#[derive(Debug, Clone)]
pub struct LevenbergMarquardt {
    config: LmConfig,
}

impl LevenbergMarquardt {
    pub fn new(config: LmConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LmConfig {
        &self.config
    }

    pub fn minimize<P: LeastSquaresProblem>(
        &self,
        problem: &P,
        start: DVector<f64>,
    ) -> Result<LmOutcome, FitError> {
        let cfg = &self.config;
        let mut x = start;
        let mut r = problem.residuals(&x);
        let mut ss = r.norm_squared();
        let mut lambda = cfg.initial_lambda;

        if !ss.is_finite() {
            return Err(FitError::Convergence {
                iterations: 0,
                chi_square: ss,
                reason: "non-finite chi-square at the starting point".into(),
            });
        }
        if !problem.is_feasible(&x) {
            return Err(FitError::Convergence {
                iterations: 0,
                chi_square: ss,
                reason: "starting point outside the feasible region".into(),
            });
        }

        let done = |x: DVector<f64>,
                    ss: f64,
                    iterations: usize,
                    gradient: f64,
                    termination: Termination|
         -> Result<LmOutcome, FitError> {
            debug!(iterations, chi2 = ss, ?termination, "minimizer converged");
            Ok(LmOutcome {
                params: x,
                chi_square: ss,
                iterations,
                gradient,
                termination,
            })
        };

        for iter in 1..=cfg.max_iterations {
            if ss <= ZERO_CHI_SQUARE {
                return done(x, ss, iter - 1, 0.0, Termination::ZeroResidual);
            }

            let jac = problem.jacobian(&x);
            let jtj = jac.tr_mul(&jac);
            let g = jac.tr_mul(&r);
            let gnorm = scaled_gradient(&jac, &g, ss);
            if gnorm <= cfg.gtol {
                return done(x, ss, iter - 1, gnorm, Termination::Gradient);
            }

            let diag_floor = jtj.diagonal().max() * f64::EPSILON;
            loop {
                let mut a = jtj.clone();
                for i in 0..a.nrows() {
                    a[(i, i)] += lambda * jtj[(i, i)].max(diag_floor);
                }

                let candidate = a
                    .cholesky()
                    .map(|c| c.solve(&(-&g)))
                    .filter(|s| s.iter().all(|v| v.is_finite()))
                    .map(|s| {
                        let trial = &x + &s;
                        (s, trial)
                    })
                    .filter(|(_, trial)| problem.is_feasible(trial));
                if let Some((step, trial)) = candidate {
                    let r_trial = problem.residuals(&trial);
                    let ss_trial = r_trial.norm_squared();

                    if ss_trial.is_finite() && ss_trial < ss {
                        let actual = (ss - ss_trial) / ss;
                        let linear = (&r + &jac * &step).norm_squared();
                        let predicted = ((ss - linear) / ss).abs();
                        let step_small = step.norm() <= cfg.xtol * (x.norm() + cfg.xtol);

                        x = trial;
                        r = r_trial;
                        ss = ss_trial;
                        lambda = (lambda * cfg.lambda_down).max(cfg.min_lambda);
                        debug!(iteration = iter, chi2 = ss, lambda, "step accepted");

                        if actual <= cfg.ftol && predicted <= cfg.ftol {
                            return done(x, ss, iter, gnorm, Termination::ChiSquare);
                        }
                        if step_small {
                            return done(x, ss, iter, gnorm, Termination::Step);
                        }
                        break;
                    }
                    trace!(iteration = iter, chi2 = ss_trial, lambda, "step rejected");
                } else {
                    trace!(iteration = iter, lambda, "no feasible step");
                }

                lambda *= cfg.lambda_up;
                if lambda > cfg.max_lambda {
                    if gnorm <= STALL_GRADIENT_TOL {
                        return done(x, ss, iter, gnorm, Termination::Stalled);
                    }
                    return Err(FitError::Convergence {
                        iterations: iter,
                        chi_square: ss,
                        reason: format!("damping saturated with scaled gradient {gnorm:.3e}"),
                    });
                }
            }
        }

        Err(FitError::Convergence {
            iterations: cfg.max_iterations,
            chi_square: ss,
            reason: "iteration limit reached".into(),
        })
    }
}

/// MINPACK-style gradient measure: cosine between each Jacobian column and `r`.
fn scaled_gradient(jac: &DMatrix<f64>, g: &DVector<f64>, ss: f64) -> f64 {
    let rnorm = ss.sqrt();
    if rnorm == 0.0 {
        return 0.0;
    }
    jac.column_iter()
        .zip(g.iter())
        .map(|(col, &gj)| {
            let cn = col.norm();
            if cn > 0.0 { (gj / (cn * rnorm)).abs() } else { 0.0 }
        })
        .fold(0.0, f64::max)
}
