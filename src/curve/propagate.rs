//! Delta-method uncertainty of the fitted shape.
//!
//! With `p_m = ln(E/E₀)^m` the gradient of `shape` with respect to `a_m` is
//! `shape · p_m`, so
//!
//! ```text
//! var(E) = shape(E)² · Σ_{m,n} p_m p_n Cov(a_m, a_n)
//! ```
//!
//! The full `K×K` block is used; off-diagonal terms usually dominate for
//! strongly correlated log-polynomial coefficients.

use nalgebra::{DMatrix, DVector};

use crate::math::log_powers;
use crate::models::shape;

/// Quadratic form `pᵀ C p`, clamped at zero against rounding.
pub fn relative_variance(energy: f64, shape_cov: &DMatrix<f64>, e0: f64) -> f64 {
    let p = DVector::from_vec(log_powers(energy, e0, shape_cov.nrows()));
    (shape_cov * &p).dot(&p).max(0.0)
}

/// Variance of `shape(E)`.
pub fn propagate_variance(energy: f64, coeffs: &[f64], shape_cov: &DMatrix<f64>, e0: f64) -> f64 {
    let y = shape(energy, coeffs, e0);
    y * y * relative_variance(energy, shape_cov, e0)
}

/// 1σ uncertainty of `shape(E)`.
pub fn propagate_sigma(energy: f64, coeffs: &[f64], shape_cov: &DMatrix<f64>, e0: f64) -> f64 {
    propagate_variance(energy, coeffs, shape_cov, e0).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn reference_energy_only_sees_constant_term() {
        let coeffs = [2.0, -0.5, 0.1];
        let cov = DMatrix::from_row_slice(3, 3, &[0.04, 0.01, 0.0, 0.01, 0.09, 0.02, 0.0, 0.02, 0.16]);
        let sigma = propagate_sigma(350.0, &coeffs, &cov, 350.0);
        assert_relative_eq!(sigma, 2.0_f64.exp() * 0.2, max_relative = 1e-12);
    }

    #[test]
    fn off_diagonal_terms_matter() {
        let coeffs = [2.0, -0.5];
        let diag = DMatrix::from_row_slice(2, 2, &[0.01, 0.0, 0.0, 0.01]);
        let anti = DMatrix::from_row_slice(2, 2, &[0.01, -0.0099, -0.0099, 0.01]);
        let e = 350.0 * 1.0_f64.exp();
        assert!(propagate_variance(e, &coeffs, &anti, 350.0) < propagate_variance(e, &coeffs, &diag, 350.0));
    }

    #[test]
    fn slightly_negative_form_clamps_to_zero() {
        let cov = DMatrix::from_row_slice(1, 1, &[-1e-30]);
        assert_eq!(propagate_sigma(500.0, &[1.0], &cov, 350.0), 0.0);
    }
}
