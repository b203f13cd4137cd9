//! Log-polynomial efficiency model.
//!
//! ```text
//! shape(E) = exp( a₀ + Σ_{i=1}^{K-1} a_i · ln(E/E₀)^i )
//! ```
//!
//! A source with scale factor `n_s` observes `shape(E) / n_s` in its own
//! arbitrary units. The fitter relies on three primitives:
//! - `shape` / `predict` for residuals and plots
//! - `fill_design_row` for the coefficient gradient of `ln shape`
//! - `shape_slope` for effective-variance weighting

use crate::math::{fill_log_powers, log_energy, log_poly, log_poly_slope};

/// Unnormalized efficiency at `energy`.
pub fn shape(energy: f64, coeffs: &[f64], e0: f64) -> f64 {
    log_poly(log_energy(energy, e0), coeffs).exp()
}

/// Prediction for a source with scale factor `scale`, in that source's units.
pub fn predict(energy: f64, coeffs: &[f64], scale: f64, e0: f64) -> f64 {
    shape(energy, coeffs, e0) / scale
}

/// Fill `out[i] = ∂ ln shape / ∂ a_i = ln(E/E₀)^i`.
///
/// # Panics
/// Never; `out` may have any length and receives that many powers.
pub fn fill_design_row(energy: f64, e0: f64, out: &mut [f64]) {
    fill_log_powers(log_energy(energy, e0), out);
}

/// `d shape / dE`.
pub fn shape_slope(energy: f64, coeffs: &[f64], e0: f64) -> f64 {
    let l = log_energy(energy, e0);
    log_poly(l, coeffs).exp() * log_poly_slope(l, coeffs) / energy
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEED: [f64; 5] = [2.75, -0.7, -0.04, 0.11, -0.04];

    #[test]
    fn shape_at_reference_energy_is_exp_a0() {
        let y = shape(350.0, &SEED, 350.0);
        assert!((y - 2.75_f64.exp()).abs() < 1e-12);
    }

    #[test]
    fn prediction_divides_by_scale() {
        let y = shape(662.0, &SEED, 350.0);
        let p = predict(662.0, &SEED, 2.0, 350.0);
        assert!((p - y / 2.0).abs() < 1e-12);
    }

    #[test]
    fn single_coefficient_is_flat() {
        let a = [1.5];
        assert!((shape(80.0, &a, 350.0) - shape(3000.0, &a, 350.0)).abs() < 1e-12);
    }

    #[test]
    fn slope_matches_finite_difference() {
        let e = 800.0;
        let h = 1e-3;
        let fd = (shape(e + h, &SEED, 350.0) - shape(e - h, &SEED, 350.0)) / (2.0 * h);
        assert!((shape_slope(e, &SEED, 350.0) - fd).abs() < 1e-8);
    }
}
