//! Log-energy polynomial basis.
//!
//! The efficiency shape is a polynomial in `L = ln(E/E₀)`. Both the model and
//! the error propagation need the powers `L⁰ … L^{K-1}`, so they are computed
//! here in one place.
//!
//! Numerical notes:
//! - Powers are built by repeated multiplication, not `powi`, so a single
//!   call fills the whole row.
//! - `E ≤ 0` has no logarithm; callers validate energies before they get here.

/// `ln(E/E₀)`.
#[inline]
pub fn log_energy(energy: f64, e0: f64) -> f64 {
    (energy / e0).ln()
}

/// Fill `out[i] = L^i` for `i in 0..out.len()`.
pub fn fill_log_powers(l: f64, out: &mut [f64]) {
    let mut p = 1.0;
    for slot in out.iter_mut() {
        *slot = p;
        p *= l;
    }
}

/// Powers `L⁰ … L^{k-1}` at `energy`.
pub fn log_powers(energy: f64, e0: f64, k: usize) -> Vec<f64> {
    let mut out = vec![0.0; k];
    fill_log_powers(log_energy(energy, e0), &mut out);
    out
}

/// Horner evaluation of `Σ a_i L^i`.
pub fn log_poly(l: f64, coeffs: &[f64]) -> f64 {
    coeffs.iter().rev().fold(0.0, |acc, &a| acc * l + a)
}

/// Derivative `d/dL Σ a_i L^i = Σ i a_i L^{i-1}`.
pub fn log_poly_slope(l: f64, coeffs: &[f64]) -> f64 {
    coeffs
        .iter()
        .enumerate()
        .skip(1)
        .rev()
        .fold(0.0, |acc, (i, &a)| acc * l + i as f64 * a)
}
