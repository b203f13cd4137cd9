//! Weighted linear least squares.
//!
//! Used to seed the shape coefficients: at fixed scale factors the log of the
//! model is linear in the coefficients,
//!
//! ```text
//! ln(n_s · y) = Σ a_i L^i
//! ```
//!
//! so a good starting point is the solution of
//!
//! ```text
//! minimize Σ w_j (ln(n_s y_j) - x_j^T a)^2
//! ```
//!
//! Implementation choices:
//! - Rows are scaled by `sqrt(w_j)` and the problem is solved as ordinary
//!   least squares.
//! - SVD handles tall design matrices and near-collinear power columns
//!   (nalgebra's `QR::solve` only accepts square systems).

use nalgebra::{DMatrix, DVector};

/// Solve a least squares problem using SVD.
///
/// Returns `None` if the system is too ill-conditioned to solve robustly.
pub fn solve_least_squares(x: &DMatrix<f64>, y: &DVector<f64>) -> Option<DVector<f64>> {
    let svd = x.clone().svd(true, true);

    // High-order powers of ln(E/E₀) are strongly collinear; loosen the
    // singular value cutoff progressively before giving up.
    for &tol in &[1e-10, 1e-8, 1e-6] {
        if let Ok(beta) = svd.solve(y, tol) {
            if beta.iter().all(|v| v.is_finite()) {
                return Some(beta);
            }
        }
    }

    None
}

/// Build the row-weighted system `(sqrt(w) X, sqrt(w) y)` and solve it.
pub fn solve_weighted_least_squares(rows: &[Vec<f64>], y: &[f64], w: &[f64]) -> Option<DVector<f64>> {
    let n = rows.len();
    let p = rows.first()?.len();
    if n == 0 || p == 0 || y.len() != n || w.len() != n {
        return None;
    }

    let mut xw = DMatrix::<f64>::zeros(n, p);
    let mut yw = DVector::<f64>::zeros(n);
    for (i, row) in rows.iter().enumerate() {
        let sw = w[i].max(0.0).sqrt();
        for (j, &v) in row.iter().enumerate() {
            xw[(i, j)] = v * sw;
        }
        yw[i] = y[i] * sw;
    }

    solve_least_squares(&xw, &yw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn least_squares_solves_simple_system() {
        // Fit y = 2 + 3x on x = [0,1,2]
        let x = DMatrix::from_row_slice(3, 2, &[1.0, 0.0, 1.0, 1.0, 1.0, 2.0]);
        let y = DVector::from_row_slice(&[2.0, 5.0, 8.0]);

        let beta = solve_least_squares(&x, &y).unwrap();
        assert!((beta[0] - 2.0).abs() < 1e-10);
        assert!((beta[1] - 3.0).abs() < 1e-10);
    }

    #[test]
    fn weights_pull_the_fit_toward_heavy_rows() {
        // Constant model on two inconsistent observations.
        let rows = vec![vec![1.0], vec![1.0]];
        let beta = solve_weighted_least_squares(&rows, &[0.0, 10.0], &[1.0, 9.0]).unwrap();
        assert!((beta[0] - 9.0).abs() < 1e-10);
    }
}
