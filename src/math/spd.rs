//! Symmetric positive-definite matrix helpers.
//!
//! The covariance of the fit is the inverse of the normal matrix `JᵀJ`. Its
//! columns live on very different scales (shape coefficients vs. scale
//! factors), so definiteness is judged on the diagonally equilibrated matrix
//! `D^{-1/2} M D^{-1/2}` whose diagonal is all ones.

use nalgebra::DMatrix;

/// Smallest accepted eigenvalue of the equilibrated matrix.
pub const SINGULAR_EIGEN_FLOOR: f64 = 1e-12;

/// `(M + Mᵀ) / 2`.
pub fn symmetrize(m: &DMatrix<f64>) -> DMatrix<f64> {
    (m + m.transpose()) * 0.5
}

/// Invert a symmetric positive-definite matrix.
///
/// Returns a message describing the defect when the matrix is not square,
/// not finite, or numerically singular.
pub fn invert_spd(m: &DMatrix<f64>) -> Result<DMatrix<f64>, String> {
    let n = m.nrows();
    if n == 0 || m.ncols() != n {
        return Err(format!("expected a non-empty square matrix, got {}x{}", m.nrows(), m.ncols()));
    }
    if m.iter().any(|v| !v.is_finite()) {
        return Err("matrix contains non-finite entries".to_string());
    }

    let sym = symmetrize(m);
    let mut scale = Vec::with_capacity(n);
    for i in 0..n {
        let d = sym[(i, i)];
        if d <= 0.0 {
            return Err(format!("parameter {i} has no curvature (diagonal {d:.3e})"));
        }
        scale.push(1.0 / d.sqrt());
    }

    let scaled = DMatrix::from_fn(n, n, |i, j| sym[(i, j)] * scale[i] * scale[j]);
    let eig = scaled.clone().symmetric_eigen();
    let min_eig = eig.eigenvalues.iter().copied().fold(f64::INFINITY, f64::min);
    if !(min_eig > SINGULAR_EIGEN_FLOOR) {
        return Err(format!(
            "smallest equilibrated eigenvalue {min_eig:.3e} is below {SINGULAR_EIGEN_FLOOR:.0e}"
        ));
    }

    let chol = scaled
        .cholesky()
        .ok_or_else(|| "Cholesky factorization failed".to_string())?;
    let inv_scaled = chol.inverse();
    let inv = DMatrix::from_fn(n, n, |i, j| inv_scaled[(i, j)] * scale[i] * scale[j]);

    Ok(symmetrize(&inv))
}

/// Eigenvalues of the symmetric part of `m`, ascending.
pub fn sorted_eigenvalues(m: &DMatrix<f64>) -> Vec<f64> {
    let mut vals: Vec<f64> = symmetrize(m).symmetric_eigen().eigenvalues.iter().copied().collect();
    vals.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    vals
}
