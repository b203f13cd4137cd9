//! Read/write curve JSON files.
//!
//! Curve JSON is the portable representation of a fitted calibration:
//! - shape coefficients, scale factors, errors and the full covariance
//! - fit quality (chi-square, ndf) and how the absolute scale was fixed
//! - a precomputed grid of the curve and its band for quick plotting
//!
//! The schema is defined by `domain::CurveFile`.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use chrono::Utc;

use crate::curve::EfficiencyCurve;
use crate::domain::{CurveFile, CurveGrid, FitResult};
use crate::error::AppError;

/// Assemble the curve file contents.
pub fn build_curve_file(fit: &FitResult, curve: &EfficiencyCurve, grid: CurveGrid) -> CurveFile {
    let cov = fit.covariance();
    CurveFile {
        tool: "geff".to_string(),
        generated_at: Utc::now(),
        e0: fit.e0(),
        n_shape: fit.layout().n_shape,
        anchor_source: curve.anchor(),
        normalization: fit.normalization(),
        param_names: fit.param_names(),
        params: fit.params().to_vec(),
        errors: fit.errors(),
        covariance: cov.row_iter().map(|row| row.iter().copied().collect()).collect(),
        chi_square: fit.chi_square(),
        ndf: fit.ndf(),
        grid,
    }
}

/// Write a curve JSON file.
pub fn write_curve_json(path: &Path, curve: &CurveFile) -> Result<(), AppError> {
    let file = File::create(path)
        .map_err(|e| AppError::new(2, format!("Failed to create curve JSON '{}': {e}", path.display())))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, curve)
        .map_err(|e| AppError::new(2, format!("Failed to write curve JSON: {e}")))?;
    writer
        .flush()
        .map_err(|e| AppError::new(2, format!("Failed to write curve JSON: {e}")))
}

/// Read a curve JSON file.
pub fn read_curve_json(path: &Path) -> Result<CurveFile, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::new(2, format!("Failed to open curve JSON '{}': {e}", path.display())))?;
    let curve: CurveFile = serde_json::from_reader(BufReader::new(file))
        .map_err(|e| AppError::new(2, format!("Invalid curve JSON: {e}")))?;
    if curve.grid.energy.len() != curve.grid.central.len()
        || curve.grid.lower.len() != curve.grid.central.len()
        || curve.grid.upper.len() != curve.grid.central.len()
    {
        return Err(AppError::new(2, "Invalid curve JSON: grid columns differ in length"));
    }
    Ok(curve)
}
