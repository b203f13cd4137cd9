//! Result exports.
//!
//! - `fitresult.txt`: fit summary plus covariance and correlation matrices
//! - curve CSV: one row per grid energy with the central value and band

use std::fs;
use std::path::Path;

use crate::domain::{CurvePoint, FitResult};
use crate::error::AppError;
use crate::report::{format_correlation, format_covariance, format_fit_summary};

/// Write the text fit report.
pub fn write_fit_result(path: &Path, fit: &FitResult) -> Result<(), AppError> {
    let text = format!(
        "{}\n{}\n{}",
        format_fit_summary(fit),
        format_covariance(fit),
        format_correlation(fit)
    );
    fs::write(path, text)
        .map_err(|e| AppError::new(2, format!("Failed to write fit result '{}': {e}", path.display())))
}

/// Write curve points as CSV (`energy,central,lower,upper`).
pub fn write_curve_csv(path: &Path, points: impl IntoIterator<Item = CurvePoint>) -> Result<(), AppError> {
    let mut writer = csv::Writer::from_path(path)
        .map_err(|e| AppError::new(2, format!("Failed to create curve CSV '{}': {e}", path.display())))?;
    for p in points {
        writer
            .serialize(p)
            .map_err(|e| AppError::new(2, format!("Failed to write curve CSV row: {e}")))?;
    }
    writer
        .flush()
        .map_err(|e| AppError::new(2, format!("Failed to write curve CSV: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn curve_csv_has_header_and_rows() {
        let path = std::env::temp_dir().join(format!("geff-export-{}.csv", std::process::id()));
        let points = (1..=3).map(|i| {
            let e = 100.0 * i as f64;
            CurvePoint {
                energy: e,
                central: 1.0 / e,
                lower: 0.9 / e,
                upper: 1.1 / e,
            }
        });
        write_curve_csv(&path, points).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("energy,central,lower,upper"));
        assert_eq!(lines.count(), 3);
    }
}
