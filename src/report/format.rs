//! Formatted terminal output.
//!
//! Formatting lives in one place so the fitting code stays free of
//! presentation concerns and output changes stay localized.

use nalgebra::DMatrix;

use crate::curve::EfficiencyCurve;
use crate::domain::{FitResult, NormalizationMode};
use crate::error::FitError;
use crate::io::{FileReport, IngestedData};
use crate::report::table_energies;

/// Fit summary: quality, parameters with errors and per-source diagnostics.
pub fn format_fit_summary(fit: &FitResult) -> String {
    let mut out = String::new();
    let layout = fit.layout();
    let diag = fit.diagnostics();

    out.push_str("=== geff - global efficiency fit ===\n");
    out.push_str(&format!(
        "Sources: {} | shape coefficients: {} | E0 = {} keV\n",
        layout.n_sources,
        layout.n_shape,
        fit.e0()
    ));
    out.push_str(&format!("Normalization: {}\n", normalization_label(fit.normalization())));
    out.push_str(&format!(
        "Chi2 = {:.6} | NDf = {} | Chi2/NDf = {}\n",
        fit.chi_square(),
        fit.ndf(),
        fit.reduced_chi_square()
            .map(|v| format!("{v:.4}"))
            .unwrap_or_else(|| "n/a".to_string())
    ));
    out.push_str(&format!(
        "Initial chi2 = {:.6} | iterations = {} | stopped on {:?} (gradient {:.2e})\n",
        diag.initial_chi_square, diag.iterations, diag.termination, diag.final_gradient
    ));

    out.push_str("\nParameters:\n");
    let errors = fit.errors();
    for (i, (name, value)) in fit.param_names().iter().zip(fit.params()).enumerate() {
        let err = if fit.is_fixed(i) {
            "(fixed)".to_string()
        } else {
            format!("+/- {:.6e}", errors[i])
        };
        out.push_str(&format!("  {name:<6} = {value:>14.6e}  {err}\n"));
    }

    out.push_str("\nSources:\n");
    out.push_str(&format!(
        "  {:<8} {:>6} {:>8} {:>6} {:>6} {:>12}\n",
        "source", "eff", "dropped", "norm", "free", "chi2"
    ));
    for s in &diag.sources {
        out.push_str(&format!(
            "  #{:<7} {:>6} {:>8} {:>6} {:>6} {:>12.4}\n",
            s.index, s.n_efficiency, s.n_dropped, s.n_normalization, s.free_params, s.chi_square
        ));
    }

    out
}

/// Input files per source, with used/read row counts and skipped rows.
pub fn format_ingest_summary(ingest: &IngestedData) -> String {
    let mut out = String::from("Input files:\n");
    for (s, eff) in ingest.efficiency_files.iter().enumerate() {
        out.push_str(&format!("  #{s:<3} eff  {}\n", file_line(eff)));
        match ingest.normalization_files.get(s).and_then(Option::as_ref) {
            Some(norm) => out.push_str(&format!("       norm {}\n", file_line(norm))),
            None => out.push_str("       norm (none)\n"),
        }
    }
    out
}

fn file_line(report: &FileReport) -> String {
    let mut line = format!(
        "{} ({} of {} rows used)",
        report.path.display(),
        report.rows_used,
        report.rows_read
    );
    if let Some(first) = report.row_errors.first() {
        line.push_str(&format!(
            ", {} skipped, first at line {}: {}",
            report.row_errors.len(),
            first.line,
            first.message
        ));
    }
    line
}

/// Covariance matrix, labelled by parameter name.
pub fn format_covariance(fit: &FitResult) -> String {
    format_matrix("Covariance matrix:", &fit.param_names(), fit.covariance(), |v| format!("{v:>12.4e}"))
}

/// Correlation matrix, labelled by parameter name.
pub fn format_correlation(fit: &FitResult) -> String {
    format_matrix("Correlation matrix:", &fit.param_names(), &fit.correlation(), |v| format!("{v:>12.4}"))
}

/// Efficiency and 1σ error at the table energies within `[start, end)`.
pub fn format_efficiency_table(curve: &EfficiencyCurve, start: f64, end: f64) -> Result<String, FitError> {
    let mut out = String::new();
    out.push_str(&format!("{:>8} {:>14} {:>14}\n", "E (keV)", "eff", "error"));
    for e in table_energies(start, end)? {
        let p = curve.eval(e);
        out.push_str(&format!("{:>8} {:>14.6e} {:>14.6e}\n", e, p.central, p.sigma()));
    }
    Ok(out)
}

fn format_matrix(title: &str, names: &[String], m: &DMatrix<f64>, cell: impl Fn(f64) -> String) -> String {
    let mut out = String::new();
    out.push_str(title);
    out.push('\n');

    out.push_str(&format!("{:<6}", ""));
    for name in names {
        out.push_str(&format!(" {name:>12}"));
    }
    out.push('\n');

    for (i, name) in names.iter().enumerate() {
        out.push_str(&format!("{name:<6}"));
        for j in 0..names.len() {
            out.push(' ');
            out.push_str(&cell(m[(i, j)]));
        }
        out.push('\n');
    }
    out
}

fn normalization_label(mode: NormalizationMode) -> &'static str {
    match mode {
        NormalizationMode::Measured => "measured",
        NormalizationMode::Substituted => "none supplied; source #0 fixed to n = 1",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EfficiencyPoint, FitConfig, MeasurementSet, Source};
    use crate::fit::fit_global;
    use crate::io::RowError;

    fn substituted_fit() -> FitResult {
        let set = MeasurementSet::new(vec![
            Source::new(vec![
                EfficiencyPoint::new(100.0, 1.0, 50.0, 2.0),
                EfficiencyPoint::new(200.0, 1.0, 40.0, 2.0),
                EfficiencyPoint::new(400.0, 1.0, 30.0, 2.0),
            ]),
            Source::new(vec![
                EfficiencyPoint::new(150.0, 1.0, 22.0, 1.0),
                EfficiencyPoint::new(300.0, 1.0, 17.0, 1.0),
            ]),
        ]);
        fit_global(set, &FitConfig::with_shape_order(2)).unwrap()
    }

    #[test]
    fn summary_marks_fixed_anchor() {
        let fit = substituted_fit();
        let text = format_fit_summary(&fit);
        assert!(text.contains("source #0 fixed to n = 1"));
        assert!(text.contains("n_0"));
        assert!(text.contains("(fixed)"));
        assert!(text.contains("NDf = 2"));
        assert!(text.contains(&format!("stopped on {:?}", fit.diagnostics().termination)));
    }

    #[test]
    fn matrices_are_square_and_labelled() {
        let fit = substituted_fit();
        let cov = format_covariance(&fit);
        // title + header + one row per parameter
        assert_eq!(cov.lines().count(), 2 + 4);
        let corr = format_correlation(&fit);
        assert!(corr.lines().nth(2).is_some_and(|l| l.starts_with('a') && l.contains("1.0000")));
    }

    #[test]
    fn ingest_summary_lists_files_and_skipped_rows() {
        let ingest = IngestedData {
            set: MeasurementSet::new(Vec::new()),
            efficiency_files: vec![
                FileReport {
                    path: "eu152.dat".into(),
                    rows_read: 12,
                    rows_used: 11,
                    row_errors: vec![RowError {
                        line: 7,
                        message: "expected 4 columns, got 3".into(),
                    }],
                },
                FileReport {
                    path: "co60.dat".into(),
                    rows_read: 2,
                    rows_used: 2,
                    row_errors: Vec::new(),
                },
            ],
            normalization_files: vec![
                Some(FileReport {
                    path: "eu152.norm".into(),
                    rows_read: 1,
                    rows_used: 1,
                    row_errors: Vec::new(),
                }),
                None,
            ],
        };
        let text = format_ingest_summary(&ingest);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 5);
        assert!(lines[1].contains("eu152.dat (11 of 12 rows used), 1 skipped, first at line 7"));
        assert!(lines[2].contains("eu152.norm (1 of 1 rows used)"));
        assert!(lines[4].ends_with("norm (none)"));
    }

    #[test]
    fn efficiency_table_lists_table_energies() {
        let fit = substituted_fit();
        let curve = EfficiencyCurve::from_fit(&fit).unwrap();
        let table = format_efficiency_table(&curve, 1.0, 1200.0).unwrap();
        // header + 100..700 + 1000
        assert_eq!(table.lines().count(), 1 + 8);
    }
}
