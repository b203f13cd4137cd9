//! Reporting utilities: rescaled data, pulls and formatted terminal output.

pub mod format;

pub use format::*;

use crate::curve::EfficiencyCurve;
use crate::domain::{FitResult, MeasurementSet};
use crate::error::FitError;

/// One efficiency observation expressed on the curve's absolute scale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaledPoint {
    pub source: usize,
    pub energy: f64,
    pub energy_err: f64,
    /// `y · n_s`
    pub eff: f64,
    pub eff_err: f64,
    pub fit: f64,
    /// `(eff − fit) / eff_err`; zero when the error is zero.
    pub pull: f64,
}

/// Rescale every efficiency observation by its source's fitted scale.
///
/// Points outside the fit range are kept; callers decide what to show.
pub fn rescale_points(set: &MeasurementSet, fit: &FitResult, curve: &EfficiencyCurve) -> Vec<ScaledPoint> {
    let m = curve.multiplier() / fit.scale(curve.anchor()).unwrap_or(1.0);
    set.sources()
        .iter()
        .enumerate()
        .flat_map(|(s, source)| {
            let n = fit.scale(s).unwrap_or(1.0) * m;
            source.efficiency.iter().map(move |p| {
                let eff = p.eff * n;
                let eff_err = p.eff_err * n;
                let fit = curve.value(p.energy);
                ScaledPoint {
                    source: s,
                    energy: p.energy,
                    energy_err: p.energy_err,
                    eff,
                    eff_err,
                    fit,
                    pull: if eff_err > 0.0 { (eff - fit) / eff_err } else { 0.0 },
                }
            })
        })
        .collect()
}

/// Largest number of rows the efficiency table may hold.
pub const MAX_TABLE_ROWS: usize = 10_000;

/// Energies of the printed efficiency table: every 100 keV below 800 keV and
/// every 500 keV from 500 keV on, within `[start, end)`.
pub fn table_energies(start: f64, end: f64) -> Result<Vec<f64>, FitError> {
    if !(start.is_finite() && end.is_finite()) {
        return Err(FitError::config(format!("table range {start}..{end} keV must be finite")));
    }
    let in_range = |e: f64| e >= start && e < end;

    // 500 keV steps from 1000 keV on; 500 itself is in the 100 keV run.
    let k_first = (start / 500.0).ceil().max(2.0);
    let k_last = (end / 500.0).ceil() - 1.0;
    let n_wide = (k_last - k_first + 1.0).max(0.0);
    if n_wide > MAX_TABLE_ROWS as f64 {
        return Err(FitError::config(format!(
            "table range {start}..{end} keV exceeds {MAX_TABLE_ROWS} rows"
        )));
    }

    let mut energies: Vec<f64> = (1..=7).map(|k| k as f64 * 100.0).filter(|&e| in_range(e)).collect();
    energies.extend(
        (0..n_wide as usize)
            .map(|i| (k_first + i as f64) * 500.0)
            .filter(|&e| in_range(e)),
    );
    Ok(energies)
}
